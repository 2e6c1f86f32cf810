use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use windowgate::config::{LoggingConfig, StoreBackend, StoreShape, WindowgateConfig};
use windowgate::http::{router, HitCounter, HttpServer};
use windowgate::store::{
    start_purge_task, CounterBackend, MemoryStore, RedisCounterClient, RedisStore,
};

/// Fixed-window rate limiting in front of a demo HTTP endpoint.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Address to listen on, overriding the configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = WindowgateConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.listen {
        config.server.http_addr = addr;
    }

    init_tracing(&config.logging);

    info!("Starting Windowgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        http_addr = %config.server.http_addr,
        limit = config.limiter.limit,
        within_secs = config.limiter.within_secs,
        backend = ?config.store.backend,
        shape = ?config.store.shape,
        "Configuration loaded"
    );

    let backend = connect_backend(&config).await?;
    let limiter = config
        .limiter
        .builder(backend)?
        .store_timeout(config.store.timeout())
        .build();
    info!(limiter = ?limiter, "Rate limiter initialized");

    let app = router(Arc::new(limiter), HitCounter::default());
    let server = HttpServer::new(config.server.http_addr, app);

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Windowgate stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn connect_backend(config: &WindowgateConfig) -> anyhow::Result<CounterBackend> {
    let store = &config.store;
    match store.backend {
        StoreBackend::Memory => {
            let memory = Arc::new(MemoryStore::new());
            start_purge_task(memory.clone(), store.purge_interval());
            Ok(match store.shape {
                StoreShape::Atomic => CounterBackend::Atomic(memory),
                StoreShape::TwoStep => CounterBackend::TwoStep(memory),
            })
        }
        StoreBackend::Redis => {
            let url = store.redis_url.as_deref().unwrap_or_default();
            Ok(match store.shape {
                StoreShape::Atomic => {
                    let redis = RedisStore::connect(url).await?;
                    redis.ping().await?;
                    CounterBackend::atomic(redis)
                }
                StoreShape::TwoStep => CounterBackend::two_step(RedisCounterClient::connect(url).await?),
            })
        }
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
