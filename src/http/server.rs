//! HTTP server implementation.

use axum::extract::State;
use axum::routing::get;
use axum::{Extension, Router};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use super::layer::RateLimitLayer;
use crate::error::{Result, WindowgateError};
use crate::ratelimit::{Decision, Limiter};

/// Number of requests that made it past the limiter.
#[derive(Debug, Clone, Default)]
pub struct HitCounter(Arc<AtomicU64>);

impl HitCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Answers with the number of requests served before this one.
async fn hits(State(counter): State<HitCounter>, decision: Option<Extension<Decision>>) -> String {
    let served = counter.0.fetch_add(1, Ordering::SeqCst);
    if let Some(Extension(decision)) = decision {
        debug!(
            identity = %decision.identity,
            remaining = decision.remaining,
            "Serving rate limited request"
        );
    }
    served.to_string()
}

/// The demo application: a hit counter behind the rate limiter.
pub fn router(limiter: Arc<Limiter>, counter: HitCounter) -> Router {
    Router::new()
        .route("/", get(hits))
        .with_state(counter)
        .layer(RateLimitLayer::new(limiter))
}

/// HTTP server for the demo application.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server serving `router`.
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves. Peer
    /// addresses are exposed to handlers and identity resolvers through
    /// `ConnectInfo<SocketAddr>`.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            WindowgateError::Io(e)
        })?;

        self.serve_listener(listener, signal).await
    }

    /// Serve on an already bound listener until `signal` resolves.
    pub async fn serve_listener<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        info!(addr = %listener.local_addr()?, "Starting HTTP server");

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            WindowgateError::Io(e)
        })
    }
}
