//! Configuration management for Windowgate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, WindowgateError};
use crate::ratelimit::{
    check_delimiter, ContextIdentity, HeaderIdentity, IpIdentity, Limiter, LimiterBuilder, Quota,
    DEFAULT_KEY_DELIMITER, DEFAULT_KEY_PREFIX,
};
use crate::store::CounterBackend;

/// Prefix of environment variables overriding file settings, e.g.
/// `WINDOWGATE__LIMITER__LIMIT=100`.
pub const ENV_PREFIX: &str = "WINDOWGATE";

/// Main configuration for the Windowgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting policy
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// How the limiter identifies callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentityConfig {
    /// Source IP, honouring `X-Forwarded-For`
    #[default]
    Ip,
    /// Value of the named request header
    Header { name: String },
    /// String value stored under `key` in the request context
    Context { key: String },
}

/// Rate limiting policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Requests allowed per window
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Window length in seconds
    #[serde(default = "default_within_secs")]
    pub within_secs: u64,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default = "default_key_delimiter")]
    pub key_delimiter: String,

    #[serde(default)]
    pub identity: IdentityConfig,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            within_secs: default_within_secs(),
            key_prefix: default_key_prefix(),
            key_delimiter: default_key_delimiter(),
            identity: IdentityConfig::default(),
        }
    }
}

fn default_limit() -> u64 {
    60
}

fn default_within_secs() -> u64 {
    60
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_key_delimiter() -> String {
    DEFAULT_KEY_DELIMITER.to_string()
}

impl LimiterConfig {
    pub fn quota(&self) -> Result<Quota> {
        Quota::per_seconds(self.limit, self.within_secs)
    }

    /// A limiter builder carrying this policy, identity strategy and key
    /// format.
    pub fn builder(&self, backend: CounterBackend) -> Result<LimiterBuilder> {
        let builder = Limiter::builder(self.quota()?, backend)
            .key_prefix(self.key_prefix.clone(), self.key_delimiter.clone())?;

        Ok(match &self.identity {
            IdentityConfig::Ip => builder.identity(IpIdentity),
            IdentityConfig::Header { name } => builder.identity(HeaderIdentity::new(name.clone())),
            IdentityConfig::Context { key } => builder.identity(ContextIdentity::new(key.clone())),
        })
    }
}

/// Which counter store to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// In-process counters, only correct for a single instance
    #[default]
    Memory,
    /// Shared counters in Redis
    Redis,
}

/// Which store contract the limiter relies on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreShape {
    /// One transactional increment-and-expire per request
    #[default]
    Atomic,
    /// A read followed by a separate increment
    TwoStep,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL, required for the redis backend
    #[serde(default)]
    pub redis_url: Option<String>,

    #[serde(default)]
    pub shape: StoreShape,

    /// Upper bound on one store round trip in milliseconds; unset waits as
    /// long as the request does
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: Option<u64>,

    /// How often the memory backend drops expired counters
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: None,
            shape: StoreShape::default(),
            timeout_ms: default_timeout_ms(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}

fn default_timeout_ms() -> Option<u64> {
    Some(1000)
}

fn default_purge_interval() -> u64 {
    30
}

impl StoreConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs.max(1))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl WindowgateConfig {
    /// Load configuration from an optional YAML file, overridden by
    /// `WINDOWGATE__`-prefixed environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path, "Loading configuration");
            builder = builder.add_source(
                config::File::with_name(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: WindowgateConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path, with environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        Self::load(Some(path))
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WindowgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| WindowgateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the limiter cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.limiter.quota()?;

        check_delimiter(&self.limiter.key_delimiter)?;

        match &self.limiter.identity {
            IdentityConfig::Header { name } if name.trim().is_empty() => {
                return Err(WindowgateError::Config(
                    "identity header name must not be empty".to_string(),
                ));
            }
            IdentityConfig::Context { key } if key.is_empty() => {
                return Err(WindowgateError::Config(
                    "identity context key must not be empty".to_string(),
                ));
            }
            _ => {}
        }

        if self.store.backend == StoreBackend::Redis
            && self.store.redis_url.as_deref().map_or(true, str::is_empty)
        {
            return Err(WindowgateError::Config(
                "store.redis_url is required for the redis backend".to_string(),
            ));
        }

        if self.store.timeout_ms == Some(0) {
            return Err(WindowgateError::Config(
                "store.timeout_ms must be positive when set".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_defaults() {
        let config = WindowgateConfig::default();

        assert_eq!(config.server.http_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.limiter.key_prefix, "limiter");
        assert_eq!(config.limiter.key_delimiter, "-");
        assert_eq!(config.limiter.identity, IdentityConfig::Ip);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.shape, StoreShape::Atomic);
        assert_eq!(config.store.timeout(), Some(Duration::from_secs(1)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  http_addr: 0.0.0.0:9000
limiter:
  limit: 3
  within_secs: 1
  key_prefix: api
  identity:
    kind: header
    name: X-User-Id
store:
  backend: redis
  redis_url: redis://127.0.0.1/
  shape: two_step
  timeout_ms: 250
logging:
  json: true
"#;
        let config = WindowgateConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.server.http_addr.port(), 9000);
        assert_eq!(config.limiter.limit, 3);
        assert_eq!(config.limiter.key_prefix, "api");
        assert_eq!(config.limiter.key_delimiter, "-");
        assert_eq!(
            config.limiter.identity,
            IdentityConfig::Header {
                name: "X-User-Id".to_string()
            }
        );
        assert_eq!(config.store.shape, StoreShape::TwoStep);
        assert_eq!(config.store.timeout(), Some(Duration::from_millis(250)));
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_rejects_zero_window() {
        let yaml = "limiter:\n  within_secs: 0\n";
        assert!(WindowgateConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_bad_delimiter() {
        assert!(WindowgateConfig::from_yaml("limiter:\n  key_delimiter: \"\"\n").is_err());
        assert!(WindowgateConfig::from_yaml("limiter:\n  key_delimiter: \"1\"\n").is_err());
    }

    #[test]
    fn test_redis_backend_requires_url() {
        let yaml = "store:\n  backend: redis\n";
        assert!(WindowgateConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_empty_header_name() {
        let yaml = "limiter:\n  identity:\n    kind: header\n    name: \"\"\n";
        assert!(WindowgateConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("windowgate-{}.yaml", std::process::id()));
        std::fs::write(&path, "limiter:\n  limit: 7\n  within_secs: 30\n").unwrap();

        let config = WindowgateConfig::from_file(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.limiter.limit, 7);
        assert_eq!(config.limiter.quota().unwrap().within_secs(), 30);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(WindowgateConfig::from_file("/nonexistent/windowgate.yaml").is_err());
    }

    #[tokio::test]
    async fn test_builder_applies_policy() {
        let config = WindowgateConfig::from_yaml("limiter:\n  limit: 9\n  within_secs: 10\n").unwrap();
        let limiter = config
            .limiter
            .builder(CounterBackend::atomic(MemoryStore::new()))
            .unwrap()
            .build();

        assert_eq!(limiter.quota().limit(), 9);
        assert_eq!(limiter.quota().within_secs(), 10);
    }
}
