use std::time::Duration;

use thiserror::Error as ThisError;

use crate::frame::Limits;
use crate::router::Policy;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:9000";
pub const DEFAULT_POOL_MAX: usize = 64;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(240);
pub const DEFAULT_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Sizing and deadlines for the connections to one backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Upper bound on open connections, idle or checked out.
    pub max: usize,
    /// Idle connections older than this are closed instead of reused.
    pub idle_timeout: Duration,
    /// How long a checkout waits for a connection when the pool is at `max`.
    pub checkout_timeout: Duration,
    /// Deadline for dialing and for each request/response round trip.
    pub call_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max: DEFAULT_POOL_MAX,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            checkout_timeout: DEFAULT_CHECKOUT_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendConfig {
    pub addr: String,
    pub pool: PoolConfig,
}

impl BackendConfig {
    pub fn new(addr: impl Into<String>) -> BackendConfig {
        BackendConfig {
            addr: addr.into(),
            pool: PoolConfig::default(),
        }
    }
}

/// Everything the proxy needs to run. Built once at startup and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub listen: String,
    /// The legacy server being drained. Without one every source lookup is a miss.
    pub source: Option<BackendConfig>,
    pub destination: BackendConfig,
    pub delete_on_get: bool,
    pub delete_on_set: bool,
    pub get_fallback_on_error: bool,
    pub command_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub limits: Limits,
}

impl Config {
    pub fn new(destination: impl Into<String>) -> Config {
        Config {
            listen: DEFAULT_LISTEN.to_string(),
            source: None,
            destination: BackendConfig::new(destination),
            delete_on_get: false,
            delete_on_set: false,
            get_fallback_on_error: false,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            limits: Limits::default(),
        }
    }

    pub fn policy(&self) -> Policy {
        Policy {
            delete_on_get: self.delete_on_get,
            delete_on_set: self.delete_on_set,
            get_fallback_on_error: self.get_fallback_on_error,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::EmptyAddress("listen"));
        }

        validate_backend("destination", &self.destination)?;

        if let Some(source) = &self.source {
            validate_backend("source", source)?;

            if source.addr == self.destination.addr {
                return Err(ConfigError::SameBackend(source.addr.clone()));
            }
        }

        if self.command_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("command timeout"));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("shutdown timeout"));
        }
        if self.limits.max_bulk_len == 0 || self.limits.max_array_len == 0 {
            return Err(ConfigError::ZeroLimit);
        }

        Ok(())
    }
}

fn validate_backend(name: &'static str, backend: &BackendConfig) -> Result<(), ConfigError> {
    if backend.addr.trim().is_empty() {
        return Err(ConfigError::EmptyAddress(name));
    }
    if backend.pool.max == 0 {
        return Err(ConfigError::ZeroPoolSize(name));
    }
    if backend.pool.idle_timeout.is_zero()
        || backend.pool.checkout_timeout.is_zero()
        || backend.pool.call_timeout.is_zero()
    {
        return Err(ConfigError::ZeroDuration(name));
    }

    Ok(())
}

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} address must not be empty")]
    EmptyAddress(&'static str),
    #[error("{0} pool size must be at least 1")]
    ZeroPoolSize(&'static str),
    #[error("{0} timeouts must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("source and destination both point at {0}")]
    SameBackend(String),
    #[error("protocol limits must be greater than zero")]
    ZeroLimit,
}
