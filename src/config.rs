//! Client configuration.

use crate::error::{Error, Result};
use crate::pool::DEFAULT_POOL_SIZE;
use crate::transport::Endpoint;
use std::time::Duration;

/// Environment variable overriding the pool size.
pub const POOL_SIZE_ENV: &str = "BITMAP_RPC_POOL_SIZE";

/// Configuration for the client factory.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Address of the bitmap service.
    pub endpoint: Endpoint,
    /// Number of pooled dispatchers in cooperative contexts.
    pub pool_size: usize,
    /// Interval between pool heartbeat sweeps.
    pub heartbeat_interval: Duration,
}

impl ClientConfig {
    /// Configuration with defaults for the given endpoint.
    #[must_use]
    pub const fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            pool_size: DEFAULT_POOL_SIZE,
            heartbeat_interval: Duration::from_secs(30),
        }
    }

    /// Resolve the configuration from the environment, with platform
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::new(Endpoint::from_env()?);
        if let Ok(raw) = std::env::var(POOL_SIZE_ENV) {
            config.pool_size = raw
                .parse()
                .map_err(|_| Error::Config(format!("invalid {POOL_SIZE_ENV} value {raw:?}")))?;
        }
        Ok(config)
    }
}
