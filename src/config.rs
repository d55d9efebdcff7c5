//! Gateway configuration module.
//!
//! Handles loading configuration from environment variables and validating
//! the capacity parameters before any shard is created.

use std::env;
use std::time::Duration;

use crate::error::GatewayError;

/// Default channel cap per shard.
pub const DEFAULT_CHANNELS_PER_SHARD: usize = 25;

/// Default hard ceiling on concurrent shards.
pub const DEFAULT_MAX_SHARD_COUNT: usize = 5;

/// Default starting shard count before auto-escalation.
pub const DEFAULT_INITIAL_SHARD_COUNT: usize = 1;

/// Default bound on a single connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Maximum number of channels a single shard may hold.
    pub channels_per_shard: usize,

    /// Hard ceiling on the number of concurrent shards.
    pub max_shard_count: usize,

    /// Number of shards created up front by `setup`.
    pub initial_shard_count: usize,

    /// How long a single connection attempt may take before it is classified
    /// as a transient network failure and the shard enters backoff.
    pub connect_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            channels_per_shard: DEFAULT_CHANNELS_PER_SHARD,
            max_shard_count: DEFAULT_MAX_SHARD_COUNT,
            initial_shard_count: DEFAULT_INITIAL_SHARD_COUNT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    ///
    /// Recognized variables: `CHANNELS_PER_SHARD`, `MAX_SHARD_COUNT`,
    /// `INITIAL_SHARD_COUNT`, `CONNECT_TIMEOUT_SECS`. Unset variables fall
    /// back to the defaults above.
    pub fn from_env() -> Result<Self, GatewayError> {
        dotenvy::dotenv().ok();

        let channels_per_shard = env::var("CHANNELS_PER_SHARD")
            .unwrap_or_else(|_| DEFAULT_CHANNELS_PER_SHARD.to_string())
            .parse()
            .map_err(|e| {
                GatewayError::Config(format!("CHANNELS_PER_SHARD must be a valid number: {e}"))
            })?;

        let max_shard_count = env::var("MAX_SHARD_COUNT")
            .unwrap_or_else(|_| DEFAULT_MAX_SHARD_COUNT.to_string())
            .parse()
            .map_err(|e| {
                GatewayError::Config(format!("MAX_SHARD_COUNT must be a valid number: {e}"))
            })?;

        let initial_shard_count = env::var("INITIAL_SHARD_COUNT")
            .unwrap_or_else(|_| DEFAULT_INITIAL_SHARD_COUNT.to_string())
            .parse()
            .map_err(|e| {
                GatewayError::Config(format!("INITIAL_SHARD_COUNT must be a valid number: {e}"))
            })?;

        let connect_timeout_secs: u64 = env::var("CONNECT_TIMEOUT_SECS")
            .unwrap_or_else(|_| DEFAULT_CONNECT_TIMEOUT.as_secs().to_string())
            .parse()
            .map_err(|e| {
                GatewayError::Config(format!("CONNECT_TIMEOUT_SECS must be a valid number: {e}"))
            })?;

        let config = Self {
            channels_per_shard,
            max_shard_count,
            initial_shard_count,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate capacity parameters.
    ///
    /// All three counts must be positive, and the initial shard count cannot
    /// exceed the shard ceiling.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.channels_per_shard == 0 {
            return Err(GatewayError::Config(
                "channels_per_shard must be positive".to_string(),
            ));
        }
        if self.max_shard_count == 0 {
            return Err(GatewayError::Config(
                "max_shard_count must be positive".to_string(),
            ));
        }
        if self.initial_shard_count == 0 {
            return Err(GatewayError::Config(
                "initial_shard_count must be positive".to_string(),
            ));
        }
        if self.initial_shard_count > self.max_shard_count {
            return Err(GatewayError::Config(format!(
                "initial_shard_count ({}) exceeds max_shard_count ({})",
                self.initial_shard_count, self.max_shard_count
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(GatewayError::Config(
                "connect_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Total channel capacity under the current limits.
    pub fn total_capacity(&self) -> usize {
        self.channels_per_shard * self.max_shard_count
    }
}
