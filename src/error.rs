//! Domain error types for the Flock gateway.
//!
//! Structured thiserror types for navigable diagnostics and compile-time
//! exhaustive handling. Every variant carries context fields so callers can
//! pattern-match on the failure mode without parsing message strings.
//!
//! Invariant violations (duplicate shard ids, a channel indexed to two
//! shards) are programming errors and panic instead of appearing here.

use thiserror::Error;

use crate::auth::AuthError;
use crate::shard::ShardId;
use crate::transport::TransportError;

/// Gateway domain errors.
///
/// Example log output:
/// ```text
/// GatewayError::CapacityExceeded { channels_per_shard: 10, max_shard_count: 5 }
/// → "all shards are full and the shard count limit (5) has been reached"
/// ```
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration is invalid, or the initial channel set cannot fit within
    /// `max_shard_count * channels_per_shard`. Fatal; raised during setup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Every shard is at its channel cap and the shard ceiling is reached.
    /// Recoverable: existing assignments are untouched, the caller may retry
    /// later or shed load.
    #[error(
        "all shards are full and the shard count limit ({max_shard_count}) has been reached \
         (try a larger max_shard_count or channels_per_shard, current cap {channels_per_shard})"
    )]
    CapacityExceeded {
        channels_per_shard: usize,
        max_shard_count: usize,
    },

    /// The manager could not resolve its login identity during setup.
    /// Fatal; prevents `start()`.
    #[error("failed to resolve gateway credentials")]
    CredentialResolution {
        #[source]
        source: AuthError,
    },

    /// Credential resolution or authentication was rejected for a shard.
    /// Terminal for that shard: not auto-retried, since it implies a revoked
    /// or expired credential requiring intervention before another start.
    #[error("authentication failed on shard {shard_id}")]
    Auth {
        shard_id: ShardId,
        #[source]
        source: AuthError,
    },

    /// A transport operation failed on an established connection.
    #[error("transport error on shard {shard_id}")]
    Transport {
        shard_id: ShardId,
        #[source]
        source: TransportError,
    },

    /// A send was attempted while the shard is disconnected or mid-reconnect.
    /// Transient: retry once the shard reports `Active` again.
    #[error("shard {shard_id} is not connected")]
    NotConnected { shard_id: ShardId },

    /// `start` was called on a shard whose run loop is already live.
    #[error("shard {shard_id} is already running")]
    AlreadyRunning { shard_id: ShardId },

    /// `setup` was called twice on the same manager.
    #[error("shard manager has already been set up")]
    AlreadySetup,

    /// No registered shard can currently act as a sender.
    #[error("no shard is available to send from")]
    NoAvailableShard,
}

impl GatewayError {
    /// Returns a static label string suitable for metrics.
    ///
    /// Used as the `error_type` label on `gateway_errors_total`, enabling
    /// per-error-type monitoring and alerting.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::CredentialResolution { .. } => "credential_resolution",
            Self::Auth { .. } => "auth",
            Self::Transport { .. } => "transport",
            Self::NotConnected { .. } => "not_connected",
            Self::AlreadyRunning { .. } => "already_running",
            Self::AlreadySetup => "already_setup",
            Self::NoAvailableShard => "no_available_shard",
        }
    }
}
