//! Flock gateway: sharded chat connection management.
//!
//! Maintains live presence across an unbounded number of chat channels on
//! behalf of a client. Each physical connection (a [`Shard`]) authenticates
//! as one identity and holds membership in a bounded number of channels; the
//! [`ShardManager`] owns the shard registry, drives lifecycle, and routes
//! channel-to-shard assignment through a pluggable [`Balancer`] policy.
//!
//! Wire framing, REST calls, credential issuance, and event dispatch stay
//! outside: the gateway consumes them through the [`Transport`] and
//! [`CredentialProvider`] seams.
//!
//! ```ignore
//! use std::sync::Arc;
//! use flock_gateway::{GatewayConfig, ShardManager, StaticCredentialProvider};
//!
//! let manager = ShardManager::with_distributed_policy(
//!     GatewayConfig::from_env()?,
//!     Arc::new(StaticCredentialProvider::new("flockbot", token)),
//!     Arc::new(transport),
//! )?;
//! manager.setup(["songbirds", "finches"]).await?;
//! tokio::spawn(async move { manager.start().await });
//! ```

pub mod auth;
pub mod backoff;
pub mod config;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod shard;
pub mod transport;

pub use auth::{AuthError, CredentialProvider, Credentials, StaticCredentialProvider};
pub use backoff::ExponentialBackoff;
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use manager::{
    AssignState, Balancer, DefaultBalancer, DistributedBalancer, ManagerSnapshot, ShardManager,
};
pub use shard::{normalize_channel, Shard, ShardId, ShardSnapshot, ShardStats, ShardStatus};
pub use transport::{Connection, Frame, Transport, TransportError};

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
