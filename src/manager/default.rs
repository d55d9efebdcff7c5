//! Single-shard balancing policy.
//!
//! Everything lives on one shard: initial channels are attached to it
//! directly at setup (not through assignment, so nothing is joined twice),
//! every later assignment lands on it, and it is always the sender. No
//! channel cap applies under this policy.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::GatewayError;
use crate::manager::{AssignState, Balancer, ShardManager};
use crate::shard::{Shard, ShardId};

/// The shard id used by the default policy.
pub const MAIN_SHARD_ID: &str = "main";

/// Default policy: one shard, everything routed there.
#[derive(Debug, Default)]
pub struct DefaultBalancer;

impl DefaultBalancer {
    fn main_shard(mgr: &ShardManager) -> Result<Arc<Shard>, GatewayError> {
        mgr.shard(&ShardId::from(MAIN_SHARD_ID))
            .ok_or(GatewayError::NoAvailableShard)
    }
}

#[async_trait]
impl Balancer for DefaultBalancer {
    async fn setup(
        &self,
        mgr: &ShardManager,
        state: &mut AssignState,
        initial_channels: &[String],
    ) -> Result<(), GatewayError> {
        let shard = mgr.add_shard(state, ShardId::from(MAIN_SHARD_ID), initial_channels.to_vec());
        info!(
            shard_id = %shard.id(),
            channels = shard.channel_count(),
            "default policy ready"
        );
        Ok(())
    }

    async fn assign(
        &self,
        mgr: &ShardManager,
        state: &mut AssignState,
        channel: &str,
    ) -> Result<(), GatewayError> {
        let shard = Self::main_shard(mgr)?;
        state
            .channel_index
            .insert(channel.to_string(), shard.id().clone());
        shard.add_channels([channel]).await
    }

    fn sender_shard(
        &self,
        mgr: &ShardManager,
        _channel: &str,
    ) -> Result<Arc<Shard>, GatewayError> {
        mgr.pick_sender().ok_or(GatewayError::NoAvailableShard)
    }

    async fn start(&self, mgr: &ShardManager) -> Result<(), GatewayError> {
        // A single shard: run its loop inline until the gateway stops.
        let shard = Self::main_shard(mgr)?;
        shard.start(true).await
    }
}
