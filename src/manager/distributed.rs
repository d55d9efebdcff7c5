//! Capacity-balanced, auto-scaling balancing policy.
//!
//! Channels are spread across shards so no shard exceeds
//! `channels_per_shard`; when every shard is full a new one is created, up to
//! `max_shard_count`, after which assignment fails with `CapacityExceeded`.
//! All shards share the one login identity resolved at setup.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::GatewayError;
use crate::manager::{AssignState, Balancer, ShardManager};
use crate::shard::{Shard, ShardId};

/// Distributed policy: least-loaded assignment with auto-scaling.
#[derive(Debug, Default)]
pub struct DistributedBalancer;

/// Split `channels` into per-shard slices for setup.
///
/// Starts from `initial_shards` slices, as even as possible (sizes differ by
/// at most one). If the largest slice would exceed `channels_per_shard`, the
/// shard count is recomputed upward to `ceil(len / channels_per_shard)`; if
/// that exceeds `max_shard_count` the initial channel set cannot fit and the
/// whole setup fails before any shard is created.
pub(crate) fn partition_initial(
    channels: &[String],
    initial_shards: usize,
    channels_per_shard: usize,
    max_shard_count: usize,
) -> Result<Vec<Vec<String>>, GatewayError> {
    if channels.is_empty() {
        return Ok(vec![Vec::new(); initial_shards]);
    }

    let mut count = initial_shards;
    if channels.len().div_ceil(count) > channels_per_shard {
        count = channels.len().div_ceil(channels_per_shard);
        if count > max_shard_count {
            return Err(GatewayError::Config(format!(
                "{} initial channels cannot fit within max_shard_count ({max_shard_count}) x \
                 channels_per_shard ({channels_per_shard}); raise one of the two limits",
                channels.len()
            )));
        }
    }

    let base = channels.len() / count;
    let extra = channels.len() % count;
    let mut slices = Vec::with_capacity(count);
    let mut offset = 0;
    for idx in 0..count {
        let size = if idx < extra { base + 1 } else { base };
        slices.push(channels[offset..offset + size].to_vec());
        offset += size;
    }
    Ok(slices)
}

#[async_trait]
impl Balancer for DistributedBalancer {
    async fn setup(
        &self,
        mgr: &ShardManager,
        state: &mut AssignState,
        initial_channels: &[String],
    ) -> Result<(), GatewayError> {
        let config = mgr.config();
        let slices = partition_initial(
            initial_channels,
            config.initial_shard_count,
            config.channels_per_shard,
            config.max_shard_count,
        )?;

        let shard_count = slices.len();
        for slice in slices {
            let id = ShardId::from(format!("shard-{}", state.next_seq));
            mgr.add_shard(state, id, slice);
        }
        info!(
            shards = shard_count,
            channels = initial_channels.len(),
            "distributed policy ready"
        );
        Ok(())
    }

    async fn assign(
        &self,
        mgr: &ShardManager,
        state: &mut AssignState,
        channel: &str,
    ) -> Result<(), GatewayError> {
        let config = mgr.config();
        let shards = mgr.shards_by_seq();

        // Least-loaded shard; ties break toward the earliest-created since
        // the list is in creation order and min_by_key keeps the first.
        let mut target = shards
            .iter()
            .min_by_key(|s| s.channel_count())
            .map(Arc::clone)
            .ok_or(GatewayError::NoAvailableShard)?;

        if target.channel_count() >= config.channels_per_shard {
            if mgr.shard_count() >= config.max_shard_count {
                return Err(GatewayError::CapacityExceeded {
                    channels_per_shard: config.channels_per_shard,
                    max_shard_count: config.max_shard_count,
                });
            }
            let id = ShardId::from(format!("shard-{}", state.next_seq));
            target = mgr.add_shard(state, id, Vec::new());
            target.start(false).await?;
        }

        state
            .channel_index
            .insert(channel.to_string(), target.id().clone());
        target.add_channels([channel]).await
    }

    fn sender_shard(
        &self,
        mgr: &ShardManager,
        _channel: &str,
    ) -> Result<Arc<Shard>, GatewayError> {
        // All shards share one identity, and sending does not require
        // membership, so any live shard will do; the pick is deterministic.
        mgr.pick_sender().ok_or(GatewayError::NoAvailableShard)
    }
}
