//! Gateway metrics.
//!
//! Emitted through the `metrics` facade; the embedding application installs
//! whatever recorder/exporter it wants. Call [`describe_metrics`] once at
//! startup to register descriptions with the recorder.

use ::metrics::{counter, describe_counter, describe_gauge, gauge, Unit};

use crate::shard::ShardId;

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(
        "gateway_shard_connects_total",
        Unit::Count,
        "Successful shard connections (initial and re-established)"
    );
    describe_counter!(
        "gateway_shard_connect_failures_total",
        Unit::Count,
        "Failed or timed-out connection attempts"
    );
    describe_counter!(
        "gateway_shard_reconnect_waits_total",
        Unit::Count,
        "Times a shard entered backoff before reconnecting"
    );
    describe_counter!(
        "gateway_shard_auth_failures_total",
        Unit::Count,
        "Terminal authentication rejections"
    );
    describe_counter!(
        "gateway_frames_sent_total",
        Unit::Count,
        "Frames sent across all shards"
    );
    describe_counter!(
        "gateway_frames_received_total",
        Unit::Count,
        "Frames received across all shards"
    );
    describe_counter!(
        "gateway_assignment_failures_total",
        Unit::Count,
        "Channel assignments rejected, by error type"
    );

    describe_gauge!(
        "gateway_shards_registered",
        Unit::Count,
        "Shards currently registered with the manager"
    );
    describe_gauge!(
        "gateway_channels_assigned",
        Unit::Count,
        "Channels currently assigned to a shard"
    );
    describe_gauge!(
        "gateway_shard_channels",
        Unit::Count,
        "Channels tracked per shard"
    );
}

pub(crate) fn record_connect(shard_id: &ShardId) {
    counter!(
        "gateway_shard_connects_total",
        "shard_id" => shard_id.to_string()
    )
    .increment(1);
}

pub(crate) fn record_connect_failure(shard_id: &ShardId) {
    counter!(
        "gateway_shard_connect_failures_total",
        "shard_id" => shard_id.to_string()
    )
    .increment(1);
}

pub(crate) fn record_reconnect_wait(shard_id: &ShardId) {
    counter!(
        "gateway_shard_reconnect_waits_total",
        "shard_id" => shard_id.to_string()
    )
    .increment(1);
}

pub(crate) fn record_auth_failure(shard_id: &ShardId) {
    counter!(
        "gateway_shard_auth_failures_total",
        "shard_id" => shard_id.to_string()
    )
    .increment(1);
}

pub(crate) fn record_frame_sent(shard_id: &ShardId) {
    counter!(
        "gateway_frames_sent_total",
        "shard_id" => shard_id.to_string()
    )
    .increment(1);
}

pub(crate) fn record_frame_received(shard_id: &ShardId) {
    counter!(
        "gateway_frames_received_total",
        "shard_id" => shard_id.to_string()
    )
    .increment(1);
}

pub(crate) fn record_assignment_failure(error_type: &'static str) {
    counter!(
        "gateway_assignment_failures_total",
        "error_type" => error_type
    )
    .increment(1);
}

pub(crate) fn set_shards_registered(count: usize) {
    gauge!("gateway_shards_registered").set(count as f64);
}

pub(crate) fn set_channels_assigned(count: usize) {
    gauge!("gateway_channels_assigned").set(count as f64);
}

pub(crate) fn set_shard_channels(shard_id: &ShardId, count: usize) {
    gauge!(
        "gateway_shard_channels",
        "shard_id" => shard_id.to_string()
    )
    .set(count as f64);
}
