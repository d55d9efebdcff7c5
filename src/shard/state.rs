//! Shard state tracking.
//!
//! Status of the per-shard connection state machine, plus the counters each
//! shard keeps about its own traffic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

/// Position of a shard in its connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    /// Created, never started.
    Disconnected,
    /// Opening the transport connection.
    Connecting,
    /// Connection open, sign-in in flight.
    Authenticating,
    /// Authenticated, re-issuing membership for tracked channels.
    Joining,
    /// Fully connected; frames flow.
    Active,
    /// Connection lost; waiting out backoff before the next attempt.
    ReconnectWait,
    /// Stopped by request. Terminal until restarted.
    Stopped,
    /// Authentication was rejected. Terminal until credentials are refreshed
    /// and the shard is started again.
    Failed,
}

impl ShardStatus {
    /// Returns true if the shard can send frames right now.
    pub fn is_sendable(&self) -> bool {
        matches!(self, ShardStatus::Active)
    }

    /// Returns true for states the run loop does not leave on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ShardStatus::Stopped | ShardStatus::Failed)
    }
}

/// Counters a shard keeps about its own connection.
#[derive(Debug, Default)]
pub struct ShardStats {
    pub(crate) connects: AtomicU64,
    pub(crate) reconnect_waits: AtomicU64,
    pub(crate) frames_sent: AtomicU64,
    pub(crate) frames_received: AtomicU64,
    pub(crate) connected_at: Mutex<Option<Instant>>,
}

impl ShardStats {
    pub(crate) fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
        *self.connected_at.lock().unwrap() = Some(Instant::now());
    }

    pub(crate) fn record_reconnect_wait(&self) {
        self.reconnect_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    pub fn reconnect_waits(&self) -> u64 {
        self.reconnect_waits.load(Ordering::Relaxed)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Instant of the most recent successful connection, if any.
    pub fn connected_at(&self) -> Option<Instant> {
        *self.connected_at.lock().unwrap()
    }
}

/// Point-in-time view of one shard, for owner inspection and export.
#[derive(Debug, Clone, Serialize)]
pub struct ShardSnapshot {
    pub id: String,
    pub status: ShardStatus,
    pub channel_count: usize,
    pub connects: u64,
    pub reconnect_waits: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
}
