//! Shard manager.
//!
//! Owns the shard registry and lifecycle, and serializes channel-to-shard
//! assignment so concurrent joins cannot overshoot the per-shard channel cap
//! or the shard-count ceiling. The balancing policy is injected as a
//! [`Balancer`] trait object; [`DefaultBalancer`] and [`DistributedBalancer`]
//! are the bundled strategies.

mod default;
mod distributed;

pub use default::{DefaultBalancer, MAIN_SHARD_ID};
pub use distributed::DistributedBalancer;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::auth::CredentialProvider;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::metrics;
use crate::shard::{normalize_channel, Shard, ShardId, ShardSnapshot};
use crate::transport::Transport;

/// Mutable assignment state, guarded by the manager's assignment mutex.
///
/// Everything a balancer observes before acting lives here, so the whole
/// observe-then-act sequence of one assignment is atomic.
#[derive(Debug, Default)]
pub struct AssignState {
    /// Channel → owning shard. Mutually consistent with each shard's tracked
    /// set at all times.
    pub channel_index: HashMap<String, ShardId>,
    /// Monotonic creation-order counter, also used for sequential shard ids.
    pub next_seq: u64,
    /// Login identity resolved during setup; all shards connect as it.
    pub login: Option<String>,
    setup_done: bool,
}

/// Pluggable channel-to-shard balancing strategy.
///
/// Implementations receive the manager plus exclusive access to its
/// [`AssignState`]; `setup` and `assign` always run inside the assignment
/// critical section. The provided `start`/`stop` drive every registered shard
/// together, which fits any strategy that shares one identity across shards.
#[async_trait]
pub trait Balancer: Send + Sync {
    /// Create initial shards and place the initial channels. Runs once.
    async fn setup(
        &self,
        mgr: &ShardManager,
        state: &mut AssignState,
        initial_channels: &[String],
    ) -> Result<(), GatewayError>;

    /// Place one non-initial channel, creating a shard if the strategy
    /// allows. The channel is already normalized and not yet indexed.
    async fn assign(
        &self,
        mgr: &ShardManager,
        state: &mut AssignState,
        channel: &str,
    ) -> Result<(), GatewayError>;

    /// Pick the shard used to send to `channel`.
    fn sender_shard(
        &self,
        mgr: &ShardManager,
        channel: &str,
    ) -> Result<Arc<Shard>, GatewayError>;

    /// Bring shards up. Blocks until the manager exits.
    async fn start(&self, mgr: &ShardManager) -> Result<(), GatewayError> {
        mgr.start_all_shards().await?;
        mgr.wait_until_exit().await;
        Ok(())
    }

    /// Bring shards down, awaiting full teardown.
    async fn stop(&self, mgr: &ShardManager) {
        mgr.stop_all_shards().await;
    }
}

/// Coordinator owning the shard registry, lifecycle, and assignment contract.
pub struct ShardManager {
    config: GatewayConfig,
    credentials: Arc<dyn CredentialProvider>,
    transport: Arc<dyn Transport>,
    balancer: Box<dyn Balancer>,

    shards: DashMap<ShardId, Arc<Shard>>,
    assign: Mutex<AssignState>,

    /// Fires on explicit `stop()` or a fatal shard error.
    exit: CancellationToken,
    stopped: AtomicBool,
}

/// Point-in-time view of the whole manager, for owner inspection and export.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerSnapshot {
    pub shard_count: usize,
    pub channel_count: usize,
    pub shards: Vec<ShardSnapshot>,
}

impl ShardManager {
    /// Create a manager with an explicit balancing policy.
    pub fn new(
        config: GatewayConfig,
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn Transport>,
        balancer: Box<dyn Balancer>,
    ) -> Result<Self, GatewayError> {
        config.validate()?;
        Ok(Self {
            config,
            credentials,
            transport,
            balancer,
            shards: DashMap::new(),
            assign: Mutex::new(AssignState {
                next_seq: 1,
                ..AssignState::default()
            }),
            exit: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Create a manager with the single-shard default policy.
    pub fn with_default_policy(
        config: GatewayConfig,
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, GatewayError> {
        Self::new(config, credentials, transport, Box::new(DefaultBalancer))
    }

    /// Create a manager with the capacity-balanced distributed policy.
    pub fn with_distributed_policy(
        config: GatewayConfig,
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, GatewayError> {
        Self::new(config, credentials, transport, Box::new(DistributedBalancer))
    }

    /// Manager configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// One-time setup: resolve the login identity, create initial shards, and
    /// place `initial_channels` across them per the active policy.
    ///
    /// Capacity violations are caught here, before any shard starts: an
    /// initial channel set that cannot fit within
    /// `max_shard_count * channels_per_shard` fails with a configuration
    /// error and creates no shard.
    pub async fn setup<I, S>(&self, initial_channels: I) -> Result<(), GatewayError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = std::collections::HashSet::new();
        let channels: Vec<String> = initial_channels
            .into_iter()
            .map(|c| normalize_channel(c.as_ref()))
            .filter(|c| seen.insert(c.clone()))
            .collect();

        let mut state = self.assign.lock().await;
        if state.setup_done {
            return Err(GatewayError::AlreadySetup);
        }

        let creds = self
            .credentials
            .resolve(None)
            .await
            .map_err(|source| GatewayError::CredentialResolution { source })?;
        state.login = Some(creds.login);

        self.balancer.setup(self, &mut state, &channels).await?;
        state.setup_done = true;

        info!(
            shards = self.shards.len(),
            channels = state.channel_index.len(),
            "shard manager set up"
        );
        Ok(())
    }

    /// Route a channel-join request to a shard.
    ///
    /// Calls with `is_initial = true` refer to channels already placed during
    /// `setup` and are no-ops, as are calls for channels that already have an
    /// owner (a channel maps to at most one shard). Everything else runs the
    /// active policy under the assignment lock, so concurrent calls cannot
    /// both observe spare capacity and overshoot the limits.
    pub async fn assign_shard(&self, channel: &str, is_initial: bool) -> Result<(), GatewayError> {
        if is_initial {
            return Ok(());
        }
        let channel = normalize_channel(channel);

        let mut state = self.assign.lock().await;
        if state.channel_index.contains_key(&channel) {
            return Ok(());
        }

        match self.balancer.assign(self, &mut state, &channel).await {
            Ok(()) => {
                metrics::set_channels_assigned(state.channel_index.len());
                Ok(())
            }
            Err(e) => {
                warn!(channel = %channel, error = %e, "channel assignment failed");
                metrics::record_assignment_failure(e.error_type_label());
                Err(e)
            }
        }
    }

    /// Detach a channel from its owning shard. No-op when unassigned.
    pub async fn release_channel(&self, channel: &str) -> Result<(), GatewayError> {
        let channel = normalize_channel(channel);

        let mut state = self.assign.lock().await;
        let Some(shard_id) = state.channel_index.remove(&channel) else {
            return Ok(());
        };
        metrics::set_channels_assigned(state.channel_index.len());

        if let Some(shard) = self.shards.get(&shard_id).map(|s| Arc::clone(s.value())) {
            shard.remove_channels([channel.as_str()]).await?;
        }
        Ok(())
    }

    /// Resolve the shard used to send to `channel`.
    ///
    /// Membership is not required to send; the policy picks deterministically
    /// among live shards and never returns a stopped one.
    pub fn get_sender_shard(&self, channel: &str) -> Result<Arc<Shard>, GatewayError> {
        self.balancer.sender_shard(self, channel)
    }

    /// Bring the gateway up per the active policy. Blocks until the manager
    /// exits (explicit `stop()` or a fatal shard error).
    pub async fn start(&self) -> Result<(), GatewayError> {
        self.balancer.start(self).await
    }

    /// Bring the gateway down: stop every shard, awaiting full teardown, then
    /// fire the exit signal. Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.balancer.stop(self).await;
        self.exit.cancel();
        info!("shard manager stopped");
    }

    /// Start every registered shard that is not already running, without
    /// blocking on any of them.
    pub async fn start_all_shards(&self) -> Result<(), GatewayError> {
        for shard in self.shards_by_seq() {
            if !shard.is_running() {
                match shard.start(false).await {
                    Ok(()) => {}
                    Err(GatewayError::AlreadyRunning { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// Stop every registered shard, returning once all have torn down.
    pub async fn stop_all_shards(&self) {
        for shard in self.shards_by_seq() {
            shard.stop().await;
        }
    }

    /// Suspend until the manager exits: explicit `stop()` or a fatal shard
    /// error. No polling.
    pub async fn wait_until_exit(&self) {
        self.exit.cancelled().await;
    }

    /// Register a new shard, optionally pre-tracking `initial_channels`.
    ///
    /// Must be called inside the assignment critical section (balancers
    /// receive the locked [`AssignState`]). Panics on invariant violations:
    /// a reused shard id, a channel already owned elsewhere, or a registry
    /// already at `max_shard_count`. Those are programming errors in the
    /// calling policy, not runtime conditions.
    pub fn add_shard(
        &self,
        state: &mut AssignState,
        id: ShardId,
        initial_channels: Vec<String>,
    ) -> Arc<Shard> {
        assert!(
            self.shards.len() < self.config.max_shard_count,
            "shard registry is already at max_shard_count ({})",
            self.config.max_shard_count
        );
        let login = state
            .login
            .clone()
            .expect("setup resolves the login before shards are created");

        let seq = state.next_seq;
        state.next_seq += 1;

        for channel in &initial_channels {
            if let Some(owner) = state.channel_index.get(channel) {
                panic!("channel {channel} is already owned by shard {owner}");
            }
        }
        for channel in &initial_channels {
            state.channel_index.insert(channel.clone(), id.clone());
        }

        let shard = Arc::new(Shard::new(
            id.clone(),
            seq,
            login,
            initial_channels,
            Arc::clone(&self.credentials),
            Arc::clone(&self.transport),
            self.config.connect_timeout,
            self.exit.clone(),
        ));

        let previous = self.shards.insert(id.clone(), Arc::clone(&shard));
        assert!(previous.is_none(), "duplicate shard id {id}");

        info!(
            shard_id = %id,
            seq,
            channels = shard.channel_count(),
            "shard added"
        );
        metrics::set_shards_registered(self.shards.len());
        metrics::set_channels_assigned(state.channel_index.len());
        shard
    }

    /// Look up a shard by id.
    pub fn shard(&self, id: &ShardId) -> Option<Arc<Shard>> {
        self.shards.get(id).map(|s| Arc::clone(s.value()))
    }

    /// Registered shards, in creation order.
    pub fn shards_by_seq(&self) -> Vec<Arc<Shard>> {
        let mut shards: Vec<Arc<Shard>> = self
            .shards
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        shards.sort_by_key(|s| s.seq());
        shards
    }

    /// Number of registered shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Total channels tracked across all shards.
    pub fn channel_count(&self) -> usize {
        self.shards.iter().map(|s| s.value().channel_count()).sum()
    }

    /// Deterministic sender pick shared by the bundled policies: the
    /// earliest-created shard that is currently active, else the earliest
    /// that has not terminated. Stopped and failed shards are never returned.
    pub(crate) fn pick_sender(&self) -> Option<Arc<Shard>> {
        let shards = self.shards_by_seq();
        shards
            .iter()
            .find(|s| s.status().is_sendable())
            .or_else(|| shards.iter().find(|s| !s.status().is_terminal()))
            .map(Arc::clone)
    }

    /// Point-in-time view for owner inspection.
    pub fn snapshot(&self) -> ManagerSnapshot {
        let shards: Vec<ShardSnapshot> = self.shards_by_seq().iter().map(|s| s.snapshot()).collect();
        ManagerSnapshot {
            shard_count: shards.len(),
            channel_count: shards.iter().map(|s| s.channel_count).sum(),
            shards,
        }
    }
}

impl std::fmt::Debug for ShardManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardManager")
            .field("shards", &self.shards.len())
            .field("config", &self.config)
            .finish()
    }
}
