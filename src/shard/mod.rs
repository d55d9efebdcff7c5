//! Shard lifecycle.
//!
//! A shard owns one transport connection under one identity and a mutable set
//! of member channels, and runs its own connect / authenticate / rejoin /
//! reconnect state machine. Shards are created only by their manager; the
//! manager drives `start`/`stop` and routes channel assignments here.

mod state;

pub use state::{ShardSnapshot, ShardStats, ShardStatus};

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::auth::{AuthError, CredentialProvider};
use crate::backoff::ExponentialBackoff;
use crate::error::GatewayError;
use crate::metrics;
use crate::transport::{Connection, Frame, Transport};

/// Unique shard identifier within one manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ShardId(String);

impl ShardId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShardId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ShardId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Normalize a channel name: strip the leading `#`, lowercase the rest.
pub fn normalize_channel(name: &str) -> String {
    name.strip_prefix('#').unwrap_or(name).to_lowercase()
}

/// Outcome of one authentication handshake.
enum AuthAttempt {
    /// Credentials rejected or unavailable. Terminal for the shard.
    Fatal(AuthError),
    /// The connection dropped mid-handshake. Retried via backoff.
    Transient,
}

/// One persistent, independently authenticated connection responsible for a
/// subset of channels.
pub struct Shard {
    id: ShardId,
    seq: u64,
    login: String,
    connect_timeout: Duration,
    credentials: Arc<dyn CredentialProvider>,
    transport: Arc<dyn Transport>,

    /// Tracked channel set. Kept across reconnects so membership can be
    /// replayed in full once a connection re-establishes.
    channels: StdMutex<BTreeSet<String>>,

    /// Live connection, present from connect until disconnect so `stop` can
    /// tear it down from outside the run loop.
    conn: Mutex<Option<Arc<dyn Connection>>>,

    status_tx: watch::Sender<ShardStatus>,
    stats: ShardStats,

    /// Cancellation for the current run. Replaced on every `start` so a
    /// stopped or failed shard can be started again.
    cancel: StdMutex<CancellationToken>,
    run_task: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,

    /// Manager exit signal, fired on terminal auth failure so
    /// `wait_until_exit` callers wake.
    fatal: CancellationToken,

    last_auth_error: StdMutex<Option<AuthError>>,
}

impl Shard {
    pub(crate) fn new(
        id: ShardId,
        seq: u64,
        login: String,
        initial_channels: Vec<String>,
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn Transport>,
        connect_timeout: Duration,
        fatal: CancellationToken,
    ) -> Self {
        let (status_tx, _) = watch::channel(ShardStatus::Disconnected);
        Self {
            id,
            seq,
            login,
            connect_timeout,
            credentials,
            transport,
            channels: StdMutex::new(initial_channels.into_iter().collect()),
            conn: Mutex::new(None),
            status_tx,
            stats: ShardStats::default(),
            cancel: StdMutex::new(CancellationToken::new()),
            run_task: Mutex::new(None),
            running: AtomicBool::new(false),
            fatal,
            last_auth_error: StdMutex::new(None),
        }
    }

    /// Shard identifier.
    pub fn id(&self) -> &ShardId {
        &self.id
    }

    /// Monotonic creation order within the owning manager.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Login identity this shard connects as.
    pub fn login(&self) -> &str {
        &self.login
    }

    /// Current state machine position.
    pub fn status(&self) -> ShardStatus {
        *self.status_tx.borrow()
    }

    /// Subscribe to status transitions.
    pub fn watch_status(&self) -> watch::Receiver<ShardStatus> {
        self.status_tx.subscribe()
    }

    /// Whether the run loop is live.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Tracked channels, sorted.
    pub fn channels(&self) -> Vec<String> {
        self.channels.lock().unwrap().iter().cloned().collect()
    }

    /// Number of tracked channels.
    pub fn channel_count(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    /// Connection counters.
    pub fn stats(&self) -> &ShardStats {
        &self.stats
    }

    /// The auth rejection that moved this shard to `Failed`, if any.
    pub fn last_auth_error(&self) -> Option<AuthError> {
        self.last_auth_error.lock().unwrap().clone()
    }

    /// Point-in-time view for owner inspection.
    pub fn snapshot(&self) -> ShardSnapshot {
        ShardSnapshot {
            id: self.id.to_string(),
            status: self.status(),
            channel_count: self.channel_count(),
            connects: self.stats.connects(),
            reconnect_waits: self.stats.reconnect_waits(),
            frames_sent: self.stats.frames_sent(),
            frames_received: self.stats.frames_received(),
        }
    }

    /// Start the shard.
    ///
    /// Opens the connection, authenticates, re-issues membership for every
    /// tracked channel, then stays active, reconnecting on transport failures
    /// until stopped. With `block = true` the call runs the loop inline and
    /// returns only once the shard stops (or fails terminally); with
    /// `block = false` the loop runs concurrently and the call returns
    /// immediately.
    pub async fn start(self: &Arc<Self>, block: bool) -> Result<(), GatewayError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(GatewayError::AlreadyRunning {
                shard_id: self.id.clone(),
            });
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap() = cancel.clone();
        self.last_auth_error.lock().unwrap().take();

        if block {
            let result = self.run(cancel).await;
            self.running.store(false, Ordering::SeqCst);
            result
        } else {
            let shard = Arc::clone(self);
            let handle = tokio::spawn(async move {
                if let Err(e) = shard.run(cancel).await {
                    error!(shard_id = %shard.id, error = %e, "shard terminated");
                }
                shard.running.store(false, Ordering::SeqCst);
            });
            *self.run_task.lock().await = Some(handle);
            Ok(())
        }
    }

    /// Stop the shard. Valid from any state.
    ///
    /// Cancels a pending backoff wait or in-flight connect, closes the
    /// connection, and waits for the run loop to finish before returning.
    pub async fn stop(&self) {
        self.cancel.lock().unwrap().cancel();

        if let Some(conn) = self.conn.lock().await.take() {
            conn.close().await;
        }

        if let Some(handle) = self.run_task.lock().await.take() {
            if let Err(e) = handle.await {
                error!(shard_id = %self.id, error = %e, "shard run task panicked");
            }
        }

        // A failed shard stays observable as failed; everything else lands in
        // the stopped state even if the run loop never started.
        if self.status() != ShardStatus::Failed {
            self.set_status(ShardStatus::Stopped);
        }
    }

    /// Add channels to this shard's tracked set, joining them immediately
    /// when connected. Mid-reconnect mutations are retained and replayed in
    /// full once the connection re-establishes.
    pub async fn add_channels<I, S>(&self, names: I) -> Result<(), GatewayError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let added: Vec<String> = {
            let mut channels = self.channels.lock().unwrap();
            names
                .into_iter()
                .map(|n| normalize_channel(n.as_ref()))
                .filter(|n| channels.insert(n.clone()))
                .collect()
        };
        if added.is_empty() {
            return Ok(());
        }

        debug!(shard_id = %self.id, count = added.len(), "channels added");
        metrics::set_shard_channels(&self.id, self.channel_count());

        if self.status().is_sendable() {
            let conn = self.conn.lock().await.clone();
            if let Some(conn) = conn {
                for channel in &added {
                    self.send_frame(&conn, Frame::Join {
                        channel: channel.clone(),
                    })
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// Remove channels from this shard's tracked set, parting them
    /// immediately when connected.
    pub async fn remove_channels<I, S>(&self, names: I) -> Result<(), GatewayError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let removed: Vec<String> = {
            let mut channels = self.channels.lock().unwrap();
            names
                .into_iter()
                .map(|n| normalize_channel(n.as_ref()))
                .filter(|n| channels.remove(n))
                .collect()
        };
        if removed.is_empty() {
            return Ok(());
        }

        debug!(shard_id = %self.id, count = removed.len(), "channels removed");
        metrics::set_shard_channels(&self.id, self.channel_count());

        if self.status().is_sendable() {
            let conn = self.conn.lock().await.clone();
            if let Some(conn) = conn {
                for channel in &removed {
                    self.send_frame(&conn, Frame::Part {
                        channel: channel.clone(),
                    })
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// Send a chat line to a channel.
    ///
    /// Membership is not required to send. Fails with a transient
    /// `NotConnected` while the shard is disconnected or mid-reconnect:
    /// callers retry after observing `Active` again, nothing is queued.
    pub async fn send_message(&self, channel: &str, text: &str) -> Result<(), GatewayError> {
        if !self.status().is_sendable() {
            return Err(GatewayError::NotConnected {
                shard_id: self.id.clone(),
            });
        }
        let conn = self.conn.lock().await.clone().ok_or(GatewayError::NotConnected {
            shard_id: self.id.clone(),
        })?;
        self.send_frame(&conn, Frame::Privmsg {
            channel: normalize_channel(channel),
            text: text.to_string(),
        })
        .await
    }

    async fn send_frame(
        &self,
        conn: &Arc<dyn Connection>,
        frame: Frame,
    ) -> Result<(), GatewayError> {
        conn.send(frame).await.map_err(|source| GatewayError::Transport {
            shard_id: self.id.clone(),
            source,
        })?;
        self.stats.record_frame_sent();
        metrics::record_frame_sent(&self.id);
        Ok(())
    }

    fn set_status(&self, status: ShardStatus) {
        let previous = *self.status_tx.borrow();
        if previous != status {
            trace!(shard_id = %self.id, from = ?previous, to = ?status, "status transition");
        }
        self.status_tx.send_replace(status);
    }

    /// Connection run loop.
    ///
    /// Returns `Ok(())` on a requested stop and `Err` on terminal auth
    /// failure. Transport failures never surface here; they feed the backoff
    /// path and are retried indefinitely.
    async fn run(self: &Arc<Self>, cancel: CancellationToken) -> Result<(), GatewayError> {
        let mut backoff = ExponentialBackoff::new();
        info!(shard_id = %self.id, login = %self.login, "shard starting");

        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.set_status(ShardStatus::Connecting);

            let attempt =
                tokio::time::timeout(self.connect_timeout, self.transport.connect(&self.login));
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = attempt => result,
            };

            let conn = match result {
                Ok(Ok(conn)) => conn,
                Ok(Err(e)) => {
                    warn!(shard_id = %self.id, error = %e, "connect failed");
                    metrics::record_connect_failure(&self.id);
                    if self.wait_backoff(&cancel, &mut backoff).await {
                        break;
                    }
                    continue;
                }
                Err(_) => {
                    warn!(
                        shard_id = %self.id,
                        timeout_secs = self.connect_timeout.as_secs(),
                        "connect timed out"
                    );
                    metrics::record_connect_failure(&self.id);
                    if self.wait_backoff(&cancel, &mut backoff).await {
                        break;
                    }
                    continue;
                }
            };

            // Expose the connection before the handshake so `stop` can close
            // it out from under a pending recv.
            *self.conn.lock().await = Some(Arc::clone(&conn));

            match self.authenticate(&conn).await {
                Ok(()) => {}
                Err(AuthAttempt::Fatal(e)) => {
                    self.conn.lock().await.take();
                    conn.close().await;
                    error!(shard_id = %self.id, error = %e, "authentication rejected");
                    metrics::record_auth_failure(&self.id);
                    *self.last_auth_error.lock().unwrap() = Some(e.clone());
                    self.set_status(ShardStatus::Failed);
                    self.fatal.cancel();
                    return Err(GatewayError::Auth {
                        shard_id: self.id.clone(),
                        source: e,
                    });
                }
                Err(AuthAttempt::Transient) => {
                    self.conn.lock().await.take();
                    conn.close().await;
                    if cancel.is_cancelled() {
                        break;
                    }
                    warn!(shard_id = %self.id, "connection lost during authentication");
                    if self.wait_backoff(&cancel, &mut backoff).await {
                        break;
                    }
                    continue;
                }
            }

            // Re-issue membership for every currently tracked channel. The
            // set is snapshotted here, so channels added or removed during
            // the reconnect window are replayed exactly once.
            self.set_status(ShardStatus::Joining);
            let tracked = self.channels();
            let mut join_failed = false;
            for channel in &tracked {
                if let Err(e) = self.send_frame(&conn, Frame::Join {
                    channel: channel.clone(),
                })
                .await
                {
                    warn!(shard_id = %self.id, channel = %channel, error = %e, "join failed");
                    join_failed = true;
                    break;
                }
            }
            if join_failed {
                self.conn.lock().await.take();
                conn.close().await;
                if cancel.is_cancelled() {
                    break;
                }
                if self.wait_backoff(&cancel, &mut backoff).await {
                    break;
                }
                continue;
            }

            self.set_status(ShardStatus::Active);
            self.stats.record_connect();
            metrics::record_connect(&self.id);
            backoff.reset();
            info!(
                shard_id = %self.id,
                channels = tracked.len(),
                "shard active"
            );

            // Read until disconnect or stop.
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = conn.recv() => match frame {
                        Some(frame) => self.handle_frame(&conn, frame).await,
                        None => break,
                    },
                }
            }

            self.conn.lock().await.take();
            if cancel.is_cancelled() {
                conn.close().await;
                break;
            }

            warn!(shard_id = %self.id, "connection lost unexpectedly");
            if self.wait_backoff(&cancel, &mut backoff).await {
                break;
            }
        }

        self.set_status(ShardStatus::Stopped);
        info!(shard_id = %self.id, "shard stopped");
        Ok(())
    }

    /// Sign-in handshake: send credentials, wait for the verdict.
    ///
    /// The token is resolved fresh on every connect so refreshed credentials
    /// are picked up across reconnects.
    async fn authenticate(&self, conn: &Arc<dyn Connection>) -> Result<(), AuthAttempt> {
        self.set_status(ShardStatus::Authenticating);

        let creds = self
            .credentials
            .resolve(None)
            .await
            .map_err(AuthAttempt::Fatal)?;

        conn.send(Frame::Auth {
            login: creds.login,
            token: creds.token,
        })
        .await
        .map_err(|_| AuthAttempt::Transient)?;
        self.stats.record_frame_sent();
        metrics::record_frame_sent(&self.id);

        loop {
            match conn.recv().await {
                Some(Frame::Welcome) => {
                    debug!(shard_id = %self.id, login = %self.login, "authenticated");
                    return Ok(());
                }
                Some(Frame::AuthRejected { reason }) => {
                    return Err(AuthAttempt::Fatal(AuthError::rejected(reason)));
                }
                Some(Frame::Ping) => {
                    let _ = conn.send(Frame::Pong).await;
                }
                Some(other) => {
                    trace!(shard_id = %self.id, frame = ?other, "frame before welcome");
                }
                None => return Err(AuthAttempt::Transient),
            }
        }
    }

    async fn handle_frame(&self, conn: &Arc<dyn Connection>, frame: Frame) {
        self.stats.record_frame_received();
        metrics::record_frame_received(&self.id);

        match frame {
            Frame::Ping => {
                debug!(shard_id = %self.id, "ping, replying pong");
                if conn.send(Frame::Pong).await.is_ok() {
                    self.stats.record_frame_sent();
                    metrics::record_frame_sent(&self.id);
                }
            }
            Frame::Message {
                channel, sender, ..
            } => {
                // Dispatch to the application is external; the shard only
                // observes the traffic.
                debug!(shard_id = %self.id, channel = %channel, sender = %sender, "message");
            }
            other => {
                trace!(shard_id = %self.id, frame = ?other, "frame");
            }
        }
    }

    /// Sit out the backoff delay. Returns true if stopped while waiting.
    async fn wait_backoff(
        &self,
        cancel: &CancellationToken,
        backoff: &mut ExponentialBackoff,
    ) -> bool {
        self.set_status(ShardStatus::ReconnectWait);
        self.stats.record_reconnect_wait();
        metrics::record_reconnect_wait(&self.id);

        let delay = backoff.next_delay();
        debug!(
            shard_id = %self.id,
            delay_ms = delay.as_millis() as u64,
            attempt = backoff.attempts(),
            "reconnecting after backoff"
        );
        tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }
}

impl fmt::Debug for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shard")
            .field("id", &self.id)
            .field("seq", &self.seq)
            .field("login", &self.login)
            .field("status", &self.status())
            .field("channels", &self.channel_count())
            .finish()
    }
}
