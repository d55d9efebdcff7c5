//! Shared test support: an in-memory transport with scripted failures and a
//! frame log, plus config and synchronization helpers.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use flock_gateway::{
    AuthError, Connection, CredentialProvider, Credentials, Frame, GatewayConfig, Shard,
    ShardStatus, Transport, TransportError,
};

/// In-memory transport. Every connect yields a fresh [`MockConnection`] that
/// auto-accepts (or auto-rejects) authentication and records sent frames.
#[derive(Default)]
pub struct MockTransport {
    connects: AtomicUsize,
    connect_failures_remaining: AtomicU32,
    reject_auth: AtomicBool,
    connections: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `n` connection attempts fail with a transport error.
    pub fn fail_next_connects(&self, n: u32) {
        self.connect_failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Reject every authentication attempt from now on.
    pub fn reject_auth(&self, reject: bool) {
        self.reject_auth.store(reject, Ordering::SeqCst);
    }

    /// Total successful connects so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.connections.lock().unwrap().clone()
    }

    /// The most recently opened connection.
    pub fn latest(&self) -> Arc<MockConnection> {
        self.connections
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no connection has been opened")
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, login: &str) -> Result<Arc<dyn Connection>, TransportError> {
        let remaining = self.connect_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures_remaining
                .store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::connect_failed("injected failure"));
        }

        self.connects.fetch_add(1, Ordering::SeqCst);
        let conn = Arc::new(MockConnection::new(
            login,
            self.reject_auth.load(Ordering::SeqCst),
        ));
        self.connections.lock().unwrap().push(Arc::clone(&conn));
        Ok(conn)
    }
}

/// One scripted connection.
pub struct MockConnection {
    login: String,
    reject_auth: bool,
    sent: Mutex<Vec<Frame>>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>,
    closed: AtomicBool,
}

impl MockConnection {
    fn new(login: &str, reject_auth: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            login: login.to_string(),
            reject_auth,
            sent: Mutex::new(Vec::new()),
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: tokio::sync::Mutex::new(rx),
            closed: AtomicBool::new(false),
        }
    }

    /// Login the shard connected with.
    pub fn login(&self) -> &str {
        &self.login
    }

    /// Every frame the shard has sent on this connection.
    pub fn sent(&self) -> Vec<Frame> {
        self.sent.lock().unwrap().clone()
    }

    /// Channels of the JOIN frames sent on this connection, in order.
    pub fn sent_joins(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|f| match f {
                Frame::Join { channel } => Some(channel),
                _ => None,
            })
            .collect()
    }

    /// Channels of the PART frames sent on this connection, in order.
    pub fn sent_parts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|f| match f {
                Frame::Part { channel } => Some(channel),
                _ => None,
            })
            .collect()
    }

    /// Inject a frame as if the server sent it.
    pub fn push_inbound(&self, frame: Frame) {
        if let Some(tx) = self.inbound_tx.lock().unwrap().as_ref() {
            let _ = tx.send(frame);
        }
    }

    /// Simulate a server-side disconnect: the shard's `recv` drains anything
    /// pending and then sees end-of-stream.
    pub fn drop_connection(&self) {
        self.inbound_tx.lock().unwrap().take();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let auth = matches!(frame, Frame::Auth { .. });
        self.sent.lock().unwrap().push(frame);

        if auth {
            if self.reject_auth {
                self.push_inbound(Frame::AuthRejected {
                    reason: "invalid token".to_string(),
                });
            } else {
                self.push_inbound(Frame::Welcome);
            }
        }
        Ok(())
    }

    async fn recv(&self) -> Option<Frame> {
        self.inbound_rx.lock().await.recv().await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inbound_tx.lock().unwrap().take();
    }
}

/// Provider that always fails resolution, for setup-failure tests.
pub struct NoTokenProvider;

#[async_trait]
impl CredentialProvider for NoTokenProvider {
    async fn resolve(&self, _channel: Option<&str>) -> Result<Credentials, AuthError> {
        Err(AuthError::NoTokenAvailable { login: None })
    }
}

/// Config with the capacity knobs under test and a short connect timeout.
pub fn test_config(
    channels_per_shard: usize,
    max_shard_count: usize,
    initial_shard_count: usize,
) -> GatewayConfig {
    GatewayConfig {
        channels_per_shard,
        max_shard_count,
        initial_shard_count,
        connect_timeout: Duration::from_secs(5),
    }
}

/// Block (bounded) until a shard reaches `status`.
pub async fn wait_for_status(shard: &Arc<Shard>, status: ShardStatus) {
    let mut rx = shard.watch_status();
    tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| *s == status))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {status:?} on shard {}", shard.id()))
        .expect("status channel closed");
}
