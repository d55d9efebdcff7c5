//! Transport seam.
//!
//! Wire-protocol framing and parsing live outside the gateway. A [`Transport`]
//! opens one persistent connection per shard identity, and a [`Connection`]
//! exchanges already-framed [`Frame`] values. `recv` yields `None` exactly
//! once, at disconnect, which is the shard's cue to enter its reconnect path.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// One framed unit on a gateway connection.
///
/// Payload decoding beyond this shape is out of scope; the shard only
/// inspects the variants it needs for its own lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Outbound sign-in. First frame on every fresh connection.
    Auth { login: String, token: String },
    /// Outbound channel membership request.
    Join { channel: String },
    /// Outbound channel membership withdrawal.
    Part { channel: String },
    /// Outbound chat line.
    Privmsg { channel: String, text: String },
    /// Keepalive probe (inbound from the server).
    Ping,
    /// Keepalive reply (outbound).
    Pong,
    /// Inbound: authentication accepted, the connection is usable.
    Welcome,
    /// Inbound: authentication rejected. Terminal for the shard.
    AuthRejected { reason: String },
    /// Inbound chat line. Dispatch to the application is external;
    /// the shard only counts and traces these.
    Message {
        channel: String,
        sender: String,
        text: String,
    },
}

/// Transport-level failure.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// The connection could not be opened.
    #[error("connect failed: {reason}")]
    ConnectFailed { reason: String },

    /// The connection attempt exceeded its deadline.
    #[error("connect timed out")]
    ConnectTimeout,

    /// The connection is closed; no further frames can be exchanged.
    #[error("connection closed")]
    Closed,
}

impl TransportError {
    pub fn connect_failed(reason: impl Into<String>) -> Self {
        Self::ConnectFailed {
            reason: reason.into(),
        }
    }
}

/// An established connection, authenticated as one identity.
///
/// Implementations guard their halves internally so a shard can send from
/// API calls while its run loop receives.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send one frame.
    async fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Receive the next frame. Returns `None` once the connection is closed;
    /// after that every call returns `None`.
    async fn recv(&self) -> Option<Frame>;

    /// Close the connection. Idempotent.
    async fn close(&self);
}

/// Opens connections for shard identities.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a persistent connection for `login`.
    async fn connect(&self, login: &str) -> Result<Arc<dyn Connection>, TransportError>;
}
