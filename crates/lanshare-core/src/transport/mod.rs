//! Transport capability: a point-to-point byte channel.
//!
//! A [`Transport`] represents one logical connection.  It is created for a
//! single transfer, driven through its state machine, and dropped when it
//! reaches a terminal state.  It is never reused.
//!
//! # State machine
//!
//! ```text
//! Idle ──► Connecting ──► [TlsHandshaking] ──► Connected ──► Closing ──► Closed
//!              │                 │                  │
//!              └─────────────────┴──────────────────┴──────► Error
//! ```
//!
//! `TlsHandshaking` is entered only when TLS is configured.  `Closed` and
//! `Error` are terminal.  `abort()` jumps to `Closed` from any state.
//!
//! # Events, not return values
//!
//! `start`, `write`, `close`, and `abort` never block and never fail.
//! Progress, received bytes, and failures are delivered as
//! [`TransportEvent`]s through [`Transport::next_event`], in the order they
//! happened.  No event is delivered after a terminal state is reached, and no
//! data is delivered before `Connected`.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use thiserror::Error;

/// Which side of the connection a transport plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opens the connection.
    Initiator,
    /// Was handed an already-accepted connection.
    Acceptor,
}

/// Transport lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Connecting,
    TlsHandshaking,
    Connected,
    Closing,
    Closed,
    Error,
}

impl TransportState {
    /// `Closed` and `Error` are final.
    pub fn is_terminal(self) -> bool {
        matches!(self, TransportState::Closed | TransportState::Error)
    }

    /// Returns the state after `event`, or `None` if the event must not be
    /// delivered in the current state.
    pub fn after(self, event: &TransportEvent) -> Option<TransportState> {
        use TransportState::*;

        if self.is_terminal() {
            return None;
        }
        match event {
            TransportEvent::StateChanged(next) => {
                let allowed = matches!(
                    (self, next),
                    (Idle, Connecting)
                        | (Connecting, TlsHandshaking)
                        | (Connecting, Connected)
                        | (TlsHandshaking, Connected)
                        | (Connected, Closing)
                );
                allowed.then_some(*next)
            }
            TransportEvent::Data(_) => (self == Connected).then_some(Connected),
            TransportEvent::Error(_) => matches!(self, Connecting | TlsHandshaking | Connected | Closing)
                .then_some(Error),
            TransportEvent::Closed => Some(Closed),
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::Idle => "idle",
            TransportState::Connecting => "connecting",
            TransportState::TlsHandshaking => "tls-handshaking",
            TransportState::Connected => "connected",
            TransportState::Closing => "closing",
            TransportState::Closed => "closed",
            TransportState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Failures reported through [`TransportEvent::Error`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Name resolution or TCP connect failed.
    #[error("failed to connect to {peer}: {reason}")]
    Connect { peer: String, reason: String },

    /// TLS setup, handshake, or certificate verification failed.
    #[error("TLS failure: {0}")]
    Tls(String),

    /// The socket failed after the channel was established.
    #[error("I/O error: {0}")]
    Io(String),

    /// Reserved for layers above the transport.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

/// Something that happened on a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A non-terminal state was entered.
    StateChanged(TransportState),
    /// Bytes arrived.  No framing is implied.
    Data(Vec<u8>),
    /// The transport failed and is now in [`TransportState::Error`].
    Error(TransportError),
    /// The transport closed and is now in [`TransportState::Closed`].
    Closed,
}

/// Remote endpoint of an outbound transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    pub address: IpAddr,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self { address, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.socket_addr().fmt(f)
    }
}

/// A point-to-point byte channel.
#[async_trait]
pub trait Transport: Send {
    fn role(&self) -> Role;

    /// The owner-visible state, updated as events are consumed.
    fn state(&self) -> TransportState;

    /// Begins connecting (initiator) or adopting the accepted socket (acceptor).
    fn start(&mut self);

    /// Queues `data` for sending.  Bytes written before the channel is
    /// connected are held and sent in order once it is.
    fn write(&mut self, data: &[u8]);

    /// Sends everything queued, then closes the channel.
    fn close(&mut self);

    /// Closes immediately, discarding unsent bytes.  Idempotent.
    fn abort(&mut self);

    /// Waits for the next event.  Returns `None` once the transport is in a
    /// terminal state and every event up to it has been delivered.
    async fn next_event(&mut self) -> Option<TransportEvent>;
}

/// The payload of a `transport/<name>` capability.
pub trait TransportFactory: Send + Sync {
    /// Creates an idle initiator transport for `peer`.
    fn connect(&self, peer: PeerAddress) -> Box<dyn Transport>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
