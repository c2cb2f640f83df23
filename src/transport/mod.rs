//! Transport abstraction consumed by [`crate::Connection`].
//!
//! A transport connects in the background: [`Transport::connect`] returns a
//! handle immediately while the socket is still in [`ReadyState::Connecting`],
//! and lifecycle notifications arrive on the event channel.

use tokio::sync::mpsc;

use crate::Result;

pub mod tungstenite;

/// Socket lifecycle state as reported by the transport handle.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Lifecycle and data notifications emitted by a transport.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The socket finished its handshake and is writable.
    Open,
    /// An inbound text frame.
    Message(String),
    /// A transport-level failure. Informational; a `Closed` event follows.
    Error(String),
    /// The socket is gone. `clean` is true only for a deliberate local close
    /// or a proper close handshake.
    Closed { clean: bool },
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Factory for socket connections.
pub trait Transport: Send + Sync + 'static {
    /// Starts connecting to `url`, reporting lifecycle events on `events`.
    /// Returns immediately with a handle to the in-flight connection.
    fn connect(&self, url: &str, events: EventSender) -> Result<Box<dyn TransportHandle>>;
}

/// One live (or in-flight, or finished) socket connection.
pub trait TransportHandle: Send + Sync {
    /// Sends a text frame. Fails when the socket is not open.
    fn send(&self, text: &str) -> Result<()>;

    /// Requests a graceful close. Idempotent.
    fn close(&self);

    /// Current socket state.
    fn ready_state(&self) -> ReadyState;
}
