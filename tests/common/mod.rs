//! Scripted in-process transport for lifecycle and scheduler tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use ws_operations::Result;
use ws_operations::transport::{
    EventSender, ReadyState, Transport, TransportEvent, TransportHandle,
};

/// A transport whose lifecycle is driven by the test instead of a network.
///
/// Each `connect` records the attempt and hands the test a fresh link; the
/// helpers below then script the socket through its states and feed it
/// inbound frames.
#[derive(Clone, Default)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    connects: AtomicUsize,
    sent: Mutex<Vec<String>>,
    link: Mutex<Option<Link>>,
}

/// The test's side of the most recent connection.
struct Link {
    state: watch::Sender<ReadyState>,
    events: EventSender,
}

impl Transport for MockTransport {
    fn connect(&self, _url: &str, events: EventSender) -> Result<Box<dyn TransportHandle>> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);

        let (state_tx, state_rx) = watch::channel(ReadyState::Connecting);
        *self.shared.link.lock().unwrap() = Some(Link {
            state: state_tx,
            events,
        });

        Ok(Box::new(MockHandle {
            shared: Arc::clone(&self.shared),
            state: state_rx,
        }))
    }
}

struct MockHandle {
    shared: Arc<Shared>,
    state: watch::Receiver<ReadyState>,
}

impl TransportHandle for MockHandle {
    fn send(&self, text: &str) -> Result<()> {
        self.shared.sent.lock().unwrap().push(text.to_owned());
        Ok(())
    }

    fn close(&self) {
        if let Some(link) = self.shared.link.lock().unwrap().as_ref() {
            drop(link.state.send(ReadyState::Closed));
            drop(link.events.send(TransportEvent::Closed { clean: true }));
        }
    }

    fn ready_state(&self) -> ReadyState {
        *self.state.borrow()
    }
}

impl MockTransport {
    /// Number of `connect` calls so far.
    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Every frame sent on any connection, in order.
    pub fn sent(&self) -> Vec<String> {
        self.shared.sent.lock().unwrap().clone()
    }

    /// Completes the handshake of the current connection.
    pub fn open(&self) {
        self.set_state(ReadyState::Open);
        self.emit(TransportEvent::Open);
    }

    /// Closes the current connection as a proper close handshake.
    pub fn close_clean(&self) {
        self.set_state(ReadyState::Closed);
        self.emit(TransportEvent::Closed { clean: true });
    }

    /// Kills the current connection without a handshake.
    pub fn drop_unclean(&self) {
        self.set_state(ReadyState::Closed);
        self.emit(TransportEvent::Closed { clean: false });
    }

    /// Delivers an inbound text frame on the current connection.
    pub fn deliver(&self, text: &str) {
        self.emit(TransportEvent::Message(text.to_owned()));
    }

    /// Emits the open notification without flipping the state, for tests
    /// exercising sends against a not-yet-writable socket.
    pub fn announce_open(&self) {
        self.emit(TransportEvent::Open);
    }

    /// Sets the current connection's reported state.
    pub fn set_state(&self, state: ReadyState) {
        if let Some(link) = self.shared.link.lock().unwrap().as_ref() {
            drop(link.state.send(state));
        }
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(link) = self.shared.link.lock().unwrap().as_ref() {
            drop(link.events.send(event));
        }
    }
}
