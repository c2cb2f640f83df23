//! The connection controller: socket lifecycle, reconnection, and the
//! operation scheduler/dispatcher.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at, sleep};

use crate::Result;
use crate::config::Settings;
use crate::envelope::{self, Frame};
use crate::error::{NotOpen, UnknownOperation};
use crate::operation::{Firing, Handler, OperationSpec, Registry};
use crate::transport::tungstenite::TungsteniteTransport;
use crate::transport::{ReadyState, Transport, TransportEvent, TransportHandle};

/// Delay between retries of a one-shot send registered before the socket is
/// open, and the number of attempts before giving up.
const ONE_SHOT_RETRY_DELAY: Duration = Duration::from_millis(250);
const ONE_SHOT_RETRY_ATTEMPTS: u32 = 20;

/// Observable connection state. Always derived from the live transport
/// handle, never cached.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket has been created yet.
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

impl From<ReadyState> for ConnectionState {
    fn from(state: ReadyState) -> Self {
        match state {
            ReadyState::Connecting => Self::Connecting,
            ReadyState::Open => Self::Open,
            ReadyState::Closing => Self::Closing,
            ReadyState::Closed => Self::Closed,
        }
    }
}

/// A resilient logical WebSocket connection.
///
/// Owns at most one live socket at a time, re-establishes it on a fixed
/// interval after unclean closures, and multiplexes registered operations
/// over it: their requests are re-sent per firing policy on every (re)open,
/// and inbound frames are routed to their handlers by `method` name.
///
/// Cheap to clone; all clones drive the same underlying connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Creates a connection over the production tungstenite transport. No
    /// socket is opened until the first [`open`](Self::open) or
    /// [`add_operation`](Self::add_operation).
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(settings: &Settings) -> Result<Self> {
        Self::with_transport(settings, TungsteniteTransport)
    }

    /// Creates a connection over a custom transport.
    pub fn with_transport<T: Transport>(settings: &Settings, transport: T) -> Result<Self> {
        let endpoint = settings.endpoint()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new_cyclic(|weak| Inner {
            weak: Weak::clone(weak),
            endpoint,
            default_interval: settings.default_interval(),
            transport: Box::new(transport),
            operations: Registry::new(),
            adapter: Mutex::new(None),
            generation: AtomicU64::new(0),
            reconnect: Mutex::new(None),
            events_tx,
        });

        tokio::spawn(pump(Arc::downgrade(&inner), events_rx));

        Ok(Self { inner })
    }

    /// Ensures a socket exists. Creates one only when none exists yet or the
    /// existing one reports closed; otherwise this is a no-op, so concurrent
    /// calls never race a second socket into existence.
    pub fn open(&self) -> Result<()> {
        self.inner.open()
    }

    /// Closes the current socket deliberately, cancelling any pending
    /// reconnect. No-op when no socket exists or it is already closing or
    /// closed. Never fails.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Registers an operation and opens the connection if necessary.
    ///
    /// Re-registering an existing method merges: the new request and firing
    /// policy replace the old ones, the new handlers append after the old
    /// ones. If the socket is already open the operation is armed
    /// immediately; otherwise it is armed on the next open.
    pub fn add_operation(&self, spec: OperationSpec) -> Result<()> {
        self.inner.add_operation(spec)
    }

    /// Unregisters an operation, cancelling its timer. Unknown methods are a
    /// no-op.
    pub fn remove_operation(&self, method: &str) {
        self.inner.operations.remove(method);
    }

    /// Removes one previously registered handler by identity. The operation
    /// itself stays registered and keeps firing.
    pub fn remove_handler(&self, method: &str, handler: &Handler) {
        self.inner.operations.remove_handler(method, handler);
    }

    /// Fires an operation's request right now, regardless of firing policy.
    ///
    /// # Errors
    ///
    /// [`UnknownOperation`] when the method was never registered, [`NotOpen`]
    /// when the socket is not open.
    pub fn send_now(&self, method: &str) -> Result<()> {
        self.inner.send_now(method)
    }

    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.inner.operations.len()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .field("operations", &self.inner.operations.len())
            .finish_non_exhaustive()
    }
}

struct Inner {
    /// Self-reference handed to spawned tasks so they never keep the
    /// connection alive on their own.
    weak: Weak<Inner>,
    endpoint: String,
    default_interval: Duration,
    transport: Box<dyn Transport>,
    operations: Registry,
    /// The single live transport handle, if any.
    adapter: Mutex<Option<Box<dyn TransportHandle>>>,
    /// Bumped for every socket created; arming is once per generation.
    generation: AtomicU64,
    /// The reconnect loop task, present only while armed.
    reconnect: Mutex<Option<JoinHandle<()>>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self
            .reconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.operations.disarm_all();
    }
}

impl Inner {
    fn open(&self) -> Result<()> {
        let mut adapter = self.adapter.lock().unwrap_or_else(PoisonError::into_inner);

        let reusable = adapter
            .as_ref()
            .is_some_and(|handle| handle.ready_state() != ReadyState::Closed);
        if !reusable {
            self.generation.fetch_add(1, Ordering::SeqCst);
            *adapter = Some(
                self.transport
                    .connect(&self.endpoint, self.events_tx.clone())?,
            );
        }

        Ok(())
    }

    fn close(&self) {
        let adapter = self.adapter.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(handle) = adapter.as_ref() {
            let state = handle.ready_state();
            if state != ReadyState::Closed && state != ReadyState::Closing {
                handle.close();
                self.cancel_reconnect();
            }
        }
    }

    fn state(&self) -> ConnectionState {
        self.adapter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(ConnectionState::Idle, |handle| {
                handle.ready_state().into()
            })
    }

    fn add_operation(&self, spec: OperationSpec) -> Result<()> {
        let method = spec.method().to_owned();
        self.operations.add(spec);
        self.open()?;

        if self.state().is_open() {
            self.arm(&method);
        }

        Ok(())
    }

    fn send_now(&self, method: &str) -> Result<()> {
        if !self.operations.contains(method) {
            return Err(UnknownOperation {
                method: method.to_owned(),
            }
            .into());
        }

        if self.try_send(method) {
            Ok(())
        } else {
            Err(NotOpen.into())
        }
    }

    /// Fires one request if the socket is open right now. Returns whether the
    /// frame was handed to the transport.
    ///
    /// The request closure runs without any lock held; it is user code.
    fn try_send(&self, method: &str) -> bool {
        {
            let adapter = self.adapter.lock().unwrap_or_else(PoisonError::into_inner);
            if !adapter
                .as_ref()
                .is_some_and(|handle| handle.ready_state() == ReadyState::Open)
            {
                return false;
            }
        }

        let Some(request) = self.operations.request(method) else {
            return false;
        };
        let text = envelope::encode(method, request());

        let adapter = self.adapter.lock().unwrap_or_else(PoisonError::into_inner);
        adapter
            .as_ref()
            .is_some_and(|handle| handle.send(&text).is_ok())
    }

    fn on_open(&self) {
        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.endpoint, "socket open");

        self.cancel_reconnect();
        for method in self.operations.methods() {
            self.arm(&method);
        }
    }

    fn on_close(&self, clean: bool) {
        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.endpoint, clean, "socket closed");

        self.operations.disarm_all();
        if !clean {
            self.arm_reconnect();
        }
    }

    fn on_error(&self, info: &str) {
        #[cfg(feature = "tracing")]
        tracing::warn!(endpoint = %self.endpoint, error = %info, "transport error");
        #[cfg(not(feature = "tracing"))]
        let _ = info;

        // Funnel errors into the unclean-close path.
        self.close();
    }

    fn dispatch(&self, text: &str) {
        match envelope::decode(text) {
            Frame::Valid { method, payload } => match self.operations.handlers(&method) {
                Some(handlers) => {
                    for handler in handlers {
                        handler(&payload);
                    }
                }
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(%method, "dropping frame for unknown method");
                }
            },
            Frame::Invalid => {
                #[cfg(feature = "tracing")]
                tracing::debug!(%text, "dropping malformed frame");
                #[cfg(not(feature = "tracing"))]
                let _ = text;
            }
        }
    }

    /// Starts the reconnect loop, replacing (and aborting) any previous one.
    /// The loop retries on a fixed interval until cancelled by a successful
    /// open or a deliberate close.
    fn arm_reconnect(&self) {
        let weak = Weak::clone(&self.weak);
        let period = self.default_interval;

        let task = tokio::spawn(async move {
            loop {
                sleep(period).await;
                let Some(inner) = weak.upgrade() else { break };
                if let Err(e) = inner.open() {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %e, "reconnect attempt failed");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                }
            }
        });

        let mut reconnect = self
            .reconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = reconnect.replace(task) {
            previous.abort();
        }
    }

    fn cancel_reconnect(&self) {
        if let Some(task) = self
            .reconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }

    /// Arms one operation on a freshly opened socket (or on registration
    /// while open), replacing any stale timer first.
    ///
    /// Arming is once per socket: when a registration races the open
    /// notification, whichever path arms first wins and the other is a
    /// no-op, so the immediate fire cannot be sent twice.
    fn arm(&self, method: &str) {
        let generation = self.generation.load(Ordering::SeqCst);
        if !self.operations.mark_armed(method, generation) {
            return;
        }
        self.operations.clear_timer(method);

        match self.operations.firing(method) {
            None | Some(Firing::Manual) => {}
            Some(Firing::Once) => self.arm_once(method),
            Some(Firing::EveryDefault) => self.arm_interval(method, self.default_interval),
            Some(Firing::Every(period)) => self.arm_interval(method, period),
        }
    }

    /// Fires immediately, then on every period boundary. Each tick re-checks
    /// that the operation still exists and the socket is still open.
    fn arm_interval(&self, method: &str, period: Duration) {
        let delivered = self.try_send(method);
        #[cfg(feature = "tracing")]
        if !delivered {
            tracing::trace!(%method, "initial fire skipped, socket not writable");
        }
        #[cfg(not(feature = "tracing"))]
        let _ = delivered;

        let weak = Weak::clone(&self.weak);
        let method = method.to_owned();
        let task = tokio::spawn({
            let method = method.clone();
            async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                loop {
                    ticker.tick().await;
                    let Some(inner) = weak.upgrade() else { break };
                    if !inner.operations.contains(&method) {
                        break;
                    }
                    inner.try_send(&method);
                }
            }
        });

        self.operations.set_timer(&method, task);
    }

    /// Fires once; if the socket is not open yet, retries on a short delay
    /// for a bounded window, occupying the timer slot so close or removal
    /// cancels the retry.
    fn arm_once(&self, method: &str) {
        if self.try_send(method) {
            return;
        }

        let weak = Weak::clone(&self.weak);
        let method = method.to_owned();
        let task = tokio::spawn({
            let method = method.clone();
            async move {
                for _ in 0..ONE_SHOT_RETRY_ATTEMPTS {
                    sleep(ONE_SHOT_RETRY_DELAY).await;
                    let Some(inner) = weak.upgrade() else { return };
                    if !inner.operations.contains(&method) {
                        return;
                    }
                    if inner.try_send(&method) {
                        inner.operations.clear_timer(&method);
                        return;
                    }
                }

                if let Some(inner) = weak.upgrade() {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%method, "giving up on one-shot send, socket never opened");
                    inner.operations.clear_timer(&method);
                }
            }
        });

        self.operations.set_timer(&method, task);
    }
}

/// Routes transport events to the lifecycle handlers. Holds only a weak
/// reference so an abandoned connection can be dropped.
async fn pump(weak: Weak<Inner>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = weak.upgrade() else { break };
        match event {
            TransportEvent::Open => inner.on_open(),
            TransportEvent::Message(text) => inner.dispatch(&text),
            TransportEvent::Error(info) => inner.on_error(&info),
            TransportEvent::Closed { clean } => inner.on_close(clean),
        }
    }
}
