//! Operation registration and the method-keyed registry.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, Entry};
use serde_json::Value;
use tokio::task::JoinHandle;

/// Produces the outgoing payload for an operation. Invoked fresh on every
/// fire, never memoized.
pub type Request = Arc<dyn Fn() -> Value + Send + Sync>;

/// Reacts to an inbound payload routed by method name.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// When an operation's request is sent automatically.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Firing {
    /// Never automatic; fired only through `Connection::send_now`.
    Manual,
    /// Once, immediately after each socket open.
    Once,
    /// On open and then every connection default interval.
    EveryDefault,
    /// On open and then every given period.
    Every(Duration),
}

/// A registration request for one named operation.
pub struct OperationSpec {
    method: String,
    request: Request,
    handlers: Vec<Handler>,
    firing: Firing,
}

impl OperationSpec {
    /// Creates a spec for `method` with the given request builder. Fires
    /// [`Firing::Once`] by default.
    pub fn new<M, F>(method: M, request: F) -> Self
    where
        M: Into<String>,
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self {
            method: method.into(),
            request: Arc::new(request),
            handlers: Vec::new(),
            firing: Firing::Once,
        }
    }

    #[must_use]
    pub fn firing(mut self, firing: Firing) -> Self {
        self.firing = firing;
        self
    }

    /// Appends an inbound handler. Handlers run in registration order.
    #[must_use]
    pub fn handler<F>(self, handler: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.shared_handler(Arc::new(handler))
    }

    /// Appends an already-shared handler, keeping its identity for later
    /// removal via `Connection::remove_handler`.
    #[must_use]
    pub fn shared_handler(mut self, handler: Handler) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl fmt::Debug for OperationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationSpec")
            .field("method", &self.method)
            .field("handlers", &self.handlers.len())
            .field("firing", &self.firing)
            .finish_non_exhaustive()
    }
}

/// Registry record. The timer slot is occupied only while a repeating or
/// retrying send task is live.
pub(crate) struct Operation {
    request: Request,
    handlers: Vec<Handler>,
    firing: Firing,
    timer: Option<JoinHandle<()>>,
    /// Socket generation this operation was last armed for. Arming is
    /// once-per-generation so a registration racing the open notification
    /// cannot fire twice on the same socket.
    armed_generation: Option<u64>,
}

impl Drop for Operation {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Method-keyed operation registry.
pub(crate) struct Registry {
    operations: DashMap<String, Operation>,
}

fn same_handler(a: &Handler, b: &Handler) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            operations: DashMap::new(),
        }
    }

    /// Inserts the spec, merging with any existing entry under the same
    /// method: handlers append, request and firing take the new values.
    pub(crate) fn add(&self, spec: OperationSpec) {
        match self.operations.entry(spec.method) {
            Entry::Occupied(mut occupied) => {
                let operation = occupied.get_mut();
                operation.request = spec.request;
                operation.firing = spec.firing;
                operation.handlers.extend(spec.handlers);
                // A re-registration is eligible for arming again.
                operation.armed_generation = None;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Operation {
                    request: spec.request,
                    handlers: spec.handlers,
                    firing: spec.firing,
                    timer: None,
                    armed_generation: None,
                });
            }
        }
    }

    /// Removes the operation, cancelling its timer. Unknown methods are a
    /// no-op.
    pub(crate) fn remove(&self, method: &str) {
        if let Some((_, mut operation)) = self.operations.remove(method) {
            if let Some(timer) = operation.timer.take() {
                timer.abort();
            }
        }
    }

    /// Removes the first handler with the same identity. The operation stays
    /// registered even with no handlers left.
    pub(crate) fn remove_handler(&self, method: &str, handler: &Handler) {
        if let Some(mut operation) = self.operations.get_mut(method) {
            if let Some(position) = operation
                .handlers
                .iter()
                .position(|h| same_handler(h, handler))
            {
                operation.handlers.remove(position);
            }
        }
    }

    pub(crate) fn contains(&self, method: &str) -> bool {
        self.operations.contains_key(method)
    }

    pub(crate) fn request(&self, method: &str) -> Option<Request> {
        self.operations
            .get(method)
            .map(|operation| Arc::clone(&operation.request))
    }

    pub(crate) fn firing(&self, method: &str) -> Option<Firing> {
        self.operations.get(method).map(|operation| operation.firing)
    }

    pub(crate) fn handlers(&self, method: &str) -> Option<Vec<Handler>> {
        self.operations
            .get(method)
            .map(|operation| operation.handlers.iter().map(Arc::clone).collect())
    }

    /// Marks the operation as armed for the given socket generation.
    /// Returns false when it was already armed for that generation (or was
    /// removed), making a second arm for the same socket a no-op.
    pub(crate) fn mark_armed(&self, method: &str, generation: u64) -> bool {
        match self.operations.get_mut(method) {
            Some(mut operation) => {
                if operation.armed_generation == Some(generation) {
                    false
                } else {
                    operation.armed_generation = Some(generation);
                    true
                }
            }
            None => false,
        }
    }

    /// Replaces the operation's timer, aborting any previous one. A task
    /// that already finished (or whose operation was removed) is not stored;
    /// the slot only ever holds a live timer.
    pub(crate) fn set_timer(&self, method: &str, timer: JoinHandle<()>) {
        match self.operations.get_mut(method) {
            Some(mut operation) => {
                let previous = if timer.is_finished() {
                    operation.timer.take()
                } else {
                    operation.timer.replace(timer)
                };
                if let Some(previous) = previous {
                    previous.abort();
                }
            }
            None => timer.abort(),
        }
    }

    /// Takes and aborts the operation's timer if present. Safe to call from
    /// the timer task itself as long as it does not await afterwards.
    pub(crate) fn clear_timer(&self, method: &str) {
        if let Some(mut operation) = self.operations.get_mut(method) {
            if let Some(timer) = operation.timer.take() {
                timer.abort();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn has_timer(&self, method: &str) -> bool {
        self.operations
            .get(method)
            .is_some_and(|operation| operation.timer.is_some())
    }

    /// Aborts and clears every live timer.
    pub(crate) fn disarm_all(&self) {
        for mut entry in self.operations.iter_mut() {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
        }
    }

    pub(crate) fn methods(&self) -> Vec<String> {
        self.operations
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.operations.len()
    }
}
