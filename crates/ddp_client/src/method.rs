//! Method call correlation.
//!
//! Each call gets a fresh id and a pending entry. When the matching
//! `result` arrives the entry is removed and its outcome is delivered on
//! the callbacks lane, so outcomes are observed in result-arrival order.

use crate::client::{new_id, ClientInner};
use crate::completion::{Completion, Resolver};
use crate::error::{DdpError, DdpResult};
use crate::registry::KeyedStore;
use ddp_protocol::{ClientMessage, MethodError};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Callback form of a method outcome.
pub type MethodCallback = Box<dyn FnOnce(DdpResult<Value>) + Send + Sync + 'static>;

/// Undoes an optimistic local change.
pub(crate) type Rollback = Box<dyn FnOnce() + Send + Sync + 'static>;

/// The conventional collection mutation methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionMethod {
    /// `/<collection>/insert`
    Insert,
    /// `/<collection>/update`
    Update,
    /// `/<collection>/remove`
    Remove,
}

impl CollectionMethod {
    /// Method suffix.
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionMethod::Insert => "insert",
            CollectionMethod::Update => "update",
            CollectionMethod::Remove => "remove",
        }
    }

    /// Full method name for `collection`.
    pub fn method_name(&self, collection: &str) -> String {
        format!("/{collection}/{}", self.as_str())
    }
}

/// An in-flight method call.
///
/// Resolves with the result payload (`null` if the server sent none) or
/// the server error.
#[derive(Debug)]
#[must_use = "a method call's outcome is lost unless awaited"]
pub struct MethodCall {
    id: String,
    completion: Completion<Value>,
}

impl MethodCall {
    pub(crate) fn new(id: String, completion: Completion<Value>) -> Self {
        Self { id, completion }
    }

    /// Call id.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for MethodCall {
    type Output = DdpResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.completion).poll(cx)
    }
}

pub(crate) enum Responder {
    Channel(Resolver<Value>),
    Callback(MethodCallback),
    /// A collection write applied before the call was sent. On error the
    /// rollback runs on the inbound lane, in order with document messages.
    Optimistic {
        rollback: Option<Rollback>,
        resolver: Resolver<Value>,
    },
}

impl Responder {
    /// Undoes local state if the call failed. Must run on the inbound lane.
    fn settle_locally(self, outcome: &DdpResult<Value>) -> Self {
        match self {
            Responder::Optimistic { rollback, resolver } => {
                if outcome.is_err() {
                    if let Some(rollback) = rollback {
                        rollback();
                    }
                }
                Responder::Channel(resolver)
            }
            other => other,
        }
    }

    fn complete(self, outcome: DdpResult<Value>) {
        match self {
            Responder::Channel(resolver) | Responder::Optimistic { resolver, .. } => {
                let _ = resolver.send(outcome);
            }
            Responder::Callback(callback) => callback(outcome),
        }
    }
}

pub(crate) struct MethodManager {
    pending: KeyedStore<String, Responder>,
    /// Frames of calls issued while offline, in issue order.
    offline: Mutex<VecDeque<(String, String)>>,
}

impl MethodManager {
    pub(crate) fn new() -> Self {
        Self {
            pending: KeyedStore::new(),
            offline: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn call(
        &self,
        inner: &ClientInner,
        method: &str,
        params: Vec<Value>,
    ) -> DdpResult<MethodCall> {
        let (resolver, completion) = Completion::channel();
        let id = self.invoke(inner, method, params, Responder::Channel(resolver))?;
        Ok(MethodCall::new(id, completion))
    }

    /// Registers a pending call and sends (or queues) its frame.
    pub(crate) fn invoke(
        &self,
        inner: &ClientInner,
        method: &str,
        params: Vec<Value>,
        responder: Responder,
    ) -> DdpResult<String> {
        let id = new_id();
        let frame = ClientMessage::method(method, params, id.clone()).encode()?;
        self.pending.insert(id.clone(), responder);

        if let Err(err) = self.send_or_queue(inner, &id, frame) {
            self.pending.remove(&id);
            return Err(err);
        }
        inner.stats.write().methods_called += 1;
        debug!(method, method_id = %id, "method call issued");
        Ok(id)
    }

    fn send_or_queue(&self, inner: &ClientInner, id: &str, frame: String) -> DdpResult<()> {
        let mut offline = self.offline.lock();
        if inner.is_connected() && offline.is_empty() {
            match inner.send_text(frame.clone()) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() => {
                    debug!(method_id = %id, error = %err, "send failed; queueing call");
                }
                Err(err) => return Err(err),
            }
        }
        if offline.len() >= inner.config.offline_queue_limit {
            warn!(method_id = %id, limit = inner.config.offline_queue_limit, "offline queue full");
            return Err(DdpError::NotConnected);
        }
        offline.push_back((id.to_string(), frame));
        debug!(method_id = %id, queued = offline.len(), "not connected; method call queued");
        Ok(())
    }

    /// Sends calls queued while offline. Called once the session connects.
    pub(crate) fn flush_offline(&self, inner: &ClientInner) {
        let mut offline = self.offline.lock();
        if offline.is_empty() {
            return;
        }
        info!(count = offline.len(), "sending queued method calls");
        while let Some((id, frame)) = offline.pop_front() {
            if !self.pending.contains_key(&id) {
                continue;
            }
            if let Err(err) = inner.send_text(frame.clone()) {
                warn!(method_id = %id, error = %err, "failed to send queued call");
                offline.push_front((id, frame));
                break;
            }
        }
    }

    pub(crate) fn on_result(
        &self,
        inner: &ClientInner,
        id: &str,
        result: Option<Value>,
        error: Option<MethodError>,
    ) {
        let Some(responder) = self.pending.remove(id) else {
            warn!(method_id = %id, "result for unknown method call");
            return;
        };
        let outcome = match error {
            Some(error) => {
                debug!(method_id = %id, error = %error, "method call failed");
                Err(DdpError::Method(error))
            }
            None => Ok(result.unwrap_or(Value::Null)),
        };
        let responder = responder.settle_locally(&outcome);
        inner.lanes.callbacks.dispatch(move || responder.complete(outcome));
    }

    /// Fails every pending and queued call with `error`.
    pub(crate) fn fail_all(&self, inner: &ClientInner, error: &DdpError) {
        self.offline.lock().clear();
        let drained = self.pending.drain();
        if drained.is_empty() {
            return;
        }
        info!(count = drained.len(), error = %error, "failing pending method calls");
        for (_, responder) in drained {
            let outcome = Err(error.clone());
            let Some(this) = inner.this.upgrade() else {
                responder.complete(outcome);
                continue;
            };
            // Rollbacks must not overtake document messages already queued.
            inner.lanes.inbound.dispatch(move || {
                let responder = responder.settle_locally(&outcome);
                this.lanes
                    .callbacks
                    .dispatch(move || responder.complete(outcome));
            });
        }
    }

    /// Issues a call and blocks the current thread until its result.
    pub(crate) fn call_blocking(
        &self,
        inner: &ClientInner,
        method: &str,
        params: Vec<Value>,
        timeout: Duration,
    ) -> DdpResult<Value> {
        if Handle::try_current().is_ok() {
            warn!(
                method,
                "call_blocking invoked from inside the async runtime; prefer awaiting call()"
            );
        }
        let (tx, rx) = mpsc::channel();
        let id = self.invoke(
            inner,
            method,
            params,
            Responder::Callback(Box::new(move |outcome| {
                let _ = tx.send(outcome);
            })),
        )?;
        match rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                self.pending.remove(&id);
                Err(DdpError::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(DdpError::Cancelled),
        }
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn queued_count(&self) -> usize {
        self.offline.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_method_names() {
        assert_eq!(CollectionMethod::Insert.method_name("todos"), "/todos/insert");
        assert_eq!(CollectionMethod::Update.method_name("todos"), "/todos/update");
        assert_eq!(CollectionMethod::Remove.as_str(), "remove");
    }

    #[tokio::test]
    async fn method_call_resolves_from_completion() {
        let (resolver, completion) = Completion::channel();
        let call = MethodCall::new("m1".into(), completion);
        assert_eq!(call.id(), "m1");
        resolver.send(Ok(Value::from(3))).unwrap();
        assert_eq!(call.await, Ok(Value::from(3)));
    }

    #[test]
    fn responder_callback_receives_outcome() {
        let seen = std::sync::Arc::new(Mutex::new(None));
        let sink = std::sync::Arc::clone(&seen);
        let responder = Responder::Callback(Box::new(move |outcome| *sink.lock() = Some(outcome)));
        responder.complete(Err(DdpError::Disconnected));
        assert_eq!(*seen.lock(), Some(Err(DdpError::Disconnected)));
    }
}
