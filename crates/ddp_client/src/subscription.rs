//! Subscription lifecycle.
//!
//! Two tables are kept. Requests are keyed by publication name and hold
//! the id currently active for that name plus the exact `sub` frame that
//! was built for it, so a restored connection replays byte-identical
//! parameters. Holders are keyed by subscription id and carry the ready
//! outcome, unsubscribe waiters and the data-event callback.
//!
//! Every change to the request table and every outbound `sub`/`unsub`
//! frame goes through the subscriptions lane, so per-name frame order is
//! program order. `ready` and `nosub` are handled on the inbound lane.

use crate::client::{new_id, ClientInner};
use crate::completion::{Completion, Resolver};
use crate::error::{DdpError, DdpResult};
use crate::registry::KeyedStore;
use crate::state::ClientEvent;
use ddp_ejson::Fields;
use ddp_protocol::{ClientMessage, MethodError, ServerMessage};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Sent (or waiting to be sent); no `ready` yet.
    Pending,
    /// The server signalled `ready`.
    Ready,
    /// An `unsub` was sent; waiting for `nosub`.
    Unsubscribing,
    /// Not known to the client.
    Removed,
}

/// A document mutation received for a subscribed collection.
#[derive(Debug, Clone, PartialEq)]
pub enum DataEvent {
    /// A document entered the client's view.
    Added {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
        /// Document fields.
        fields: Fields,
    },
    /// Fields of a document changed.
    Changed {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
        /// Fields set to new values.
        fields: Fields,
        /// Fields removed.
        cleared: Vec<String>,
    },
    /// A document left the client's view.
    Removed {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
    },
}

impl DataEvent {
    /// Collection the event belongs to.
    pub fn collection(&self) -> &str {
        match self {
            DataEvent::Added { collection, .. }
            | DataEvent::Changed { collection, .. }
            | DataEvent::Removed { collection, .. } => collection,
        }
    }

    /// Document id.
    pub fn id(&self) -> &str {
        match self {
            DataEvent::Added { id, .. }
            | DataEvent::Changed { id, .. }
            | DataEvent::Removed { id, .. } => id,
        }
    }

    pub(crate) fn from_message(message: ServerMessage) -> Option<Self> {
        match message {
            ServerMessage::Added {
                collection,
                id,
                fields,
            } => Some(DataEvent::Added {
                collection,
                id,
                fields,
            }),
            ServerMessage::Changed {
                collection,
                id,
                fields,
                cleared,
            } => Some(DataEvent::Changed {
                collection,
                id,
                fields,
                cleared,
            }),
            ServerMessage::Removed { collection, id } => {
                Some(DataEvent::Removed { collection, id })
            }
            _ => None,
        }
    }
}

/// Callback for [`DataEvent`]s, run on the notification lane.
pub type DataCallback = Arc<dyn Fn(&DataEvent) + Send + Sync>;

/// Optional settings for a subscription.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    collection: Option<String>,
    on_data: Option<DataCallback>,
}

impl SubscribeOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the subscription to a collection. Its data events are
    /// filtered to that collection and the collection store is created.
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    /// Registers a callback for document events.
    pub fn on_data(mut self, f: impl Fn(&DataEvent) + Send + Sync + 'static) -> Self {
        self.on_data = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("collection", &self.collection)
            .field("on_data", &self.on_data.is_some())
            .finish()
    }
}

/// Handle returned by a subscribe call.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    name: String,
    ready: Completion<()>,
}

impl Subscription {
    /// Subscription id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Publication name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolves with `Ok(())` on `ready`, the server error on a failed
    /// `nosub`, or [`DdpError::Cancelled`] if the subscription ends first.
    pub fn ready(self) -> Completion<()> {
        self.ready
    }
}

struct SubscriptionRequest {
    id: String,
    frame: String,
    /// Connection serial the frame was last sent on.
    sent_on: Option<u64>,
    seq: u64,
}

struct Holder {
    name: String,
    collection: Option<String>,
    state: SubscriptionState,
    ready: Option<Resolver<()>>,
    unsub_waiters: Vec<Resolver<()>>,
    on_data: Option<DataCallback>,
}

pub(crate) struct SubscriptionManager {
    requests: KeyedStore<String, SubscriptionRequest>,
    holders: KeyedStore<String, Holder>,
    seq: AtomicU64,
}

impl SubscriptionManager {
    pub(crate) fn new() -> Self {
        Self {
            requests: KeyedStore::new(),
            holders: KeyedStore::new(),
            seq: AtomicU64::new(0),
        }
    }

    pub(crate) fn subscribe(
        &self,
        inner: &ClientInner,
        name: &str,
        params: Vec<Value>,
        options: SubscribeOptions,
    ) -> DdpResult<Subscription> {
        let id = new_id();
        let frame = ClientMessage::sub(id.clone(), name, Some(params)).encode()?;
        let (resolver, ready) = Completion::channel();

        if let Some(collection) = &options.collection {
            inner.collection(collection);
        }
        self.holders.insert(
            id.clone(),
            Holder {
                name: name.to_string(),
                collection: options.collection,
                state: SubscriptionState::Pending,
                ready: Some(resolver),
                unsub_waiters: Vec::new(),
                on_data: options.on_data,
            },
        );
        debug!(sub_id = %id, name, "subscribe queued");

        let request = SubscriptionRequest {
            id: id.clone(),
            frame,
            sent_on: None,
            seq: 0,
        };
        let job_name = name.to_string();
        inner.on_subscription_lane(move |inner| inner.subs.register(inner, job_name, request));

        Ok(Subscription {
            id,
            name: name.to_string(),
            ready,
        })
    }

    /// Records a request and sends it. Runs on the subscriptions lane.
    fn register(&self, inner: &ClientInner, name: String, mut request: SubscriptionRequest) {
        let id = request.id.clone();
        request.seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let previous = self
            .requests
            .insert(name.clone(), request)
            .map(|r| r.id);

        if !inner.is_connected() {
            debug!(sub_id = %id, name = %name, "not connected; subscription sent on connect");
            if let Some(previous) = previous {
                self.drop_holder(&previous);
            }
            return;
        }

        self.send_request(inner, &name);
        if let Some(previous) = previous {
            // The superseded id is only unsubscribed after the new sub is out,
            // so the server removes just the documents that left scope.
            debug!(sub_id = %previous, name = %name, "unsubscribing superseded subscription");
            self.begin_unsubscribe(inner, &previous, None);
        }
    }

    /// Re-sends the stored frame for `name` verbatim, as long as `id` is
    /// still the active subscription for it.
    fn replay(&self, inner: &ClientInner, name: &str, id: &str) {
        if self.requests.with(name, |r| r.id == id).unwrap_or(false) {
            self.send_request(inner, name);
        } else {
            trace!(sub_id = %id, name, "replay skipped; subscription superseded");
        }
    }

    fn send_request(&self, inner: &ClientInner, name: &str) {
        let Some((id, frame)) = self.requests.with(name, |r| (r.id.clone(), r.frame.clone()))
        else {
            return;
        };
        match inner.send_text(frame) {
            Ok(()) => {
                let serial = inner.connection_serial();
                self.requests.with_mut(name, |r| r.sent_on = Some(serial));
                debug!(sub_id = %id, name, "subscription sent");
            }
            Err(err) => {
                warn!(sub_id = %id, name, error = %err, "failed to send subscription; retrying on connect");
            }
        }
    }

    /// Replays requests after a handshake. Called on the inbound lane.
    pub(crate) fn on_connected(&self, inner: &ClientInner) {
        let resubscribe = inner.config.auto_resubscribe;
        inner.on_subscription_lane(move |inner| {
            let subs = &inner.subs;
            let serial = inner.connection_serial();
            // Requests already sent on this connection are skipped; ones the
            // server never saw go out even without auto-resubscribe.
            let mut replay = subs.requests.collect(|name, r| match r.sent_on {
                Some(on) if on == serial => None,
                Some(_) if !resubscribe => None,
                _ => Some((r.seq, name.clone(), r.id.clone())),
            });
            replay.sort();
            if !replay.is_empty() {
                info!(count = replay.len(), "sending subscriptions");
            }
            for (_, name, id) in replay {
                subs.replay(inner, &name, &id);
            }

            // Unsubscribes that were in flight when the connection dropped.
            for id in subs
                .holders
                .keys_where(|_, h| h.state == SubscriptionState::Unsubscribing)
            {
                subs.send_unsub(inner, &id);
            }
        });
    }

    pub(crate) fn on_ready(&self, ids: &[String]) {
        for id in ids {
            let resolver = self.holders.with_mut(id, |h| {
                if h.state == SubscriptionState::Pending {
                    h.state = SubscriptionState::Ready;
                }
                h.ready.take()
            });
            match resolver {
                Some(Some(resolver)) => {
                    debug!(sub_id = %id, "subscription ready");
                    let _ = resolver.send(Ok(()));
                }
                Some(None) => trace!(sub_id = %id, "repeated ready ignored"),
                None => debug!(sub_id = %id, "ready for unknown subscription"),
            }
        }
    }

    pub(crate) fn on_nosub(&self, inner: &ClientInner, id: &str, error: Option<MethodError>) {
        if let Some(error) = error {
            warn!(sub_id = %id, error = %error, "subscription refused by server");
            inner.emit(ClientEvent::SubscriptionError {
                id: id.to_string(),
                error: error.clone(),
            });
            if let Some(Some(resolver)) = self.holders.with_mut(id, |h| h.ready.take()) {
                let _ = resolver.send(Err(DdpError::Method(error)));
            }
            return;
        }

        if self.holders.contains_key(id) {
            info!(sub_id = %id, "subscription stopped");
            self.drop_holder(id);
        } else {
            debug!(sub_id = %id, "nosub for unknown subscription");
        }
    }

    /// Removes a holder and, if it is still the active id for its name,
    /// the request. Unsubscribe waiters complete; a pending ready is dropped.
    fn drop_holder(&self, id: &str) {
        let Some(holder) = self.holders.remove(id) else {
            return;
        };
        self.requests.remove_if(&holder.name, |r| r.id == id);
        for waiter in holder.unsub_waiters {
            let _ = waiter.send(Ok(()));
        }
    }

    /// Starts an unsubscribe. Runs on the subscriptions lane.
    fn begin_unsubscribe(&self, inner: &ClientInner, id: &str, waiter: Option<Resolver<()>>) {
        let Some(name) = self.holders.with(id, |h| h.name.clone()) else {
            trace!(sub_id = %id, "unsubscribe of unknown subscription");
            if let Some(waiter) = waiter {
                let _ = waiter.send(Ok(()));
            }
            return;
        };
        // Never replay a subscription the caller asked to stop.
        self.requests.remove_if(&name, |r| r.id == id);

        if !inner.is_connected() {
            debug!(sub_id = %id, "unsubscribed locally while offline");
            if let Some(waiter) = waiter {
                let _ = waiter.send(Ok(()));
            }
            self.drop_holder(id);
            return;
        }

        let first = self
            .holders
            .with_mut(id, |h| {
                let first = h.state != SubscriptionState::Unsubscribing;
                h.state = SubscriptionState::Unsubscribing;
                h.ready = None;
                h.unsub_waiters.extend(waiter);
                first
            })
            .unwrap_or(false);
        if first {
            self.send_unsub(inner, id);
        }
    }

    fn send_unsub(&self, inner: &ClientInner, id: &str) {
        match inner.send_message(&ClientMessage::unsub(id)) {
            Ok(()) => debug!(sub_id = %id, "unsub sent"),
            Err(err) => warn!(sub_id = %id, error = %err, "failed to send unsub"),
        }
    }

    pub(crate) fn unsubscribe(&self, inner: &ClientInner, id: &str) -> Completion<()> {
        let (resolver, completion) = Completion::channel();
        let id = id.to_string();
        inner.on_subscription_lane(move |inner| {
            inner.subs.begin_unsubscribe(inner, &id, Some(resolver));
        });
        completion
    }

    pub(crate) fn unsubscribe_by_name(&self, inner: &ClientInner, name: &str) -> Completion<()> {
        let (resolver, completion) = Completion::channel();
        let name = name.to_string();
        inner.on_subscription_lane(move |inner| {
            match inner.subs.requests.with(&name, |r| r.id.clone()) {
                Some(id) => inner.subs.begin_unsubscribe(inner, &id, Some(resolver)),
                None => {
                    trace!(name = %name, "no subscription to stop");
                    let _ = resolver.send(Ok(()));
                }
            }
        });
        completion
    }

    pub(crate) fn unsubscribe_by_collection(
        &self,
        inner: &ClientInner,
        collection: &str,
    ) -> Completion<()> {
        let collection = collection.to_string();
        self.unsubscribe_matching(inner, move |h| {
            h.collection.as_deref() == Some(collection.as_str())
        })
    }

    pub(crate) fn unsubscribe_all(&self, inner: &ClientInner) -> Completion<()> {
        self.unsubscribe_matching(inner, |_| true)
    }

    fn unsubscribe_matching(
        &self,
        inner: &ClientInner,
        predicate: impl Fn(&Holder) -> bool + Send + 'static,
    ) -> Completion<()> {
        let (resolver, completion) = Completion::channel();
        inner.on_subscription_lane(move |inner| {
            let ids = inner.subs.holders.keys_where(|_, h| predicate(h));
            let waiting: Vec<Completion<()>> = ids
                .iter()
                .map(|id| {
                    let (waiter, done) = Completion::channel();
                    inner.subs.begin_unsubscribe(inner, id, Some(waiter));
                    done
                })
                .collect();
            inner.lanes.background.spawn(async move {
                for done in waiting {
                    if let Err(err) = done.await {
                        let _ = resolver.send(Err(err));
                        return;
                    }
                }
                let _ = resolver.send(Ok(()));
            });
        });
        completion
    }

    /// Delivers a document event to matching data callbacks.
    pub(crate) fn publish(&self, inner: &ClientInner, event: &DataEvent) {
        let callbacks = self.holders.collect(|_, h| {
            let callback = h.on_data.as_ref()?;
            let matches = h
                .collection
                .as_deref()
                .map_or(true, |c| c == event.collection());
            matches.then(|| Arc::clone(callback))
        });
        if callbacks.is_empty() {
            return;
        }
        let event = event.clone();
        inner.lanes.notify.dispatch(move || {
            for callback in &callbacks {
                callback(&event);
            }
        });
    }

    pub(crate) fn is_subscribed(&self, name_or_collection: &str) -> bool {
        self.requests.contains_key(name_or_collection)
            || self.holders.any(|_, h| {
                h.state != SubscriptionState::Unsubscribing
                    && h.collection.as_deref() == Some(name_or_collection)
            })
    }

    pub(crate) fn find_id(&self, name: &str) -> Option<String> {
        self.requests.with(name, |r| r.id.clone())
    }

    pub(crate) fn state(&self, id: &str) -> SubscriptionState {
        self.holders
            .with(id, |h| h.state)
            .unwrap_or(SubscriptionState::Removed)
    }

    pub(crate) fn len(&self) -> usize {
        self.holders.len()
    }

    /// Forgets everything. Pending outcomes resolve as cancelled.
    pub(crate) fn clear(&self) {
        self.requests.drain();
        self.holders.drain();
    }
}
