//! The client handle and its shared state.

use crate::backoff::ReconnectDelay;
use crate::collection::Collection;
use crate::completion::{Completion, Resolver};
use crate::config::ClientConfig;
use crate::error::DdpResult;
use crate::lanes::Lanes;
use crate::method::{CollectionMethod, MethodCall, MethodManager, Responder};
use crate::registry::KeyedStore;
use crate::state::{ClientEvent, ClientStats, ConnectionStatus, Heartbeat};
use crate::subscription::{SubscribeOptions, Subscription, SubscriptionManager, SubscriptionState};
use crate::transport::Transport;
use crate::websocket::WebSocketTransport;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};

/// Generates a fresh subscription or method call id.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Session fields, mutated only by the session state machine.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) status: ConnectionStatus,
    /// Retained across transport drops so the next handshake resumes.
    pub(crate) session_id: Option<String>,
    pub(crate) version: String,
    pub(crate) has_connected: bool,
    /// Set by a forced disconnect or a fatal handshake rejection.
    pub(crate) manual_close: bool,
}

/// Everything a session owns. Lane jobs reach it through a weak handle.
pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) lanes: Lanes,
    pub(crate) session: RwLock<SessionState>,
    pub(crate) status_tx: watch::Sender<ConnectionStatus>,
    pub(crate) reconnecting: AtomicBool,
    pub(crate) reconnect_epoch: AtomicU64,
    /// Bumped for every transport connection; events from older ones are dropped.
    pub(crate) generation: AtomicU64,
    /// Bumped on every successful handshake.
    pub(crate) connections: AtomicU64,
    pub(crate) reconnect_delay: Mutex<ReconnectDelay>,
    pub(crate) first_connect: Mutex<Vec<Resolver<String>>>,
    pub(crate) attempt_failed: Notify,
    pub(crate) stop_reconnect: Notify,
    pub(crate) events: broadcast::Sender<ClientEvent>,
    pub(crate) stats: RwLock<ClientStats>,
    pub(crate) heartbeat: RwLock<Heartbeat>,
    pub(crate) subs: SubscriptionManager,
    pub(crate) methods: MethodManager,
    pub(crate) collections: KeyedStore<String, Arc<Collection>>,
    pub(crate) this: Weak<ClientInner>,
}

impl ClientInner {
    /// Returns the collection store for `name`, creating it on first use.
    pub(crate) fn collection(&self, name: &str) -> Arc<Collection> {
        self.collections.get_or_insert_with(name.to_string(), || {
            Arc::new(Collection::bound(
                name,
                self.this.clone(),
                self.config.debounce,
                self.config.merge_mode_for(name),
            ))
        })
    }

    /// Runs `job` on the subscriptions lane if the client is still alive.
    pub(crate) fn on_subscription_lane(&self, job: impl FnOnce(&ClientInner) + Send + 'static) {
        let this = self.this.clone();
        self.lanes.subscriptions.dispatch(move || {
            if let Some(inner) = this.upgrade() {
                job(&inner);
            }
        });
    }
}

/// A DDP client session.
///
/// The client owns its subscription, method and collection tables and
/// the lanes that process them. Dropping it disconnects the transport
/// and fails pending method calls.
///
/// # Example
///
/// ```no_run
/// use ddp_client::{ClientConfig, DdpClient};
/// use serde_json::json;
///
/// # async fn run() -> ddp_client::DdpResult<()> {
/// let client = DdpClient::with_websocket(ClientConfig::new("ws://localhost:3000/websocket"))?;
/// let session = client.connect().await?;
/// println!("session {session}");
///
/// client.subscribe("todos", vec![])?.ready().await?;
/// let todos = client.collection("todos");
/// println!("{} todos", todos.count());
///
/// let sum = client.call("add", vec![json!(1), json!(2)])?.await?;
/// assert_eq!(sum, json!(3));
/// # Ok(())
/// # }
/// ```
pub struct DdpClient {
    inner: Arc<ClientInner>,
}

impl DdpClient {
    /// Creates a client over `transport`. Must be called inside a tokio
    /// runtime.
    pub fn new<T: Transport>(config: ClientConfig, transport: Arc<T>) -> DdpResult<Self> {
        let lanes = Lanes::new()?;
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let (events, _) = broadcast::channel(config.event_capacity);
        let transport: Arc<dyn Transport> = transport;

        let inner = Arc::new_cyclic(|this| ClientInner {
            session: RwLock::new(SessionState {
                status: ConnectionStatus::Disconnected,
                session_id: None,
                version: config.version.clone(),
                has_connected: false,
                manual_close: false,
            }),
            reconnect_delay: Mutex::new(ReconnectDelay::new(&config.reconnect)),
            config,
            transport,
            lanes,
            status_tx,
            reconnecting: AtomicBool::new(false),
            reconnect_epoch: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            connections: AtomicU64::new(0),
            first_connect: Mutex::new(Vec::new()),
            attempt_failed: Notify::new(),
            stop_reconnect: Notify::new(),
            events,
            stats: RwLock::new(ClientStats::default()),
            heartbeat: RwLock::new(Heartbeat::default()),
            subs: SubscriptionManager::new(),
            methods: MethodManager::new(),
            collections: KeyedStore::new(),
            this: this.clone(),
        });
        Ok(Self { inner })
    }

    /// Creates a client that talks WebSocket to `config.url`.
    pub fn with_websocket(config: ClientConfig) -> DdpResult<Self> {
        let transport = Arc::new(WebSocketTransport::new(config.url.clone()));
        Self::new(config, transport)
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // ---- session ----

    /// Opens the session.
    ///
    /// Resolves with the session id of the first successful handshake. If
    /// the session is already connected it resolves immediately.
    pub fn connect(&self) -> Completion<String> {
        self.inner.connect()
    }

    /// Closes the session and forgets the session id, so the next
    /// `connect` starts a fresh session. Pending method calls fail with
    /// [`DdpError::Disconnected`](crate::DdpError::Disconnected).
    pub fn disconnect(&self) {
        self.inner.force_disconnect();
    }

    /// Starts a reconnect now. Does nothing while connected or while a
    /// reconnect is already running.
    pub fn trigger_reconnect(&self) {
        self.inner.trigger_reconnect();
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status()
    }

    /// Watches connection status changes.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Checks if the handshake has completed.
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Current (or last) session id.
    pub fn session_id(&self) -> Option<String> {
        self.inner.session.read().session_id.clone()
    }

    /// Protocol version used for the handshake.
    pub fn version(&self) -> String {
        self.inner.session.read().version.clone()
    }

    /// Subscribes to lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Session statistics.
    pub fn stats(&self) -> ClientStats {
        self.inner.stats.read().clone()
    }

    /// Heartbeat timestamps.
    pub fn heartbeat(&self) -> Heartbeat {
        *self.inner.heartbeat.read()
    }

    /// Sends a ping.
    pub fn ping(&self) -> DdpResult<()> {
        self.inner.ping()
    }

    // ---- subscriptions ----

    /// Subscribes to a publication.
    pub fn subscribe(&self, name: &str, params: Vec<Value>) -> DdpResult<Subscription> {
        self.subscribe_with(name, params, SubscribeOptions::default())
    }

    /// Subscribes to a publication with a bound collection or data callback.
    ///
    /// A later subscribe to the same `name` supersedes this one: the new
    /// `sub` is sent first and the old id is unsubscribed after it.
    pub fn subscribe_with(
        &self,
        name: &str,
        params: Vec<Value>,
        options: SubscribeOptions,
    ) -> DdpResult<Subscription> {
        self.inner.subs.subscribe(&self.inner, name, params, options)
    }

    /// Stops a subscription. Resolves once the server acknowledges.
    pub fn unsubscribe(&self, id: &str) -> Completion<()> {
        self.inner.subs.unsubscribe(&self.inner, id)
    }

    /// Stops the active subscription for a publication name.
    pub fn unsubscribe_by_name(&self, name: &str) -> Completion<()> {
        self.inner.subs.unsubscribe_by_name(&self.inner, name)
    }

    /// Stops every subscription bound to a collection.
    pub fn unsubscribe_by_collection(&self, collection: &str) -> Completion<()> {
        self.inner.subs.unsubscribe_by_collection(&self.inner, collection)
    }

    /// Stops every subscription.
    pub fn unsubscribe_all(&self) -> Completion<()> {
        self.inner.subs.unsubscribe_all(&self.inner)
    }

    /// Checks for an active subscription by publication or collection name.
    pub fn is_subscribed(&self, name_or_collection: &str) -> bool {
        self.inner.subs.is_subscribed(name_or_collection)
    }

    /// Id of the active subscription for a publication name.
    pub fn find_subscription_id(&self, name: &str) -> Option<String> {
        self.inner.subs.find_id(name)
    }

    /// Lifecycle state of a subscription.
    pub fn subscription_state(&self, id: &str) -> SubscriptionState {
        self.inner.subs.state(id)
    }

    /// Number of known subscriptions, including ones being stopped.
    pub fn subscription_count(&self) -> usize {
        self.inner.subs.len()
    }

    // ---- methods ----

    /// Calls a server method.
    ///
    /// While disconnected the call is queued and sent after the next
    /// handshake.
    pub fn call(&self, method: &str, params: Vec<Value>) -> DdpResult<MethodCall> {
        self.inner.methods.call(&self.inner, method, params)
    }

    /// Calls a server method and runs `callback` with the outcome on the
    /// callbacks lane. Returns the call id.
    pub fn call_with(
        &self,
        method: &str,
        params: Vec<Value>,
        callback: impl FnOnce(DdpResult<Value>) + Send + Sync + 'static,
    ) -> DdpResult<String> {
        self.inner
            .methods
            .invoke(&self.inner, method, params, Responder::Callback(Box::new(callback)))
    }

    /// Calls a server method and blocks the current thread for the result.
    ///
    /// Meant for threads outside the runtime; calling it from a runtime
    /// worker logs a warning and ties up that worker.
    pub fn call_blocking(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Duration,
    ) -> DdpResult<Value> {
        self.inner
            .methods
            .call_blocking(&self.inner, method, params, timeout)
    }

    /// Calls `/<collection>/<insert|update|remove>` without touching the
    /// local store.
    pub fn update_collection(
        &self,
        collection: &str,
        method: CollectionMethod,
        params: Vec<Value>,
    ) -> DdpResult<MethodCall> {
        self.call(&method.method_name(collection), params)
    }

    /// Number of calls waiting for a result.
    pub fn pending_calls(&self) -> usize {
        self.inner.methods.pending_count()
    }

    /// Number of calls waiting for a connection.
    pub fn queued_calls(&self) -> usize {
        self.inner.methods.queued_count()
    }

    // ---- collections ----

    /// Local store for a collection, created on first use.
    pub fn collection(&self, name: &str) -> Arc<Collection> {
        self.inner.collection(name)
    }

    /// Waits until every queued subscription, inbound, callback and
    /// notification job has run.
    pub async fn flush(&self) {
        self.inner.lanes.settle().await;
    }

    /// Unsubscribes everything, clears the collections and disconnects.
    pub async fn close(&self) {
        let _ = self.inner.subs.unsubscribe_all(&self.inner);
        self.inner.lanes.subscriptions.flush().await;
        self.inner.subs.clear();
        for (_, collection) in self.inner.collections.drain() {
            collection.clear();
        }
        self.inner.force_disconnect();
    }
}

impl Drop for DdpClient {
    fn drop(&mut self) {
        self.inner.force_disconnect();
    }
}

impl std::fmt::Debug for DdpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DdpClient")
            .field("url", &self.inner.config.url)
            .field("status", &self.inner.status())
            .field("subscriptions", &self.inner.subs.len())
            .field("pending_calls", &self.inner.methods.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DdpError;
    use crate::transport::MockTransport;

    #[test]
    fn ids_are_unique_and_compact() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn new_requires_runtime() {
        let result = DdpClient::new(ClientConfig::default(), Arc::new(MockTransport::new()));
        assert!(matches!(result, Err(DdpError::NoRuntime)));
    }

    #[tokio::test]
    async fn collections_are_shared_per_name() {
        let client =
            DdpClient::new(ClientConfig::default(), Arc::new(MockTransport::new())).unwrap();
        let a = client.collection("todos");
        let b = client.collection("todos");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &client.collection("lists")));
    }

    #[tokio::test]
    async fn starts_disconnected() {
        let client =
            DdpClient::new(ClientConfig::default(), Arc::new(MockTransport::new())).unwrap();
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert!(client.session_id().is_none());
        assert_eq!(client.version(), "1");
        assert!(matches!(client.ping(), Err(DdpError::NotConnected)));
        assert!(format!("{client:?}").contains("Disconnected"));
    }
}
