//! Local collection mirror.
//!
//! A [`Collection`] holds the documents the server has published for one
//! collection name, keyed by document id. Server `added`/`changed`/
//! `removed` messages are applied on the inbound lane in arrival order.
//! Local and optimistic remote mutations go through the same store.
//!
//! Observers are told about changes through a debounced notifier: every
//! mutation inside one window collapses into a single notification that
//! carries the id of the most recent mutation.

use crate::client::ClientInner;
use crate::completion::Completion;
use crate::error::{DdpError, DdpResult};
use crate::method::{CollectionMethod, MethodCall, Responder, Rollback};
use crate::subscription::DataEvent;
use ddp_ejson::{apply_changes, fields_to_json, from_fields, EjsonValue, Fields, MergeMode};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

/// Field holding the document id.
pub const ID_FIELD: &str = "_id";

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(330);

/// Payload of a collection change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionChange {
    /// Collection name.
    pub collection: String,
    /// Id of the most recent mutation in the debounce window.
    pub id: String,
}

type ChangeObserver = Arc<dyn Fn(&CollectionChange) + Send + Sync>;

#[derive(Default)]
struct DebounceSlot {
    pending: Option<String>,
    armed: bool,
}

struct NotifierShared {
    collection: String,
    window: Duration,
    slot: Mutex<DebounceSlot>,
    observers: RwLock<Vec<ChangeObserver>>,
}

/// Single-slot debounce timer. A change inside an armed window replaces
/// the pending id; the timer fires once per window.
#[derive(Clone)]
struct ChangeNotifier {
    shared: Arc<NotifierShared>,
}

impl ChangeNotifier {
    fn new(collection: &str, window: Duration) -> Self {
        Self {
            shared: Arc::new(NotifierShared {
                collection: collection.to_string(),
                window,
                slot: Mutex::new(DebounceSlot::default()),
                observers: RwLock::new(Vec::new()),
            }),
        }
    }

    fn subscribe(&self, observer: ChangeObserver) {
        self.shared.observers.write().push(observer);
    }

    fn notify(&self, id: &str, client: &Weak<ClientInner>, runtime: Option<&Handle>) {
        let already_armed = {
            let mut slot = self.shared.slot.lock();
            slot.pending = Some(id.to_string());
            std::mem::replace(&mut slot.armed, true)
        };
        if already_armed {
            trace!(collection = %self.shared.collection, id, "change coalesced");
            return;
        }

        let window = self.shared.window;
        if let Some(inner) = client.upgrade() {
            let notifier = self.clone();
            let client = client.clone();
            inner.lanes.background.spawn(async move {
                tokio::time::sleep(window).await;
                match client.upgrade() {
                    Some(inner) => {
                        inner.lanes.notify.dispatch(move || notifier.fire());
                    }
                    None => notifier.fire(),
                }
            });
        } else if let Some(handle) = runtime {
            let notifier = self.clone();
            handle.spawn(async move {
                tokio::time::sleep(window).await;
                notifier.fire();
            });
        } else {
            self.fire();
        }
    }

    fn fire(&self) {
        let id = {
            let mut slot = self.shared.slot.lock();
            slot.armed = false;
            slot.pending.take()
        };
        let Some(id) = id else {
            return;
        };
        let observers = self.shared.observers.read().clone();
        let change = CollectionChange {
            collection: self.shared.collection.clone(),
            id,
        };
        for observer in &observers {
            observer(&change);
        }
    }
}

/// Documents of one collection, keyed by id.
pub struct Collection {
    name: String,
    documents: RwLock<BTreeMap<String, Fields>>,
    client: Weak<ClientInner>,
    runtime: Option<Handle>,
    merge_mode: MergeMode,
    notifier: ChangeNotifier,
}

impl Collection {
    /// Creates a standalone collection with the default debounce window.
    ///
    /// Standalone collections support local mutations and queries. Remote
    /// mutations need a collection obtained from a client.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_debounce(name, DEFAULT_DEBOUNCE)
    }

    /// Creates a standalone collection with a custom debounce window.
    ///
    /// Notifications are timed on the current tokio runtime, if any;
    /// without one they are delivered immediately.
    pub fn with_debounce(name: impl Into<String>, window: Duration) -> Self {
        let name = name.into();
        Self {
            notifier: ChangeNotifier::new(&name, window),
            name,
            documents: RwLock::new(BTreeMap::new()),
            client: Weak::new(),
            runtime: Handle::try_current().ok(),
            merge_mode: MergeMode::Shallow,
        }
    }

    pub(crate) fn bound(
        name: &str,
        client: Weak<ClientInner>,
        window: Duration,
        merge_mode: MergeMode,
    ) -> Self {
        Self {
            name: name.to_string(),
            documents: RwLock::new(BTreeMap::new()),
            client,
            runtime: None,
            merge_mode,
            notifier: ChangeNotifier::new(name, window),
        }
    }

    /// Sets how `changed` payloads merge nested objects.
    pub fn with_merge_mode(mut self, mode: MergeMode) -> Self {
        self.merge_mode = mode;
        self
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Merge mode used for updates.
    pub fn merge_mode(&self) -> MergeMode {
        self.merge_mode
    }

    /// Registers an observer for debounced change notifications.
    pub fn on_change(&self, observer: impl Fn(&CollectionChange) + Send + Sync + 'static) {
        self.notifier.subscribe(Arc::new(observer));
    }

    // ---- local mutations ----

    /// Inserts or replaces a document. `_id` is set to `id`.
    pub fn local_insert(&self, id: &str, fields: Fields) {
        self.documents
            .write()
            .insert(id.to_string(), with_id(id, fields));
        self.changed(id);
    }

    /// Merges `fields` into a document and removes the `cleared` keys.
    ///
    /// Returns false, without notifying, if the document is not present.
    pub fn local_update(&self, id: &str, fields: &Fields, cleared: &[String]) -> bool {
        let updated = match self.documents.write().get_mut(id) {
            Some(doc) => {
                apply_changes(doc, fields, cleared, self.merge_mode);
                true
            }
            None => false,
        };
        if updated {
            self.changed(id);
        } else {
            trace!(collection = %self.name, id, "update of missing document ignored");
        }
        updated
    }

    /// Removes a document. Returns the removed document, if any.
    pub fn local_remove(&self, id: &str) -> Option<Fields> {
        let removed = self.documents.write().remove(id);
        if removed.is_some() {
            self.changed(id);
        }
        removed
    }

    /// Removes every document without notifying.
    pub fn clear(&self) {
        self.documents.write().clear();
    }

    // ---- queries ----

    /// Returns a copy of a document.
    pub fn find_one(&self, id: &str) -> Option<Fields> {
        self.documents.read().get(id).cloned()
    }

    /// Returns a copy of every document, ordered by id.
    pub fn find(&self) -> Vec<Fields> {
        self.documents.read().values().cloned().collect()
    }

    /// Number of documents.
    pub fn count(&self) -> usize {
        self.documents.read().len()
    }

    /// Checks if a document is present.
    pub fn contains(&self, id: &str) -> bool {
        self.documents.read().contains_key(id)
    }

    /// Ids of every document, ordered.
    pub fn ids(&self) -> Vec<String> {
        self.documents.read().keys().cloned().collect()
    }

    /// Decodes a document into a typed model.
    pub fn find_one_as<T: DeserializeOwned>(&self, id: &str) -> DdpResult<Option<T>> {
        match self.find_one(id) {
            Some(doc) => Ok(Some(from_fields(&doc)?)),
            None => Ok(None),
        }
    }

    /// Decodes every document into a typed model.
    pub fn find_as<T: DeserializeOwned>(&self) -> DdpResult<Vec<T>> {
        let docs = self.find();
        let mut out = Vec::with_capacity(docs.len());
        for doc in &docs {
            out.push(from_fields(doc)?);
        }
        Ok(out)
    }

    // ---- server data ----

    /// Applies a server document message. Runs on the inbound lane.
    pub(crate) fn apply(&self, event: &DataEvent) {
        match event {
            DataEvent::Added { id, fields, .. } => {
                self.local_insert(id, fields.clone());
            }
            DataEvent::Changed {
                id,
                fields,
                cleared,
                ..
            } => {
                if !self.local_update(id, fields, cleared) {
                    debug!(collection = %self.name, id = %id, "changed for unknown document");
                }
            }
            DataEvent::Removed { id, .. } => {
                if self.local_remove(id).is_none() {
                    debug!(collection = %self.name, id = %id, "removed for unknown document");
                }
            }
        }
    }

    /// Puts a document back to `snapshot` (absent if `None`) and notifies.
    fn restore(&self, id: &str, snapshot: Option<Fields>) {
        {
            let mut documents = self.documents.write();
            match snapshot {
                Some(doc) => {
                    documents.insert(id.to_string(), doc);
                }
                None => {
                    documents.remove(id);
                }
            }
        }
        self.changed(id);
    }

    fn changed(&self, id: &str) {
        self.notifier.notify(id, &self.client, self.runtime.as_ref());
    }

    // ---- optimistic remote mutations ----

    /// Inserts locally, then calls `/<name>/insert`. The insert is undone
    /// if the server reports an error.
    pub fn remote_insert(self: &Arc<Self>, id: &str, fields: Fields) -> DdpResult<MethodCall> {
        let doc = with_id(id, fields);
        let params = vec![fields_to_json(&doc)?];
        self.mutate_remotely(id, CollectionMethod::Insert, params, |this| {
            this.local_insert(id, doc);
        })
    }

    /// Updates locally, then calls `/<name>/update` with a `$set` of
    /// `fields` and an `$unset` of `cleared`. The document is restored to
    /// its previous state if the server reports an error.
    pub fn remote_update(
        self: &Arc<Self>,
        id: &str,
        fields: Fields,
        cleared: &[String],
    ) -> DdpResult<MethodCall> {
        let mut modifier = Map::new();
        if !fields.is_empty() {
            modifier.insert("$set".into(), fields_to_json(&fields)?);
        }
        if !cleared.is_empty() {
            let unset: Map<String, Value> = cleared
                .iter()
                .map(|key| (key.clone(), Value::String(String::new())))
                .collect();
            modifier.insert("$unset".into(), Value::Object(unset));
        }
        let params = vec![json!({ ID_FIELD: id }), Value::Object(modifier)];
        self.mutate_remotely(id, CollectionMethod::Update, params, |this| {
            this.local_update(id, &fields, cleared);
        })
    }

    /// Removes locally, then calls `/<name>/remove`. The document comes
    /// back if the server reports an error.
    pub fn remote_remove(self: &Arc<Self>, id: &str) -> DdpResult<MethodCall> {
        let params = vec![json!({ ID_FIELD: id })];
        self.mutate_remotely(id, CollectionMethod::Remove, params, |this| {
            this.local_remove(id);
        })
    }

    fn mutate_remotely(
        self: &Arc<Self>,
        id: &str,
        method: CollectionMethod,
        params: Vec<Value>,
        apply: impl FnOnce(&Self),
    ) -> DdpResult<MethodCall> {
        let Some(inner) = self.client.upgrade() else {
            warn!(collection = %self.name, method = method.as_str(), "remote mutation on unbound collection");
            return Err(DdpError::NotBound {
                collection: self.name.clone(),
            });
        };

        let snapshot = self.find_one(id);
        apply(Arc::as_ref(self));

        // An update or remove of a document we never had changed nothing
        // locally, so there is nothing to undo.
        let undo = match (method, snapshot.clone()) {
            (CollectionMethod::Insert, before) => Some(before),
            (_, Some(before)) => Some(Some(before)),
            (_, None) => None,
        };
        let rollback = undo.map(|before| {
            let this = Arc::clone(self);
            let doc_id = id.to_string();
            Box::new(move || {
                warn!(collection = %this.name, id = %doc_id, "remote mutation failed; rolling back");
                this.restore(&doc_id, before);
            }) as Rollback
        });

        let (resolver, completion) = Completion::channel();
        let responder = Responder::Optimistic { rollback, resolver };

        let method_name = method.method_name(&self.name);
        match inner.methods.invoke(&inner, &method_name, params, responder) {
            Ok(call_id) => Ok(MethodCall::new(call_id, completion)),
            Err(err) => {
                if method == CollectionMethod::Insert || snapshot.is_some() {
                    self.restore(id, snapshot);
                }
                Err(err)
            }
        }
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("documents", &self.count())
            .field("bound", &(self.client.strong_count() > 0))
            .field("merge_mode", &self.merge_mode)
            .finish()
    }
}

fn with_id(id: &str, mut fields: Fields) -> Fields {
    fields.insert(ID_FIELD.to_string(), EjsonValue::from(id));
    fields
}
