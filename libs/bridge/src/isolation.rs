//! Read isolation
//!
//! The remote may only auto-refresh a context (advance its visible
//! snapshot) after delivering `beforenotify` to every registered listener.
//! Registering [`ReadIsolation::hook`] therefore forces each advance to
//! wait for one of this client's poll/callback round trips, so two
//! consecutive property reads cannot observe different snapshots.
//!
//! When the notification does arrive, cached property values for the
//! affected context are dropped so later reads go back to the remote.
//! Local mutations (method calls, property writes) drop them the same way.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::registry::Callback;
use crate::value::{RemoteId, Value};

type PropertyKey = (RemoteId, String);

/// Client-local cache of property reads, partitioned by context
#[derive(Debug, Default)]
pub struct PropertyCache {
    contexts: RwLock<HashMap<Option<RemoteId>, HashMap<PropertyKey, Value>>>,
}

impl PropertyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, context: Option<&RemoteId>, object: &RemoteId, name: &str) -> Option<Value> {
        self.contexts
            .read()
            .get(&context.cloned())
            .and_then(|entries| entries.get(&(object.clone(), name.to_string())))
            .cloned()
    }

    pub fn insert(&self, context: Option<&RemoteId>, object: &RemoteId, name: &str, value: Value) {
        self.contexts
            .write()
            .entry(context.cloned())
            .or_default()
            .insert((object.clone(), name.to_string()), value);
    }

    /// Forget one property (after a local write)
    pub fn forget(&self, context: Option<&RemoteId>, object: &RemoteId, name: &str) {
        if let Some(entries) = self.contexts.write().get_mut(&context.cloned()) {
            entries.remove(&(object.clone(), name.to_string()));
        }
    }

    /// Forget everything cached for a context
    ///
    /// Reads cached without a context may belong to any context and go
    /// too; invalidating `None` clears the whole cache.
    pub fn invalidate(&self, context: Option<&RemoteId>) {
        let mut contexts = self.contexts.write();
        match context {
            Some(id) => {
                contexts.remove(&Some(id.clone()));
                contexts.remove(&None);
            }
            None => contexts.clear(),
        }
    }

    pub fn clear(&self) {
        self.contexts.write().clear();
    }

    pub fn len(&self) -> usize {
        self.contexts.read().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The `beforenotify` listener and the cache it invalidates
pub struct ReadIsolation {
    cache: Arc<PropertyCache>,
    hook: Callback,
    notifications: Arc<AtomicU64>,
    listening: Mutex<HashSet<(Option<RemoteId>, RemoteId)>>,
}

impl ReadIsolation {
    pub fn new(cache: Arc<PropertyCache>) -> Self {
        let notifications = Arc::new(AtomicU64::new(0));

        let hook = {
            let cache = cache.clone();
            let notifications = notifications.clone();
            Callback::new(move |this, args| {
                notifications.fetch_add(1, Ordering::SeqCst);

                // The notifying context arrives as the first argument, or as `this`
                let context = args
                    .first()
                    .and_then(Value::as_remote)
                    .or_else(|| this.as_remote())
                    .map(|remote| remote.id.clone());

                match &context {
                    Some(id) => debug!(context = %id, "beforenotify: invalidating cached reads"),
                    None => debug!("beforenotify without a context: invalidating all cached reads"),
                }
                cache.invalidate(context.as_ref());
                Ok(Value::Undefined)
            })
        };

        Self {
            cache,
            hook,
            notifications,
            listening: Mutex::new(HashSet::new()),
        }
    }

    /// Record that the hook is being attached to `object`; false if it
    /// already was
    pub fn claim(&self, context: Option<&RemoteId>, object: &RemoteId) -> bool {
        self.listening
            .lock()
            .insert((context.cloned(), object.clone()))
    }

    /// Undo a claim whose registration failed
    pub fn release(&self, context: Option<&RemoteId>, object: &RemoteId) {
        self.listening.lock().remove(&(context.cloned(), object.clone()));
    }

    /// Forget every listener attachment, e.g. after the remote dropped its
    /// objects
    pub fn reset(&self) {
        self.listening.lock().clear();
        self.cache.clear();
    }

    /// The listener; always the same callback, so always the same handle
    pub fn hook(&self) -> &Callback {
        &self.hook
    }

    pub fn cache(&self) -> &Arc<PropertyCache> {
        &self.cache
    }

    /// How many notifications have been delivered
    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::SeqCst)
    }
}
