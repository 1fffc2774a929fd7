//! Proxies for objects living on the remote side
//!
//! Property reads go through the client's [`PropertyCache`], which the
//! read-isolation hook drops whenever the owning context is about to
//! advance. Writes and method calls always go to the remote and drop the
//! cached reads of their context. Collections get their own `beforenotify`
//! listener as soon as they are wrapped.
//!
//! [`PropertyCache`]: crate::isolation::PropertyCache

use std::fmt;

use bridge_config::{ADD_LISTENER_METHOD, BEFORE_NOTIFY_EVENT, COLLECTION_TYPES};
use tracing::{debug, trace};

use crate::client::BridgeClient;
use crate::value::{RemoteId, RemoteRef, Value};
use crate::Result;

/// A remote object bound to a client and the context it belongs to
#[derive(Clone)]
pub struct RemoteObject {
    client: BridgeClient,
    context: Option<RemoteId>,
    reference: RemoteRef,
}

impl RemoteObject {
    pub fn new(client: BridgeClient, context: Option<RemoteId>, reference: RemoteRef) -> Self {
        Self {
            client,
            context,
            reference,
        }
    }

    pub fn id(&self) -> &RemoteId {
        &self.reference.id
    }

    /// Owning context (the realm id); a realm is its own context
    pub fn context(&self) -> Option<&RemoteId> {
        self.context.as_ref()
    }

    pub fn type_tag(&self) -> Option<&str> {
        self.reference.type_tag.as_deref()
    }

    pub fn is_collection(&self) -> bool {
        self.type_tag()
            .is_some_and(|tag| COLLECTION_TYPES.contains(&tag))
    }

    pub fn reference(&self) -> &RemoteRef {
        &self.reference
    }

    pub fn client(&self) -> &BridgeClient {
        &self.client
    }

    /// Read a property, served from cache until the context advances
    pub fn get(&self, name: &str) -> Result<Value> {
        let cache = self.client.isolation().cache();
        if let Some(value) = cache.get(self.context(), self.id(), name) {
            trace!(id = %self.id(), name, "property cache hit");
            return Ok(value);
        }

        let value = self.client.get_property(self.context(), self.id(), name)?;
        cache.insert(self.context(), self.id(), name, value.clone());
        Ok(value)
    }

    /// Write a property; cached reads are dropped rather than updated
    /// since the remote may coerce the value
    pub fn set(&self, name: &str, value: &Value) -> Result<()> {
        self.client
            .set_property(self.context(), self.id(), name, value)
    }

    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.client
            .call_method(self.context(), self.id(), name, args)
    }

    /// Wrap a remote reference returned from this object in the same
    /// context
    ///
    /// Collections are registered with the read-isolation hook before they
    /// are handed out. `Ok(None)` if `value` is not a reference.
    pub fn child(&self, value: &Value) -> Result<Option<RemoteObject>> {
        let Some(reference) = value.as_remote() else {
            return Ok(None);
        };

        let child = RemoteObject::new(self.client.clone(), self.context.clone(), reference.clone());
        if child.is_collection() {
            child.isolate_reads()?;
        }
        Ok(Some(child))
    }

    /// Register the read-isolation hook as a `beforenotify` listener on
    /// this object; a no-op if it already is
    pub fn isolate_reads(&self) -> Result<()> {
        let isolation = self.client.isolation();
        if !isolation.claim(self.context(), self.id()) {
            return Ok(());
        }

        debug!(id = %self.id(), type_tag = ?self.type_tag(), "attaching beforenotify listener");
        let hook = isolation.hook().clone();
        let outcome = self.call(
            ADD_LISTENER_METHOD,
            &[Value::from(BEFORE_NOTIFY_EVENT), Value::Function(hook)],
        );
        if outcome.is_err() {
            isolation.release(self.context(), self.id());
        }
        outcome.map(|_| ())
    }
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObject")
            .field("context", &self.context)
            .field("reference", &self.reference)
            .finish()
    }
}
