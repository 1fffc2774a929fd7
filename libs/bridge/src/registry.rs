//! Callback registry
//!
//! Maps integer handles to local callbacks the remote process may invoke.
//! Registering the same callback twice yields the same handle, because the
//! remote compares handles to detect a listener being re-registered.
//!
//! Handles are slot indices and slots are never reused: once a handle has
//! been cleared it stays unresolvable for the life of the registry.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::value::Value;

/// Signature of a local callback: `(this, arguments) -> result`
pub type CallbackFn = dyn Fn(&Value, &[Value]) -> Result<Value, CallbackError> + Send + Sync;

/// A shareable local callback
///
/// Identity is the allocation: clones of one `Callback` are the same
/// callback, two separately constructed ones are not.
#[derive(Clone)]
pub struct Callback(Arc<CallbackFn>);

impl Callback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, CallbackError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn invoke(&self, this: &Value, args: &[Value]) -> Result<Value, CallbackError> {
        (self.0)(this, args)
    }

    /// Same allocation, compared by data pointer only
    pub fn same_as(&self, other: &Callback) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.0) as *const (),
            Arc::as_ptr(&other.0) as *const (),
        )
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

/// Failure raised by a local callback, reported back to the remote as data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CallbackError {
    pub message: String,
    pub stack: Option<String>,
}

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Some(stack.into()),
        }
    }
}

/// Remote-visible handle of a registered callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackHandle(pub u64);

impl fmt::Display for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Entry {
    callback: Callback,
    persistent: bool,
}

/// Handle-to-callback table with identity dedup
#[derive(Default)]
pub struct CallbackRegistry {
    slots: Vec<Option<Entry>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback, returning its existing handle if already known
    ///
    /// Registering a known callback as persistent promotes it; a persistent
    /// entry is never demoted.
    pub fn register(&mut self, callback: &Callback, persistent: bool) -> CallbackHandle {
        let existing = self.slots.iter_mut().enumerate().find_map(|(index, slot)| {
            slot.as_mut()
                .filter(|entry| entry.callback.same_as(callback))
                .map(|entry| (index, entry))
        });

        if let Some((index, entry)) = existing {
            entry.persistent |= persistent;
            return CallbackHandle(index as u64);
        }

        let handle = CallbackHandle(self.slots.len() as u64);
        self.slots.push(Some(Entry {
            callback: callback.clone(),
            persistent,
        }));
        debug!(%handle, persistent, "registered callback");
        handle
    }

    pub fn resolve(&self, handle: CallbackHandle) -> Option<Callback> {
        let index = usize::try_from(handle.0).ok()?;
        self.slots
            .get(index)
            .and_then(Option::as_ref)
            .map(|entry| entry.callback.clone())
    }

    /// Drop every non-persistent entry, returning how many were removed
    pub fn clear(&mut self) -> usize {
        let mut removed = 0;
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|entry| !entry.persistent) {
                *slot = None;
                removed += 1;
            }
        }
        debug!(removed, "cleared non-persistent callbacks");
        removed
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_persistent(&self, handle: CallbackHandle) -> bool {
        usize::try_from(handle.0)
            .ok()
            .and_then(|index| self.slots.get(index))
            .and_then(Option::as_ref)
            .is_some_and(|entry| entry.persistent)
    }
}
