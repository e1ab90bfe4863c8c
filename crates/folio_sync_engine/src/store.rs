//! Versioned store contract and in-memory reference implementation.

use crate::error::{StoreError, StoreResult};
use folio_sync_protocol::{Revision, VersionedValue};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

/// Outcome of a conditional load.
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded {
    /// The remote value has not changed since the supplied revision;
    /// no value was transferred.
    NoChange,
    /// The current remote value and its revision.
    Value(VersionedValue<Value>),
}

/// A remote versioned key-value store.
///
/// The two primitives below are the entire basis of the
/// conflict-resolution design: a cheap "has anything changed" check
/// that avoids transferring the value, and an atomic compare-and-swap
/// write that reports the actual current state on mismatch. The store,
/// not the client, is the ordering authority per key.
pub trait VersionedStore: Send + Sync {
    /// Conditional read.
    ///
    /// With `if_none_match` set to a previously-seen revision, an
    /// unchanged remote value yields [`Loaded::NoChange`]. An absent
    /// key is [`StoreError::NotFound`]; call sites that expect
    /// possibly-missing keys fold it to `None` via [`optional`].
    fn load(&self, key: &str, if_none_match: Option<&Revision>) -> StoreResult<Loaded>;

    /// Conditional compare-and-swap write.
    ///
    /// With `if_match` set, a mismatch against the remote's current
    /// revision fails with [`StoreError::Conflict`] carrying the
    /// actual current state. Without it the write asserts the key is
    /// absent (first push of a new key); losing that race to a
    /// concurrent first writer is reported as the same conflict.
    /// Returns the newly assigned revision.
    fn save(&self, key: &str, value: &Value, if_match: Option<&Revision>) -> StoreResult<Revision>;
}

/// Folds [`StoreError::NotFound`] into `None` for call sites where
/// absence is a legitimate state rather than a failure.
pub fn optional<T>(result: StoreResult<T>) -> StoreResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(StoreError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

struct MemoryStoreInner {
    entries: HashMap<String, VersionedValue<Value>>,
    next_revision: u64,
    offline: bool,
    load_calls: u64,
    save_calls: u64,
}

/// An in-process [`VersionedStore`] with real compare-and-swap
/// semantics.
///
/// Reference implementation for tests and embedders without a remote:
/// revisions are monotonic per store, every mutation happens under one
/// lock, and `set_offline` turns every call into a retryable transport
/// failure to simulate an outage.
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryStoreInner {
                entries: HashMap::new(),
                next_revision: 0,
                offline: false,
                load_calls: 0,
                save_calls: 0,
            }),
        }
    }

    /// Simulates losing (or regaining) connectivity.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Number of `load` calls made so far, including failed ones.
    pub fn load_calls(&self) -> u64 {
        self.inner.lock().load_calls
    }

    /// Number of `save` calls made so far, including failed ones.
    pub fn save_calls(&self) -> u64 {
        self.inner.lock().save_calls
    }

    /// Reads a value without conditional semantics, for assertions.
    pub fn peek(&self, key: &str) -> Option<VersionedValue<Value>> {
        self.inner.lock().entries.get(key).cloned()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionedStore for MemoryStore {
    fn load(&self, key: &str, if_none_match: Option<&Revision>) -> StoreResult<Loaded> {
        let mut inner = self.inner.lock();
        inner.load_calls += 1;
        if inner.offline {
            return Err(StoreError::transport_retryable("store offline"));
        }

        let current = inner.entries.get(key).ok_or(StoreError::NotFound)?;
        if if_none_match == Some(&current.revision) {
            return Ok(Loaded::NoChange);
        }
        Ok(Loaded::Value(current.clone()))
    }

    fn save(&self, key: &str, value: &Value, if_match: Option<&Revision>) -> StoreResult<Revision> {
        let mut inner = self.inner.lock();
        inner.save_calls += 1;
        if inner.offline {
            return Err(StoreError::transport_retryable("store offline"));
        }

        match (if_match, inner.entries.get(key)) {
            (Some(expected), Some(current)) if current.revision != *expected => {
                return Err(StoreError::Conflict {
                    revision: current.revision.clone(),
                    current: Some(current.clone()),
                });
            }
            (Some(_), None) => return Err(StoreError::NotFound),
            // Creation race: a no-revision write against an existing
            // key loses to whoever created it.
            (None, Some(current)) => {
                return Err(StoreError::Conflict {
                    revision: current.revision.clone(),
                    current: Some(current.clone()),
                });
            }
            _ => {}
        }

        inner.next_revision += 1;
        let revision = Revision::new(format!("r{}", inner.next_revision));
        inner
            .entries
            .insert(key.to_string(), VersionedValue::new(value.clone(), revision.clone()));
        Ok(revision)
    }
}
