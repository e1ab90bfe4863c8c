//! Local repository contract and in-memory reference implementation.

use crate::error::RepoError;
use folio_sync_protocol::SyncMeta;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;

/// Result type for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

/// The local persistence layer the engine syncs against.
///
/// Implemented by the embedding application, consumed by the engine.
/// Entities cross this boundary as raw JSON values; the engine owns no
/// entity state of its own and reads `updated_at` only at the service
/// edge.
///
/// The dirty flag lives inside [`SyncMeta`]: `mark_dirty` is the
/// convenience local writers call after a mutation (creating the meta
/// record if needed), and `dirty_keys` is the query the push phase
/// drains. The repository is expected to serialize its own writes; the
/// engine adds no locking over entity content.
pub trait LocalRepository: Send + Sync {
    /// Reads an entity, `None` when absent.
    fn get(&self, key: &str) -> RepoResult<Option<Value>>;

    /// Writes an entity.
    fn put(&self, key: &str, value: Value) -> RepoResult<()>;

    /// Deletes an entity. Deleting an absent key is a no-op.
    fn remove(&self, key: &str) -> RepoResult<()>;

    /// Reads the sync bookkeeping for a key, `None` when never synced.
    fn sync_meta(&self, key: &str) -> RepoResult<Option<SyncMeta>>;

    /// Writes the sync bookkeeping for a key.
    fn set_sync_meta(&self, meta: SyncMeta) -> RepoResult<()>;

    /// Keys under `prefix` whose bookkeeping is marked dirty.
    fn dirty_keys(&self, prefix: &str) -> RepoResult<Vec<String>>;

    /// Flips the dirty flag, creating the bookkeeping record if needed.
    fn mark_dirty(&self, key: &str, dirty: bool) -> RepoResult<()>;
}

struct MemoryRepositoryInner {
    entities: BTreeMap<String, Value>,
    metas: BTreeMap<String, SyncMeta>,
}

/// An in-process [`LocalRepository`].
///
/// Reference implementation for tests and embedders without a durable
/// store. Keys are held in sorted order so dirty-key scans are
/// deterministic.
pub struct MemoryRepository {
    inner: Mutex<MemoryRepositoryInner>,
}

impl MemoryRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryRepositoryInner {
                entities: BTreeMap::new(),
                metas: BTreeMap::new(),
            }),
        }
    }

    /// Number of stored entities, for assertions.
    pub fn entity_count(&self) -> usize {
        self.inner.lock().entities.len()
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRepository for MemoryRepository {
    fn get(&self, key: &str) -> RepoResult<Option<Value>> {
        Ok(self.inner.lock().entities.get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> RepoResult<()> {
        self.inner.lock().entities.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> RepoResult<()> {
        self.inner.lock().entities.remove(key);
        Ok(())
    }

    fn sync_meta(&self, key: &str) -> RepoResult<Option<SyncMeta>> {
        Ok(self.inner.lock().metas.get(key).cloned())
    }

    fn set_sync_meta(&self, meta: SyncMeta) -> RepoResult<()> {
        self.inner.lock().metas.insert(meta.key.clone(), meta);
        Ok(())
    }

    fn dirty_keys(&self, prefix: &str) -> RepoResult<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .metas
            .values()
            .filter(|meta| meta.dirty && meta.key.starts_with(prefix))
            .map(|meta| meta.key.clone())
            .collect())
    }

    fn mark_dirty(&self, key: &str, dirty: bool) -> RepoResult<()> {
        let mut inner = self.inner.lock();
        let meta = inner
            .metas
            .entry(key.to_string())
            .or_insert_with(|| SyncMeta::new(key));
        meta.dirty = dirty;
        Ok(())
    }
}
