//! Entity sync services: the pull and push protocol over one domain.
//!
//! Pull is index-driven: the domain index is the sole object fetched
//! unconditionally; per-item fetches are skipped whenever the index is
//! unchanged. Push drains the domain's dirty keys through a bounded
//! worker pool and resolves compare-and-swap conflicts with a
//! last-writer-wins merge over `updated_at`.
//!
//! Pull applies remote values blindly while push merges on conflict.
//! The asymmetry is deliberate and documented behavior, not an
//! oversight: pull trusts the remote, push arbitrates.

use crate::error::{StoreError, SyncError, SyncResult};
use crate::repo::LocalRepository;
use crate::store::{optional, Loaded, VersionedStore};
use folio_sync_protocol::{id_in, now_millis, DomainIndex, Revision, SyncMeta, SyncRecord};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// Counters from one pull or push invocation of a domain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainOutcome {
    /// Keys successfully pushed.
    pub pushed: u64,
    /// Keys applied locally from remote state.
    pub pulled: u64,
    /// Keys that hit at least one compare-and-swap conflict.
    pub conflicts: u64,
    /// Keys that failed and stayed dirty or unapplied.
    pub failures: u64,
    /// Message of the most recent failure, if any.
    pub error: Option<String>,
}

impl DomainOutcome {
    /// Folds another outcome into this one.
    pub fn absorb(&mut self, other: DomainOutcome) {
        self.pushed += other.pushed;
        self.pulled += other.pulled;
        self.conflicts += other.conflicts;
        self.failures += other.failures;
        if other.error.is_some() {
            self.error = other.error;
        }
    }

    pub(crate) fn failed(error: &SyncError) -> Self {
        Self {
            failures: 1,
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

/// One sync domain the controller can drive.
///
/// Both methods are error-opaque by contract: failures are logged and
/// degrade to "leave dirty, retry next cycle", never propagated.
pub trait DomainSync: Send + Sync {
    /// Domain name for diagnostics.
    fn name(&self) -> &'static str;

    /// Pulls remote changes into the local repository.
    fn pull(&self) -> DomainOutcome;

    /// Pushes dirty local keys to the store.
    fn push(&self) -> DomainOutcome;
}

/// Result of pushing one key.
pub(crate) enum KeyPush {
    /// The local value landed remotely.
    Pushed {
        /// Newly assigned revision.
        revision: Revision,
        /// The pushed value's timestamp, for index deltas.
        updated_at: u64,
        /// Whether the pushed value was a tombstone.
        deleted: bool,
        /// Whether a merge retry was needed to land it.
        retried: bool,
    },
    /// The remote value was newer; it was adopted locally and the
    /// local edit discarded.
    RemoteWon {
        /// The adopted remote revision.
        revision: Revision,
        /// The adopted remote timestamp.
        updated_at: u64,
    },
    /// Conflict persisted after the single merge retry; the key stays
    /// dirty until the next cycle.
    LeftDirty,
    /// Dirty flag with nothing to push; flag cleared.
    Skipped,
}

/// Result of pulling one key.
pub(crate) enum KeyPull {
    /// Remote value overwrote the local copy.
    Applied,
    /// A tombstone was applied as a local delete.
    Deleted,
    /// Local state already matched.
    Unchanged,
    /// The key is listed but absent remotely.
    Missing,
}

/// Pushes one dirty key: compare-and-swap with `local ?? remote` as
/// the expected revision, merge-on-conflict, at most one retry.
///
/// When the local value is absent and a `tombstone` constructor is
/// supplied, a tombstone payload is pushed instead (value-oriented
/// transports delete by writing `{deleted: true}`).
pub(crate) fn push_key<E: SyncRecord>(
    store: &dyn VersionedStore,
    repo: &dyn LocalRepository,
    key: &str,
    tombstone: Option<&(dyn Fn(&str) -> E + Sync)>,
    prefix: &str,
) -> SyncResult<KeyPush> {
    let mut meta = repo.sync_meta(key)?.unwrap_or_else(|| SyncMeta::new(key));
    let local_value = match repo.get(key)? {
        Some(value) => value,
        None => match (tombstone, id_in(prefix, key)) {
            (Some(make), Some(id)) => serde_json::to_value(make(id))?,
            _ => {
                repo.mark_dirty(key, false)?;
                return Ok(KeyPush::Skipped);
            }
        },
    };
    let local: E = serde_json::from_value(local_value.clone())?;
    let expected = meta.expected_revision().cloned();

    match store.save(key, &local_value, expected.as_ref()) {
        Ok(revision) => {
            meta.confirm_push(revision.clone(), now_millis());
            repo.set_sync_meta(meta)?;
            Ok(KeyPush::Pushed {
                revision,
                updated_at: local.updated_at(),
                deleted: local.is_deleted(),
                retried: false,
            })
        }
        Err(StoreError::Conflict { current, .. }) => {
            merge_conflict(store, repo, key, meta, local_value, &local, current)
        }
        Err(StoreError::NotFound) if expected.is_some() => {
            // We expected a revision but the remote key vanished.
            // Re-push unconditionally; the local value wins over nothing.
            let revision = store.save(key, &local_value, None)?;
            meta.confirm_push(revision.clone(), now_millis());
            repo.set_sync_meta(meta)?;
            Ok(KeyPush::Pushed {
                revision,
                updated_at: local.updated_at(),
                deleted: local.is_deleted(),
                retried: false,
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Applies the merge policy after a conflicted push: last-writer-wins
/// over `updated_at`, ties to the remote.
fn merge_conflict<E: SyncRecord>(
    store: &dyn VersionedStore,
    repo: &dyn LocalRepository,
    key: &str,
    mut meta: SyncMeta,
    local_value: Value,
    local: &E,
    current: Option<folio_sync_protocol::VersionedValue<Value>>,
) -> SyncResult<KeyPush> {
    let remote = match current {
        Some(v) => v,
        // Conflict reported without the current value; fetch it.
        None => match optional(store.load(key, None))? {
            Some(Loaded::Value(v)) => v,
            _ => return Ok(KeyPush::LeftDirty),
        },
    };
    let remote_record: E = serde_json::from_value(remote.value.clone())?;

    if remote_record.updated_at() >= local.updated_at() {
        // Remote is at least as new: adopt it and drop the local edit.
        if remote_record.is_deleted() {
            repo.remove(key)?;
            meta.confirm_delete(now_millis());
        } else {
            repo.put(key, remote.value)?;
            meta.confirm_pull(remote.revision.clone(), now_millis());
        }
        repo.set_sync_meta(meta)?;
        Ok(KeyPush::RemoteWon {
            revision: remote.revision,
            updated_at: remote_record.updated_at(),
        })
    } else {
        // Local is strictly newer: retry once against the revision the
        // store reported. A second conflict waits for the next cycle.
        match store.save(key, &local_value, Some(&remote.revision)) {
            Ok(revision) => {
                meta.confirm_push(revision.clone(), now_millis());
                repo.set_sync_meta(meta)?;
                Ok(KeyPush::Pushed {
                    revision,
                    updated_at: local.updated_at(),
                    deleted: local.is_deleted(),
                    retried: true,
                })
            }
            Err(StoreError::Conflict { revision, .. }) => {
                warn!(
                    operation = "push",
                    key = %key,
                    revision = %revision,
                    "conflict persisted after merge retry; leaving key dirty"
                );
                Ok(KeyPush::LeftDirty)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Pulls one key: conditional read against the last confirmed
/// revision, blind local overwrite on change, local delete on
/// tombstone.
pub(crate) fn pull_key<E: SyncRecord>(
    store: &dyn VersionedStore,
    repo: &dyn LocalRepository,
    key: &str,
    deleted_in_index: bool,
) -> SyncResult<KeyPull> {
    let mut meta = repo.sync_meta(key)?.unwrap_or_else(|| SyncMeta::new(key));

    if deleted_in_index {
        if meta.remote_revision.is_none() && repo.get(key)?.is_none() {
            // Tombstone already applied; avoid bookkeeping churn.
            return Ok(KeyPull::Unchanged);
        }
        repo.remove(key)?;
        meta.confirm_delete(now_millis());
        repo.set_sync_meta(meta)?;
        return Ok(KeyPull::Deleted);
    }

    match optional(store.load(key, meta.remote_revision.as_ref()))? {
        None => Ok(KeyPull::Missing),
        Some(Loaded::NoChange) => Ok(KeyPull::Unchanged),
        Some(Loaded::Value(v)) => {
            let record: E = serde_json::from_value(v.value.clone())?;
            if record.is_deleted() {
                repo.remove(key)?;
                meta.confirm_delete(now_millis());
                repo.set_sync_meta(meta)?;
                Ok(KeyPull::Deleted)
            } else {
                // Blind overwrite: pull trusts remote.
                repo.put(key, v.value)?;
                meta.confirm_pull(v.revision, now_millis());
                repo.set_sync_meta(meta)?;
                Ok(KeyPull::Applied)
            }
        }
    }
}

/// Drains `keys` through `width` workers sharing one queue.
///
/// The pop is exclusive, so pushing many dirty items never opens more
/// than `width` concurrent store calls, and one worker's failure does
/// not block the others.
pub(crate) fn drain_queue<R, F>(keys: Vec<String>, width: usize, work: F) -> Vec<R>
where
    R: Send,
    F: Fn(String) -> R + Sync,
{
    let width = width.max(1).min(keys.len().max(1));
    let queue = Mutex::new(VecDeque::from(keys));
    let results = Mutex::new(Vec::new());

    thread::scope(|s| {
        for _ in 0..width {
            s.spawn(|| loop {
                let Some(key) = queue.lock().pop_front() else {
                    break;
                };
                let result = work(key);
                results.lock().push(result);
            });
        }
    });

    results.into_inner()
}

/// Sync service for one indexed domain: a domain index entity plus one
/// entity per member key.
pub struct EntitySyncService<E: SyncRecord> {
    domain: &'static str,
    index_key: String,
    entity_prefix: String,
    store: Arc<dyn VersionedStore>,
    repo: Arc<dyn LocalRepository>,
    push_width: usize,
    _record: PhantomData<fn() -> E>,
}

impl<E: SyncRecord> EntitySyncService<E> {
    /// Creates a service over one indexed domain.
    pub fn new(
        domain: &'static str,
        index_key: String,
        entity_prefix: String,
        store: Arc<dyn VersionedStore>,
        repo: Arc<dyn LocalRepository>,
        push_width: usize,
    ) -> Self {
        Self {
            domain,
            index_key,
            entity_prefix,
            store,
            repo,
            push_width,
            _record: PhantomData,
        }
    }

    fn pull_inner(&self) -> SyncResult<DomainOutcome> {
        let mut outcome = DomainOutcome::default();
        let mut meta = self
            .repo
            .sync_meta(&self.index_key)?
            .unwrap_or_else(|| SyncMeta::new(self.index_key.as_str()));

        let versioned = match optional(
            self.store.load(&self.index_key, meta.remote_revision.as_ref()),
        )? {
            // No remote index yet, or no news: both end the pull here
            // with zero entity-level reads.
            None | Some(Loaded::NoChange) => return Ok(outcome),
            Some(Loaded::Value(v)) => v,
        };

        let index: DomainIndex = serde_json::from_value(versioned.value)?;
        for (key, entry) in index.iter() {
            match pull_key::<E>(&*self.store, &*self.repo, key, entry.deleted) {
                Ok(KeyPull::Applied | KeyPull::Deleted) => outcome.pulled += 1,
                Ok(KeyPull::Unchanged | KeyPull::Missing) => {}
                Err(e) => {
                    outcome.failures += 1;
                    outcome.error = Some(e.to_string());
                    warn!(
                        operation = "pull",
                        domain = self.domain,
                        key = %key,
                        error_kind = e.kind(),
                        "entity pull failed: {e}"
                    );
                }
            }
        }

        meta.confirm_pull(versioned.revision, now_millis());
        self.repo.set_sync_meta(meta)?;
        Ok(outcome)
    }

    fn push_inner(&self) -> SyncResult<DomainOutcome> {
        let mut outcome = DomainOutcome::default();
        let dirty = self.repo.dirty_keys(&self.entity_prefix)?;
        if dirty.is_empty() {
            return Ok(outcome);
        }
        debug!(domain = self.domain, keys = dirty.len(), "pushing dirty keys");

        let reports = drain_queue(dirty, self.push_width, |key| {
            let result = push_key::<E>(&*self.store, &*self.repo, &key, None, &self.entity_prefix);
            (key, result)
        });

        let mut deltas = DomainIndex::new();
        for (key, result) in reports {
            match result {
                Ok(KeyPush::Pushed {
                    revision,
                    updated_at,
                    deleted,
                    retried,
                }) => {
                    outcome.pushed += 1;
                    if retried {
                        outcome.conflicts += 1;
                    }
                    if deleted {
                        deltas.note_delete(key.as_str(), updated_at);
                    } else {
                        deltas.note_update(key.as_str(), updated_at, revision);
                    }
                }
                Ok(KeyPush::RemoteWon {
                    revision,
                    updated_at,
                }) => {
                    outcome.conflicts += 1;
                    deltas.note_update(key.as_str(), updated_at, revision);
                }
                Ok(KeyPush::LeftDirty) => outcome.conflicts += 1,
                Ok(KeyPush::Skipped) => {}
                Err(e) => {
                    outcome.failures += 1;
                    outcome.error = Some(e.to_string());
                    warn!(
                        operation = "push",
                        domain = self.domain,
                        key = %key,
                        error_kind = e.kind(),
                        "push failed; key stays dirty: {e}"
                    );
                }
            }
        }

        if let Err(e) = self.update_index(&deltas) {
            outcome.failures += 1;
            outcome.error = Some(e.to_string());
            warn!(
                operation = "index",
                domain = self.domain,
                key = %self.index_key,
                error_kind = e.kind(),
                "index update failed: {e}"
            );
        }
        Ok(outcome)
    }

    /// Rebuilds the domain index incrementally after a push batch:
    /// read, merge the changed-key deltas, compare-and-swap write,
    /// with one conflict retry.
    ///
    /// The written revision is deliberately not recorded in the index
    /// bookkeeping: the merged index may list keys this client learned
    /// from the remote but never fetched, and the next pull must still
    /// see the index as changed so it revalidates them.
    fn update_index(&self, deltas: &DomainIndex) -> SyncResult<()> {
        if deltas.is_empty() {
            return Ok(());
        }

        let (mut index, expected) = self.read_index()?;
        index.merge(deltas);
        let first = self
            .store
            .save(&self.index_key, &serde_json::to_value(&index)?, expected.as_ref());

        match first {
            Ok(_) => Ok(()),
            Err(StoreError::Conflict { .. }) => {
                // Another writer got there first: re-read, re-apply the
                // same deltas, retry once.
                let (mut index, expected) = self.read_index()?;
                index.merge(deltas);
                match self.store.save(
                    &self.index_key,
                    &serde_json::to_value(&index)?,
                    expected.as_ref(),
                ) {
                    Ok(_) => Ok(()),
                    Err(StoreError::Conflict { revision, .. }) => {
                        warn!(
                            operation = "index",
                            key = %self.index_key,
                            revision = %revision,
                            "index conflict persisted after retry"
                        );
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_index(&self) -> SyncResult<(DomainIndex, Option<Revision>)> {
        match optional(self.store.load(&self.index_key, None))? {
            Some(Loaded::Value(v)) => {
                Ok((serde_json::from_value(v.value)?, Some(v.revision)))
            }
            _ => Ok((DomainIndex::new(), None)),
        }
    }
}

impl<E: SyncRecord> DomainSync for EntitySyncService<E> {
    fn name(&self) -> &'static str {
        self.domain
    }

    fn pull(&self) -> DomainOutcome {
        match self.pull_inner() {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    operation = "pull",
                    domain = self.domain,
                    error_kind = e.kind(),
                    "pull failed: {e}"
                );
                DomainOutcome::failed(&e)
            }
        }
    }

    fn push(&self) -> DomainOutcome {
        match self.push_inner() {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    operation = "push",
                    domain = self.domain,
                    error_kind = e.kind(),
                    "push failed: {e}"
                );
                DomainOutcome::failed(&e)
            }
        }
    }
}
