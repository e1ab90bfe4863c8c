//! Per-key sync bookkeeping.

use crate::revision::Revision;
use serde::{Deserialize, Serialize};

/// Sync bookkeeping for one key.
///
/// Owned by the sync engine and persisted through the local repository,
/// one record per synced key (entity keys and index keys alike).
///
/// # Invariants
///
/// - `dirty == true` means the local value has changed since
///   `remote_revision` was last confirmed
/// - A successful push or an applied pull clears `dirty`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMeta {
    /// The key this record tracks.
    pub key: String,
    /// Revision the local copy corresponds to, if known.
    pub local_revision: Option<Revision>,
    /// Last remote revision confirmed by a load or save.
    pub remote_revision: Option<Revision>,
    /// Whether the local value awaits a successful push.
    pub dirty: bool,
    /// Unix millis of the last successful push, if any.
    pub last_pushed_at: Option<u64>,
    /// Unix millis of the last applied pull, if any.
    pub last_pulled_at: Option<u64>,
}

impl SyncMeta {
    /// Creates empty bookkeeping for a key never synced before.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            local_revision: None,
            remote_revision: None,
            dirty: false,
            last_pushed_at: None,
            last_pulled_at: None,
        }
    }

    /// The revision a compare-and-swap push should expect: the local
    /// revision when known, otherwise the last confirmed remote one.
    pub fn expected_revision(&self) -> Option<&Revision> {
        self.local_revision.as_ref().or(self.remote_revision.as_ref())
    }

    /// Records a confirmed push: both sides now agree on `revision`.
    pub fn confirm_push(&mut self, revision: Revision, now: u64) {
        self.local_revision = Some(revision.clone());
        self.remote_revision = Some(revision);
        self.dirty = false;
        self.last_pushed_at = Some(now);
    }

    /// Records an applied pull: the local copy was overwritten with the
    /// remote value at `revision`.
    pub fn confirm_pull(&mut self, revision: Revision, now: u64) {
        self.local_revision = Some(revision.clone());
        self.remote_revision = Some(revision);
        self.dirty = false;
        self.last_pulled_at = Some(now);
    }

    /// Records an applied remote delete: no revision on either side.
    pub fn confirm_delete(&mut self, now: u64) {
        self.local_revision = None;
        self.remote_revision = None;
        self.dirty = false;
        self.last_pulled_at = Some(now);
    }
}
