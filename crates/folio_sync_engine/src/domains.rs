//! Concrete sync domains.
//!
//! Sessions and collections follow the indexed shape of
//! [`EntitySyncService`] directly. The literature domain is the other
//! observed shape: one aggregate membership blob plus many small
//! per-paper metadata records, each independently dirty-tracked.

use crate::error::SyncResult;
use crate::repo::LocalRepository;
use crate::service::{
    pull_key, push_key, DomainOutcome, DomainSync, EntitySyncService, KeyPull, KeyPush,
};
use crate::store::{optional, Loaded, VersionedStore};
use folio_sync_protocol::{
    now_millis, CollectionRecord, KeySpace, LitMembership, PaperMeta, SessionRecord, SyncMeta,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Sync service for the chat-sessions domain.
pub type SessionSync = EntitySyncService<SessionRecord>;

/// Sync service for the collections domain.
pub type CollectionSync = EntitySyncService<CollectionRecord>;

impl EntitySyncService<SessionRecord> {
    /// The sessions domain: `"<ns>.sessions.index"` plus one entity
    /// per session.
    pub fn sessions(
        keys: &KeySpace,
        store: Arc<dyn VersionedStore>,
        repo: Arc<dyn LocalRepository>,
        push_width: usize,
    ) -> Self {
        Self::new(
            "sessions",
            keys.sessions_index(),
            keys.session_prefix(),
            store,
            repo,
            push_width,
        )
    }
}

impl EntitySyncService<CollectionRecord> {
    /// The collections domain: `"<ns>.collections.index"` plus one
    /// entity per collection.
    pub fn collections(
        keys: &KeySpace,
        store: Arc<dyn VersionedStore>,
        repo: Arc<dyn LocalRepository>,
        push_width: usize,
    ) -> Self {
        Self::new(
            "collections",
            keys.collections_index(),
            keys.collection_prefix(),
            store,
            repo,
            push_width,
        )
    }
}

/// Sync service for the literature domain: the aggregate membership
/// blob plus per-paper metadata records.
///
/// The membership blob doubles as the metadata domain's index on pull.
/// A locally-absent metadata record that is marked dirty is pushed as
/// a tombstone payload, since the transport is value-oriented and has
/// no delete call.
pub struct LiteratureSync {
    membership_key: String,
    meta_prefix: String,
    lit_prefix: String,
    store: Arc<dyn VersionedStore>,
    repo: Arc<dyn LocalRepository>,
    push_width: usize,
}

impl LiteratureSync {
    /// Creates the literature domain service.
    pub fn new(
        keys: &KeySpace,
        store: Arc<dyn VersionedStore>,
        repo: Arc<dyn LocalRepository>,
        push_width: usize,
    ) -> Self {
        Self {
            membership_key: keys.lit_membership(),
            meta_prefix: keys.lit_meta_prefix(),
            lit_prefix: keys.lit_prefix(),
            store,
            repo,
            push_width,
        }
    }

    fn pull_inner(&self) -> SyncResult<DomainOutcome> {
        let mut outcome = DomainOutcome::default();
        let mut meta = self
            .repo
            .sync_meta(&self.membership_key)?
            .unwrap_or_else(|| SyncMeta::new(self.membership_key.as_str()));

        let versioned = match optional(
            self.store
                .load(&self.membership_key, meta.remote_revision.as_ref()),
        )? {
            None | Some(Loaded::NoChange) => return Ok(outcome),
            Some(Loaded::Value(v)) => v,
        };

        let membership: LitMembership = serde_json::from_value(versioned.value.clone())?;
        self.repo.put(&self.membership_key, versioned.value)?;
        meta.confirm_pull(versioned.revision, now_millis());
        self.repo.set_sync_meta(meta)?;
        outcome.pulled += 1;

        for paper_id in &membership.paper_ids {
            let key = format!("{}{}", self.meta_prefix, paper_id);
            match pull_key::<PaperMeta>(&*self.store, &*self.repo, &key, false) {
                Ok(KeyPull::Applied | KeyPull::Deleted) => outcome.pulled += 1,
                Ok(KeyPull::Unchanged | KeyPull::Missing) => {}
                Err(e) => {
                    outcome.failures += 1;
                    outcome.error = Some(e.to_string());
                    warn!(
                        operation = "pull",
                        domain = "literature",
                        key = %key,
                        error_kind = e.kind(),
                        "metadata pull failed: {e}"
                    );
                }
            }
        }
        Ok(outcome)
    }

    fn push_inner(&self) -> SyncResult<DomainOutcome> {
        let mut outcome = DomainOutcome::default();
        let dirty = self.repo.dirty_keys(&self.lit_prefix)?;
        if dirty.is_empty() {
            return Ok(outcome);
        }
        debug!(domain = "literature", keys = dirty.len(), "pushing dirty keys");

        let mut membership_dirty = false;
        let mut meta_keys = Vec::new();
        for key in dirty {
            if key == self.membership_key {
                membership_dirty = true;
            } else if key.starts_with(&self.meta_prefix) {
                meta_keys.push(key);
            }
        }

        let tombstone = |paper_id: &str| PaperMeta::tombstone(paper_id, now_millis());
        let reports = crate::service::drain_queue(meta_keys, self.push_width, |key| {
            let result = push_key::<PaperMeta>(
                &*self.store,
                &*self.repo,
                &key,
                Some(&tombstone),
                &self.meta_prefix,
            );
            (key, result)
        });
        for (key, result) in reports {
            self.absorb_push(&key, result, &mut outcome);
        }

        // The aggregate goes last, once the items it summarizes are in.
        if membership_dirty {
            let result = push_key::<LitMembership>(
                &*self.store,
                &*self.repo,
                &self.membership_key,
                None,
                &self.lit_prefix,
            );
            let key = self.membership_key.clone();
            self.absorb_push(&key, result, &mut outcome);
        }
        Ok(outcome)
    }

    fn absorb_push(&self, key: &str, result: SyncResult<KeyPush>, outcome: &mut DomainOutcome) {
        match result {
            Ok(KeyPush::Pushed { retried, .. }) => {
                outcome.pushed += 1;
                if retried {
                    outcome.conflicts += 1;
                }
            }
            Ok(KeyPush::RemoteWon { .. }) => outcome.conflicts += 1,
            Ok(KeyPush::LeftDirty) => outcome.conflicts += 1,
            Ok(KeyPush::Skipped) => {}
            Err(e) => {
                outcome.failures += 1;
                outcome.error = Some(e.to_string());
                warn!(
                    operation = "push",
                    domain = "literature",
                    key = %key,
                    error_kind = e.kind(),
                    "push failed; key stays dirty: {e}"
                );
            }
        }
    }
}

impl DomainSync for LiteratureSync {
    fn name(&self) -> &'static str {
        "literature"
    }

    fn pull(&self) -> DomainOutcome {
        match self.pull_inner() {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    operation = "pull",
                    domain = "literature",
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
                    domain = "literature",
                    error_kind = e.kind(),
                    "push failed: {e}"
                );
                DomainOutcome::failed(&e)
            }
        }
    }
}
