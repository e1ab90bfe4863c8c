//! Domain indexes for incremental pulls.

use crate::revision::Revision;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current index schema version.
const INDEX_VERSION: u32 = 1;

/// Summary of one member key in a domain index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    /// Last revision the indexing writer saw for the key, if any.
    #[serde(default)]
    pub revision: Option<Revision>,
    /// Unix millis of the member's last update.
    pub updated_at: u64,
    /// Whether the member has been deleted.
    #[serde(default)]
    pub deleted: bool,
}

/// A versioned summary of all member keys of one domain.
///
/// The index is the sole object fetched unconditionally on each pull
/// cycle; per-item fetches are skipped when it is unchanged. It is a
/// lagging, coarse-grained projection of the individual entity
/// revisions: rebuilt incrementally after every push batch and merged
/// on conflict rather than overwritten. Tombstones are retained so
/// deletes propagate to every client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainIndex {
    /// Schema version of the index payload.
    pub version: u32,
    items: BTreeMap<String, IndexEntry>,
}

impl DomainIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self {
            version: INDEX_VERSION,
            items: BTreeMap::new(),
        }
    }

    /// Records an update to a member key.
    pub fn note_update(&mut self, key: impl Into<String>, updated_at: u64, revision: Revision) {
        self.items.insert(
            key.into(),
            IndexEntry {
                revision: Some(revision),
                updated_at,
                deleted: false,
            },
        );
    }

    /// Records a delete of a member key as a tombstone.
    pub fn note_delete(&mut self, key: impl Into<String>, updated_at: u64) {
        self.items.insert(
            key.into(),
            IndexEntry {
                revision: None,
                updated_at,
                deleted: true,
            },
        );
    }

    /// Merges another index into this one.
    ///
    /// Per key, the incoming entry replaces the existing one unless it
    /// is strictly older. This is what the push-side conflict retry
    /// relies on: re-read the remote index, merge the same local deltas
    /// back in, write again.
    pub fn merge(&mut self, other: &DomainIndex) {
        for (key, entry) in &other.items {
            match self.items.get(key) {
                Some(existing) if entry.updated_at < existing.updated_at => {}
                _ => {
                    self.items.insert(key.clone(), entry.clone());
                }
            }
        }
    }

    /// Looks up the entry for a key.
    pub fn get(&self, key: &str) -> Option<&IndexEntry> {
        self.items.get(key)
    }

    /// Iterates over all entries, tombstones included.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &IndexEntry)> {
        self.items.iter()
    }

    /// Number of entries, tombstones included.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the index has no entries.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Default for DomainIndex {
    fn default() -> Self {
        Self::new()
    }
}
