//! # Folio Sync Protocol
//!
//! Protocol types for the Folio sync engine.
//!
//! This crate provides:
//! - [`Revision`] and [`VersionedValue`] for optimistic concurrency
//! - [`SyncMeta`] per-key sync bookkeeping
//! - [`DomainIndex`] incremental-pull summaries
//! - Domain records for the synced domains (sessions, literature
//!   membership, per-paper metadata, collections)
//! - [`KeySpace`] domain-prefixed key naming
//!
//! This is a pure data crate with no I/O operations.
//!
//! ## Key Invariants
//!
//! - Revisions are opaque and comparable for equality only; the remote
//!   store is the sole authority on their meaning
//! - `SyncMeta.dirty == true` means the local value has changed since
//!   `remote_revision` was last confirmed
//! - A domain index is a lagging, coarse-grained projection of the
//!   individual entity revisions it summarizes

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entities;
mod index;
mod keys;
mod meta;
mod revision;

pub use entities::{
    CollectionRecord, LitMembership, PaperMeta, SessionRecord, SessionTurn, SyncRecord, TurnRole,
};
pub use index::{DomainIndex, IndexEntry};
pub use keys::{id_in, KeySpace};
pub use meta::SyncMeta;
pub use revision::{Revision, VersionedValue};

use std::time::SystemTime;

/// Current unix time in milliseconds.
///
/// This is the timestamp domain all synced records carry in their
/// `updated_at` fields and the merge policy compares.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
