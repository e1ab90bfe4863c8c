//! # Folio Sync Engine
//!
//! Client-resident, offline-capable sync engine for Folio.
//!
//! This crate provides:
//! - Versioned store contract (conditional load, compare-and-swap save)
//! - Local repository contract (entity CRUD plus sync bookkeeping)
//! - Entity sync services with index-based incremental pull and
//!   merge-on-conflict push
//! - Domain adapters for sessions, collections, and literature
//!   membership/metadata
//! - Local-write event bus and the debounce/poll sync controller
//! - HTTP transport adapter over ETag conditional requests
//!
//! ## Architecture
//!
//! UI mutation → repository write → local-write event → controller
//! debounces → services push dirty keys (bounded workers) and
//! periodically pull the remote index → conflicts resolved in place →
//! repository and bookkeeping updated.
//!
//! ## Key Invariants
//!
//! - The store's compare-and-swap, not the client, orders writes per key
//! - Pull applies remote state blindly; push merges last-writer-wins
//!   by `updated_at`
//! - Conflicts retry at most once per cycle; everything else degrades
//!   to "leave dirty, retry next cycle"
//! - Sync failures never propagate to the foreground application

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod controller;
mod domains;
mod error;
mod events;
mod http;
mod repo;
mod service;
mod store;

pub use config::{SyncConfig, MIN_DEBOUNCE, MIN_POLL_INTERVAL};
pub use controller::{ControllerState, SyncController, SyncStats, SyncTrigger};
pub use domains::{CollectionSync, LiteratureSync, SessionSync};
pub use error::{RepoError, StoreError, StoreResult, SyncError, SyncResult};
pub use events::{LocalWriteBus, Subscription, WriteEvent, WriteKind};
pub use http::{HttpClient, HttpResponse, HttpStore};
pub use repo::{LocalRepository, MemoryRepository, RepoResult};
pub use service::{DomainOutcome, DomainSync, EntitySyncService};
pub use store::{optional, Loaded, MemoryStore, VersionedStore};
