//! Integration tests: two clients reconciling through one shared
//! versioned store.

use folio_sync_engine::{
    CollectionSync, DomainSync, LocalRepository, LocalWriteBus, MemoryRepository, MemoryStore,
    SessionSync, SyncConfig, SyncController, VersionedStore, WriteEvent, WriteKind,
};
use folio_sync_protocol::{
    now_millis, CollectionRecord, DomainIndex, KeySpace, Revision, SessionRecord,
};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("folio_sync_engine=warn")
        .try_init();
}

struct Client {
    repo: Arc<MemoryRepository>,
    sessions: SessionSync,
    collections: CollectionSync,
}

fn client(store: &Arc<MemoryStore>) -> Client {
    let keys = KeySpace::new("folio");
    let repo = Arc::new(MemoryRepository::new());
    let sessions = SessionSync::sessions(
        &keys,
        Arc::clone(store) as Arc<dyn VersionedStore>,
        Arc::clone(&repo) as Arc<dyn LocalRepository>,
        2,
    );
    let collections = CollectionSync::collections(
        &keys,
        Arc::clone(store) as Arc<dyn VersionedStore>,
        Arc::clone(&repo) as Arc<dyn LocalRepository>,
        2,
    );
    Client {
        repo,
        sessions,
        collections,
    }
}

fn write_session(client: &Client, key: &str, id: &str, title: &str, updated_at: u64) {
    let session = SessionRecord::new(id, title, updated_at);
    client
        .repo
        .put(key, serde_json::to_value(&session).unwrap())
        .unwrap();
    client.repo.mark_dirty(key, true).unwrap();
}

fn wait_until(deadline: Duration, predicate: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    predicate()
}

#[test]
fn first_push_creates_remote_state() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let keys = KeySpace::new("folio");
    let a = client(&store);
    let key = keys.session("s1");

    // Never pushed before: no bookkeeping at all.
    assert_eq!(a.repo.sync_meta(&key).unwrap(), None);
    write_session(&a, &key, "s1", "Reading list", 100);

    let outcome = a.sessions.push();
    assert_eq!(outcome.pushed, 1);
    assert_eq!(outcome.conflicts, 0);

    let meta = a.repo.sync_meta(&key).unwrap().unwrap();
    assert!(!meta.dirty);
    assert!(meta.local_revision.is_some());
    assert_eq!(meta.local_revision, meta.remote_revision);

    // Remote now holds the session and an index listing it.
    assert!(store.peek(&key).is_some());
    let index = store.peek(&keys.sessions_index()).unwrap();
    let index: DomainIndex = serde_json::from_value(index.value).unwrap();
    let entry = index.get(&key).unwrap();
    assert_eq!(entry.updated_at, 100);
    assert!(!entry.deleted);
}

#[test]
fn unchanged_index_pull_short_circuits() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let keys = KeySpace::new("folio");
    let a = client(&store);
    let b = client(&store);
    let key = keys.session("s1");

    write_session(&a, &key, "s1", "Reading list", 100);
    a.sessions.push();

    // First pull transfers index and entity.
    let outcome = b.sessions.pull();
    assert_eq!(outcome.pulled, 1);
    assert!(b.repo.get(&key).unwrap().is_some());

    let index_meta_before = b.repo.sync_meta(&keys.sessions_index()).unwrap();
    let entity_meta_before = b.repo.sync_meta(&key).unwrap();
    let loads_before = store.load_calls();

    // Nothing changed remotely: the second pull is one conditional
    // index read and zero entity-level reads.
    let outcome = b.sessions.pull();
    assert_eq!(outcome.pulled, 0);
    assert_eq!(store.load_calls(), loads_before + 1);

    // And the bookkeeping is untouched, stamp for stamp.
    assert_eq!(b.repo.sync_meta(&keys.sessions_index()).unwrap(), index_meta_before);
    assert_eq!(b.repo.sync_meta(&key).unwrap(), entity_meta_before);
}

#[test]
fn stale_push_adopts_newer_remote() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let keys = KeySpace::new("folio");
    let a = client(&store);
    let b = client(&store);
    let key = keys.session("s1");

    // Both clients converge on revision r1.
    write_session(&a, &key, "s1", "draft", 100);
    a.sessions.push();
    b.sessions.pull();

    // A wins the next round with a newer edit.
    write_session(&a, &key, "s1", "A's edit", 150);
    a.sessions.push();
    let winning_revision = store.peek(&key).unwrap().revision;

    // B, still on r1, pushes an older edit and must lose it.
    write_session(&b, &key, "s1", "B's edit", 140);
    let outcome = b.sessions.push();
    assert_eq!(outcome.conflicts, 1);
    assert_eq!(outcome.pushed, 0);

    // B's local copy is now the remote value and the key is clean.
    let local = b.repo.get(&key).unwrap().unwrap();
    assert_eq!(local["title"], json!("A's edit"));
    let meta = b.repo.sync_meta(&key).unwrap().unwrap();
    assert!(!meta.dirty);
    assert_eq!(meta.remote_revision, Some(winning_revision.clone()));

    // The remote kept A's content.
    assert_eq!(store.peek(&key).unwrap().revision, winning_revision);
    assert_eq!(store.peek(&key).unwrap().value["title"], json!("A's edit"));
}

#[test]
fn newer_local_wins_conflict_retry() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let keys = KeySpace::new("folio");
    let a = client(&store);
    let b = client(&store);
    let key = keys.session("s1");

    write_session(&a, &key, "s1", "draft", 100);
    a.sessions.push();
    b.sessions.pull();

    write_session(&a, &key, "s1", "A's edit", 150);
    a.sessions.push();

    // B's edit is strictly newer, so the merge retry lands it.
    write_session(&b, &key, "s1", "B's edit", 160);
    let outcome = b.sessions.push();
    assert_eq!(outcome.pushed, 1);
    assert_eq!(outcome.conflicts, 1);

    let remote = store.peek(&key).unwrap();
    assert_eq!(remote.value["title"], json!("B's edit"));
    assert_eq!(remote.value["updatedAt"], json!(160));

    let meta = b.repo.sync_meta(&key).unwrap().unwrap();
    assert!(!meta.dirty);
    assert_eq!(meta.remote_revision, Some(remote.revision));

    // A picks B's edit up on its next pull.
    let outcome = a.sessions.pull();
    assert_eq!(outcome.pulled, 1);
    let local = a.repo.get(&key).unwrap().unwrap();
    assert_eq!(local["title"], json!("B's edit"));
}

#[test]
fn outage_leaves_dirty_and_next_cycle_recovers() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let keys = KeySpace::new("folio");
    let a = client(&store);
    let key = keys.session("m1");

    write_session(&a, &key, "m1", "written offline", 100);
    store.set_offline(true);

    let outcome = a.sessions.push();
    assert_eq!(outcome.pushed, 0);
    assert!(outcome.failures >= 1);
    assert!(a.repo.sync_meta(&key).unwrap().unwrap().dirty);
    assert!(outcome.error.is_some());

    // Connectivity returns; the very next cycle retries with no
    // additional local action.
    store.set_offline(false);
    let outcome = a.sessions.push();
    assert_eq!(outcome.pushed, 1);
    assert!(!a.repo.sync_meta(&key).unwrap().unwrap().dirty);
    assert!(store.peek(&key).is_some());
}

#[test]
fn collection_delete_propagates_as_tombstone() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let keys = KeySpace::new("folio");
    let a = client(&store);
    let b = client(&store);
    let key = keys.collection("c1");

    // A shares a collection; B picks it up.
    let collection = CollectionRecord::new("c1", "To read", 100);
    a.repo
        .put(&key, serde_json::to_value(&collection).unwrap())
        .unwrap();
    a.repo.mark_dirty(&key, true).unwrap();
    a.collections.push();
    b.collections.pull();
    assert!(b.repo.get(&key).unwrap().is_some());

    // B deletes it: tombstone entity, tombstone index entry.
    let mut deleted = collection.clone();
    deleted.deleted = true;
    deleted.updated_at = 200;
    b.repo
        .put(&key, serde_json::to_value(&deleted).unwrap())
        .unwrap();
    b.repo.mark_dirty(&key, true).unwrap();
    b.collections.push();

    let index: DomainIndex =
        serde_json::from_value(store.peek(&keys.collections_index()).unwrap().value).unwrap();
    assert!(index.get(&key).unwrap().deleted);

    // A's next pull applies the delete locally.
    let outcome = a.collections.pull();
    assert_eq!(outcome.pulled, 1);
    assert!(a.repo.get(&key).unwrap().is_none());
    let meta = a.repo.sync_meta(&key).unwrap().unwrap();
    assert!(!meta.dirty);
    assert_eq!(meta.remote_revision, None);
}

#[test]
fn two_writers_index_lists_both_sessions() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let keys = KeySpace::new("folio");
    let a = client(&store);
    let b = client(&store);

    write_session(&a, &keys.session("sa"), "sa", "from A", 100);
    a.sessions.push();
    write_session(&b, &keys.session("sb"), "sb", "from B", 110);
    b.sessions.push();

    // B's index write merged A's entry rather than clobbering it.
    let index: DomainIndex =
        serde_json::from_value(store.peek(&keys.sessions_index()).unwrap().value).unwrap();
    assert!(index.get(&keys.session("sa")).is_some());
    assert!(index.get(&keys.session("sb")).is_some());

    // Each side pulls the other's session through the shared index.
    a.sessions.pull();
    b.sessions.pull();
    assert!(a.repo.get(&keys.session("sb")).unwrap().is_some());
    assert!(b.repo.get(&keys.session("sa")).unwrap().is_some());
}

#[test]
fn revision_tokens_stay_opaque_to_the_engine() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let keys = KeySpace::new("folio");
    let a = client(&store);
    let key = keys.session("s1");

    write_session(&a, &key, "s1", "draft", 100);
    a.sessions.push();

    let meta = a.repo.sync_meta(&key).unwrap().unwrap();
    let remote = store.peek(&key).unwrap();
    // The engine records whatever token the store minted, verbatim.
    assert_eq!(
        meta.remote_revision.as_ref().map(Revision::as_str),
        Some(remote.revision.as_str())
    );
}

#[test]
fn controller_drives_write_to_remote_end_to_end() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let keys = KeySpace::new("folio");
    let repo = Arc::new(MemoryRepository::new());
    let bus = Arc::new(LocalWriteBus::new());

    let sessions: Arc<dyn DomainSync> = Arc::new(SessionSync::sessions(
        &keys,
        Arc::clone(&store) as Arc<dyn VersionedStore>,
        Arc::clone(&repo) as Arc<dyn LocalRepository>,
        3,
    ));
    let config = SyncConfig::new("folio")
        .with_debounce(Duration::from_millis(300))
        .with_poll_interval(Duration::from_secs(3600));
    let controller = SyncController::new(config, Arc::clone(&bus), vec![sessions]);
    controller.start();

    // A burst of local edits to one session.
    let key = keys.session("s1");
    for revision in 1..=3u64 {
        let session = SessionRecord::new("s1", format!("draft {revision}"), now_millis());
        repo.put(&key, serde_json::to_value(&session).unwrap()).unwrap();
        repo.mark_dirty(&key, true).unwrap();
        bus.notify(&WriteEvent::new("s1", WriteKind::Session));
    }

    // The burst lands remotely as a single flush.
    assert!(wait_until(Duration::from_secs(3), || store.peek(&key).is_some()));
    assert!(wait_until(Duration::from_secs(1), || {
        controller.stats().flushes == 1
    }));
    let stats = controller.stats();
    assert_eq!(stats.flushes, 1);
    assert_eq!(stats.keys_pushed, 1);
    assert_eq!(store.peek(&key).unwrap().value["title"], json!("draft 3"));

    controller.stop();

    // A second client sees the write on its startup pull.
    let b = client(&store);
    b.sessions.pull();
    assert!(b.repo.get(&key).unwrap().is_some());
}
