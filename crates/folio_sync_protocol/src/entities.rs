//! Domain records for the synced domains.
//!
//! Every synced record carries an `updated_at` unix-millis timestamp;
//! the push-side merge policy is last-writer-wins over that field and
//! reads it only through [`SyncRecord`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Behavior shared by all synced domain records.
pub trait SyncRecord: Serialize + DeserializeOwned {
    /// Unix millis of the record's last local mutation.
    fn updated_at(&self) -> u64;

    /// Whether the record is a tombstone.
    ///
    /// The transport is value-oriented, so deletes travel as tombstone
    /// payloads rather than delete calls. Domains without tombstones
    /// keep the default.
    fn is_deleted(&self) -> bool {
        false
    }
}

/// Who authored a session turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// The person using the app.
    User,
    /// The assistant answering them.
    Assistant,
}

/// One turn of a chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTurn {
    /// Turn author.
    pub role: TurnRole,
    /// Turn text.
    pub text: String,
    /// Unix millis the turn was recorded.
    pub at: u64,
}

/// A chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Session id, unique within the namespace.
    pub id: String,
    /// User-visible title.
    pub title: String,
    /// Conversation turns in order.
    #[serde(default)]
    pub turns: Vec<SessionTurn>,
    /// Unix millis of the last local mutation.
    pub updated_at: u64,
}

impl SessionRecord {
    /// Creates an empty session.
    pub fn new(id: impl Into<String>, title: impl Into<String>, now: u64) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            turns: Vec::new(),
            updated_at: now,
        }
    }
}

impl SyncRecord for SessionRecord {
    fn updated_at(&self) -> u64 {
        self.updated_at
    }
}

/// A named collection of papers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRecord {
    /// Collection id, unique within the namespace.
    pub id: String,
    /// User-visible name.
    pub name: String,
    /// Member paper ids in display order.
    #[serde(default)]
    pub paper_ids: Vec<String>,
    /// Unix millis of the last local mutation.
    pub updated_at: u64,
    /// Whether the collection has been deleted.
    #[serde(default)]
    pub deleted: bool,
}

impl CollectionRecord {
    /// Creates an empty collection.
    pub fn new(id: impl Into<String>, name: impl Into<String>, now: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            paper_ids: Vec::new(),
            updated_at: now,
            deleted: false,
        }
    }
}

impl SyncRecord for CollectionRecord {
    fn updated_at(&self) -> u64 {
        self.updated_at
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// The aggregate membership blob: which papers the user's library holds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LitMembership {
    /// Ids of every paper in the library.
    #[serde(default)]
    pub paper_ids: BTreeSet<String>,
    /// Unix millis of the last local mutation.
    pub updated_at: u64,
}

impl LitMembership {
    /// Whether a paper is in the library.
    pub fn contains(&self, paper_id: &str) -> bool {
        self.paper_ids.contains(paper_id)
    }
}

impl SyncRecord for LitMembership {
    fn updated_at(&self) -> u64 {
        self.updated_at
    }
}

/// Per-paper user metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperMeta {
    /// The paper this metadata belongs to.
    pub paper_id: String,
    /// Whether the user starred the paper.
    #[serde(default)]
    pub starred: bool,
    /// Free-form note.
    #[serde(default)]
    pub note: Option<String>,
    /// User tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Unix millis of the last local mutation.
    pub updated_at: u64,
    /// Whether the metadata record has been deleted.
    #[serde(default)]
    pub deleted: bool,
}

impl PaperMeta {
    /// Creates empty metadata for a paper.
    pub fn new(paper_id: impl Into<String>, now: u64) -> Self {
        Self {
            paper_id: paper_id.into(),
            starred: false,
            note: None,
            tags: Vec::new(),
            updated_at: now,
            deleted: false,
        }
    }

    /// The payload pushed for a locally-absent record.
    pub fn tombstone(paper_id: impl Into<String>, now: u64) -> Self {
        Self {
            paper_id: paper_id.into(),
            starred: false,
            note: None,
            tags: Vec::new(),
            updated_at: now,
            deleted: true,
        }
    }
}

impl SyncRecord for PaperMeta {
    fn updated_at(&self) -> u64 {
        self.updated_at
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tombstone_is_deleted() {
        let meta = PaperMeta::tombstone("p1", 500);
        assert!(meta.is_deleted());
        assert_eq!(meta.updated_at(), 500);
        assert_eq!(meta.paper_id, "p1");
    }

    #[test]
    fn live_records_are_not_deleted() {
        let session = SessionRecord::new("s1", "Reading notes", 100);
        assert!(!session.is_deleted());

        let meta = PaperMeta::new("p1", 100);
        assert!(!meta.is_deleted());
    }

    #[test]
    fn collection_tombstone_flag() {
        let mut collection = CollectionRecord::new("c1", "To read", 100);
        assert!(!collection.is_deleted());

        collection.deleted = true;
        collection.updated_at = 200;
        assert!(collection.is_deleted());
        assert_eq!(collection.updated_at(), 200);
    }

    #[test]
    fn wire_names_are_camel_case() {
        let meta = PaperMeta::new("p1", 100);
        let json = serde_json::to_value(&meta).unwrap();
        let obj = json.as_object().unwrap();
        assert!(obj.contains_key("paperId"));
        assert!(obj.contains_key("updatedAt"));

        let membership = LitMembership::default();
        let json = serde_json::to_value(&membership).unwrap();
        assert!(json.as_object().unwrap().contains_key("paperIds"));
    }

    #[test]
    fn session_turns_roundtrip() {
        let mut session = SessionRecord::new("s1", "Survey", 100);
        session.turns.push(SessionTurn {
            role: TurnRole::User,
            text: "summarize the abstract".into(),
            at: 100,
        });
        session.turns.push(SessionTurn {
            role: TurnRole::Assistant,
            text: "It proposes ...".into(),
            at: 101,
        });

        let json = serde_json::to_string(&session).unwrap();
        let back: SessionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, session);
        assert!(json.contains("\"role\":\"user\""));
    }

    #[test]
    fn missing_optional_fields_default() {
        let back: CollectionRecord =
            serde_json::from_str(r#"{"id":"c1","name":"Inbox","updatedAt":7}"#).unwrap();
        assert!(back.paper_ids.is_empty());
        assert!(!back.deleted);
    }
}
