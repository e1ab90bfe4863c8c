//! Domain-prefixed key naming.

/// Key naming for one sync namespace.
///
/// All synced keys are domain-prefixed strings under a single
/// namespace, e.g. `"folio.sessions.index"` or
/// `"folio.session.abc123"`. Prefix membership is how a domain adapter
/// filters the shared dirty-key list down to its own scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    ns: String,
}

impl KeySpace {
    /// Creates a key space for a namespace.
    pub fn new(ns: impl Into<String>) -> Self {
        Self { ns: ns.into() }
    }

    /// The namespace.
    pub fn ns(&self) -> &str {
        &self.ns
    }

    /// `"<ns>.sessions.index"` — the sessions domain index.
    pub fn sessions_index(&self) -> String {
        format!("{}.sessions.index", self.ns)
    }

    /// `"<ns>.session.<id>"` — one session.
    pub fn session(&self, id: &str) -> String {
        format!("{}{}", self.session_prefix(), id)
    }

    /// Prefix of all per-session keys.
    pub fn session_prefix(&self) -> String {
        format!("{}.session.", self.ns)
    }

    /// `"<ns>.collections.index"` — the collections domain index.
    pub fn collections_index(&self) -> String {
        format!("{}.collections.index", self.ns)
    }

    /// `"<ns>.collection.<id>"` — one collection.
    pub fn collection(&self, id: &str) -> String {
        format!("{}{}", self.collection_prefix(), id)
    }

    /// Prefix of all per-collection keys.
    pub fn collection_prefix(&self) -> String {
        format!("{}.collection.", self.ns)
    }

    /// Prefix of the whole literature domain (membership and metadata).
    pub fn lit_prefix(&self) -> String {
        format!("{}.lit.", self.ns)
    }

    /// `"<ns>.lit.membership"` — the aggregate membership blob.
    pub fn lit_membership(&self) -> String {
        format!("{}.lit.membership", self.ns)
    }

    /// `"<ns>.lit.meta.<paperId>"` — one paper's metadata.
    pub fn lit_meta(&self, paper_id: &str) -> String {
        format!("{}{}", self.lit_meta_prefix(), paper_id)
    }

    /// Prefix of all per-paper metadata keys.
    pub fn lit_meta_prefix(&self) -> String {
        format!("{}.lit.meta.", self.ns)
    }
}

/// Extracts the id component of a prefixed key.
///
/// Returns `None` when the key does not start with the prefix.
pub fn id_in<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(prefix).filter(|id| !id.is_empty())
}
