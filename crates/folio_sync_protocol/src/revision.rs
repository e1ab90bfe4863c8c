//! Opaque revision tokens and versioned values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque version token assigned by the remote store on every
/// successful write.
///
/// Two reads of the same unmodified remote value return the same
/// revision; any successful write produces a revision different from
/// all previous ones for that key. Revisions are compared for equality
/// only and never parsed or ordered by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// Wraps a token returned by the store.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Revision {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl From<String> for Revision {
    fn from(token: String) -> Self {
        Self(token)
    }
}

/// A value paired with the revision the store assigned to it.
///
/// This is the unit exchanged with the remote store in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedValue<T> {
    /// The stored value.
    pub value: T,
    /// The revision the store reported for this value.
    pub revision: Revision,
}

impl<T> VersionedValue<T> {
    /// Pairs a value with its revision.
    pub fn new(value: T, revision: Revision) -> Self {
        Self { value, revision }
    }
}
