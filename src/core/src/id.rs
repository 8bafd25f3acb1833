//! Stable string identifiers shared by jobs, step results and artifacts.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A stable identifier, serialized as a lowercase hyphenated UUIDv4 string.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Id(String);

impl Id {
    /// Generate a new, random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an existing string as an `Id`, e.g. when loading from storage.
    #[must_use]
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Borrow the identifier as a plain string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Id {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<Id> for String {
    fn from(id: Id) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_unique() {
        assert_ne!(Id::new(), Id::new());
    }

    #[test]
    fn test_roundtrip_through_string() {
        let id = Id::new();
        let again = Id::from_string(id.as_str().to_owned());

        assert_eq!(id, again);
    }
}
