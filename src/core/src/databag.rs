//! The mutable, opaque "data bag" shared between the steps of a single job.
//!
//! Processors read and write this value by key. It is intentionally left
//! untyped -- see the design notes in the project's spec for why this should
//! never be given a static shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON object, keyed by string, carried on a [`crate::Job`] and merged
/// into from each completed step's `output_data`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataBag(Map<String, Value>);

impl DataBag {
    /// Create an empty data bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a value by key, overwriting any existing value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let _ = self.0.insert(key.into(), value);
    }

    /// Shallow-merge another data bag's keys into this one, the other bag's
    /// values taking precedence on conflicting keys.
    pub fn merge(&mut self, other: Self) {
        for (key, value) in other.0 {
            let _ = self.0.insert(key, value);
        }
    }

    /// True if the bag has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for DataBag {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_overwrites_conflicting_keys() {
        let mut a = DataBag::new();
        a.set("x", json!(1));
        a.set("y", json!("keep"));

        let mut b = DataBag::new();
        b.set("x", json!(2));

        a.merge(b);

        assert_eq!(a.get("x"), Some(&json!(2)));
        assert_eq!(a.get("y"), Some(&json!("keep")));
    }

    #[test]
    fn test_new_bag_is_empty() {
        assert!(DataBag::new().is_empty());
    }
}
