//! Persistence gateway for roster, consist and turnout documents.
//!
//! Every persisted object is a JSON document addressed by a file name
//! (`locoroster.json`, `roster-3.json`, `turnouts.json`, ...). The registries
//! treat the store as fire-and-forget: errors are logged, never retried.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::StoreError;

/// Key/value store of JSON documents keyed by file name.
///
/// # Implementations
///
/// - [`crate::hal::MemoryStore`]: in-memory map, for tests
/// - [`crate::hal::FileStore`]: one file per document in a directory
pub trait ConfigStore: Send + Sync {
    /// Whether a document named `name` exists.
    fn exists(&self, name: &str) -> bool;

    /// Load the document `name`.
    ///
    /// Returns [`StoreError::Missing`] when it does not exist.
    fn load(&self, name: &str) -> Result<Value, StoreError>;

    /// Create or replace the document `name`.
    fn store(&self, name: &str, document: &Value) -> Result<(), StoreError>;

    /// Delete the document `name`. Deleting a missing document is not an error.
    fn remove(&self, name: &str) -> Result<(), StoreError>;
}

/// Load and deserialize a typed document.
pub fn load_as<T: DeserializeOwned>(store: &dyn ConfigStore, name: &str) -> Result<T, StoreError> {
    let value = store.load(name)?;
    serde_json::from_value(value).map_err(|source| StoreError::Json {
        name: name.to_string(),
        source,
    })
}

/// Serialize and store a typed document.
pub fn store_as<T: Serialize>(
    store: &dyn ConfigStore,
    name: &str,
    document: &T,
) -> Result<(), StoreError> {
    let value = serde_json::to_value(document).map_err(|source| StoreError::Json {
        name: name.to_string(),
        source,
    })?;
    store.store(name, &value)
}

/// Remove `name` if it exists, logging failures.
pub(crate) fn remove_logged(store: &dyn ConfigStore, name: &str) {
    if store.exists(name) {
        if let Err(e) = store.remove(name) {
            tracing::warn!(file = name, error = %e, "failed to remove document");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MemoryStore;
    use crate::roster::RosterEntry;

    #[test]
    fn typed_round_trip() {
        let store = MemoryStore::new();
        let entry = RosterEntry::new(3).with_description("Switcher");
        store_as(&store, "roster-3.json", &entry).unwrap();
        let back: RosterEntry = load_as(&store, "roster-3.json").unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn load_missing_document() {
        let store = MemoryStore::new();
        let err = load_as::<RosterEntry>(&store, "nope.json").unwrap_err();
        assert!(matches!(err, StoreError::Missing(name) if name == "nope.json"));
    }

    #[test]
    fn load_malformed_document() {
        let store = MemoryStore::new();
        store
            .store("roster-3.json", &serde_json::json!({"address": "three"}))
            .unwrap();
        let err = load_as::<RosterEntry>(&store, "roster-3.json").unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));
    }

    #[test]
    fn remove_logged_ignores_missing() {
        let store = MemoryStore::new();
        remove_logged(&store, "missing.json");
        store.store("a.json", &serde_json::json!({})).unwrap();
        remove_logged(&store, "a.json");
        assert!(!store.exists("a.json"));
    }
}
