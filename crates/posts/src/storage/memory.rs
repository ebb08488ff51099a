//! In-memory record store
//!
//! Used for testing and for dry runs that should not touch disk.

use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{RecordStore, sort_newest_first};
use crate::models::PostRecord;

/// In-memory implementation of RecordStore
#[derive(Default)]
pub struct InMemoryRecordStore {
    tables: RwLock<HashMap<String, Vec<PostRecord>>>,
}

impl InMemoryRecordStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of every collection with stored rows
    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .read()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl RecordStore for InMemoryRecordStore {
    fn exists(&self, collection: &str) -> Result<bool> {
        let tables = self.tables.read().map_err(|_| anyhow!("record store lock poisoned"))?;
        Ok(tables.contains_key(collection))
    }

    fn load(&self, collection: &str) -> Result<Vec<PostRecord>> {
        let tables = self.tables.read().map_err(|_| anyhow!("record store lock poisoned"))?;
        Ok(tables.get(collection).cloned().unwrap_or_default())
    }

    fn save(&self, collection: &str, records: &[PostRecord]) -> Result<()> {
        let mut rows = records.to_vec();
        sort_newest_first(&mut rows);

        let mut tables = self
            .tables
            .write()
            .map_err(|_| anyhow!("record store lock poisoned"))?;
        tables.insert(collection.to_string(), rows);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn record(id: &str, secs: i64) -> PostRecord {
        PostRecord::new(id, DateTime::from_timestamp(secs, 0).unwrap())
    }

    #[test]
    fn test_missing_collection() {
        let store = InMemoryRecordStore::new();
        assert!(!store.exists("sweden").unwrap());
        assert!(store.load("sweden").unwrap().is_empty());
        assert_eq!(store.latest_timestamp("sweden").unwrap(), None);
    }

    #[test]
    fn test_save_sorts_newest_first() {
        let store = InMemoryRecordStore::new();
        store
            .save("sweden", &[record("a", 100), record("c", 300), record("b", 200)])
            .unwrap();

        let loaded = store.load("sweden").unwrap();
        let ids: Vec<_> = loaded.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
        assert_eq!(store.latest_timestamp("sweden").unwrap().map(|t| t.timestamp()), Some(300));
    }

    #[test]
    fn test_empty_save_still_exists() {
        let store = InMemoryRecordStore::new();
        store.save("sweden", &[]).unwrap();
        assert!(store.exists("sweden").unwrap());
        assert_eq!(store.collections(), vec!["sweden".to_string()]);
    }

    #[test]
    fn test_merge_and_dedupe() {
        let store = InMemoryRecordStore::new();
        store.save("sweden", &[record("a", 100), record("a", 100)]).unwrap();

        assert_eq!(store.dedupe("sweden").unwrap(), 1);
        assert_eq!(store.dedupe("sweden").unwrap(), 0);

        let summary = store.merge("sweden", vec![record("b", 200)]).unwrap();
        assert_eq!(summary.added, 1);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.latest.map(|t| t.timestamp()), Some(200));
    }
}
