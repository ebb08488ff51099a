//! Record store trait definitions

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::models::{PostId, PostRecord};

/// Outcome of a [`RecordStore::merge`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    /// Rows whose ID was not stored before
    pub added: usize,
    /// Rows stored after the merge
    pub total: usize,
    /// Newest `created_utc` after the merge
    pub latest: Option<DateTime<Utc>>,
}

/// Per-collection tabular persistence
///
/// Implementations only need `exists`, `load`, and `save`. The merge,
/// dedupe, and latest-timestamp operations default to a full
/// read-modify-write, which is safe as long as this process is the only
/// writer.
pub trait RecordStore: Send + Sync {
    /// True if anything has ever been saved for `collection`
    fn exists(&self, collection: &str) -> Result<bool>;

    /// All rows for `collection`, newest first. Empty if nothing is stored.
    fn load(&self, collection: &str) -> Result<Vec<PostRecord>>;

    /// Replace everything stored for `collection`
    fn save(&self, collection: &str, records: &[PostRecord]) -> Result<()>;

    /// Append `incoming`, drop rows sharing an ID, re-sort, and persist
    ///
    /// When an ID is already stored the incoming row replaces it.
    fn merge(&self, collection: &str, incoming: Vec<PostRecord>) -> Result<MergeSummary> {
        let existing = self.load(collection)?;
        let (merged, added) = merge_records(existing, incoming);
        self.save(collection, &merged)?;

        Ok(MergeSummary {
            added,
            total: merged.len(),
            latest: merged.first().map(|r| r.created_utc),
        })
    }

    /// Remove rows that repeat an earlier row's ID. Returns how many went.
    fn dedupe(&self, collection: &str) -> Result<usize> {
        let mut records = self.load(collection)?;
        let before = records.len();
        dedupe_by_id(&mut records);
        let removed = before - records.len();
        if removed > 0 {
            self.save(collection, &records)?;
        }
        Ok(removed)
    }

    /// Newest `created_utc` stored for `collection`
    fn latest_timestamp(&self, collection: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .load(collection)?
            .iter()
            .map(|r| r.created_utc)
            .max())
    }
}

/// Sort rows by `created_utc` descending, ties by ID
pub fn sort_newest_first(records: &mut [PostRecord]) {
    records.sort_by(|a, b| {
        b.created_utc
            .cmp(&a.created_utc)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Keep the first row for each ID, preserving order
pub fn dedupe_by_id(records: &mut Vec<PostRecord>) {
    let mut seen: HashSet<PostId> = HashSet::with_capacity(records.len());
    records.retain(|r| seen.insert(r.id.clone()));
}

/// Merge `incoming` into `existing`, returning the sorted result and the
/// number of IDs that were not present before
pub fn merge_records(
    existing: Vec<PostRecord>,
    incoming: Vec<PostRecord>,
) -> (Vec<PostRecord>, usize) {
    let known: HashSet<PostId> = existing.iter().map(|r| r.id.clone()).collect();

    let mut incoming = incoming;
    dedupe_by_id(&mut incoming);
    let added = incoming.iter().filter(|r| !known.contains(&r.id)).count();

    // Incoming first so the fresher copy wins the dedupe
    let mut merged = incoming;
    merged.extend(existing);
    dedupe_by_id(&mut merged);
    sort_newest_first(&mut merged);

    (merged, added)
}
