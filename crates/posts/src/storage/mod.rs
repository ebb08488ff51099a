//! Record store traits and implementations
//!
//! Each collection has its own table of [`PostRecord`](crate::models::PostRecord)
//! rows. The trait-based design allows swapping between in-memory and
//! SQLite-backed stores.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryRecordStore;
pub use sqlite::SqliteRecordStore;
pub use traits::{MergeSummary, RecordStore, dedupe_by_id, merge_records, sort_newest_first};
