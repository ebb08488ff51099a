//! Collection (subreddit) sync state and pagination primitives

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which listing of a collection to page through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingMode {
    #[default]
    New,
    Hot,
    Rising,
    Top,
}

impl ListingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingMode::New => "new",
            ListingMode::Hot => "hot",
            ListingMode::Rising => "rising",
            ListingMode::Top => "top",
        }
    }
}

impl std::fmt::Display for ListingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ListingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "new" => Ok(ListingMode::New),
            "hot" => Ok(ListingMode::Hot),
            "rising" => Ok(ListingMode::Rising),
            "top" => Ok(ListingMode::Top),
            other => Err(format!("unknown listing mode: {}", other)),
        }
    }
}

/// Opaque pagination continuation token
///
/// Only meaningful within a single paginated fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Cursor {
    After(String),
    Before(String),
}

impl Cursor {
    /// Query parameter name and value for this cursor
    pub fn as_query(&self) -> (&'static str, &str) {
        match self {
            Cursor::After(v) => ("after", v),
            Cursor::Before(v) => ("before", v),
        }
    }
}

/// Where a collection is in its sync lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No stored data yet; the next round does a full initial fetch
    Bootstrapping,
    /// A watermark exists; rounds only fetch newer posts
    Incremental,
}

/// Per-collection sync state
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionState {
    pub name: String,
    pub phase: SyncPhase,
    watermark: Option<DateTime<Utc>>,
}

impl CollectionState {
    /// State for a collection that has never been stored
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: SyncPhase::Bootstrapping,
            watermark: None,
        }
    }

    /// Latest creation time seen for this collection
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }

    /// Move the watermark forward. Older or equal timestamps are ignored.
    ///
    /// Returns true if the watermark changed.
    pub fn advance(&mut self, candidate: DateTime<Utc>) -> bool {
        match self.watermark {
            Some(current) if candidate <= current => false,
            _ => {
                self.watermark = Some(candidate);
                true
            }
        }
    }

    /// Enter the incremental phase, seeding the watermark from stored data
    pub fn mark_incremental(&mut self, stored_max: Option<DateTime<Utc>>) {
        if let Some(ts) = stored_max {
            self.advance(ts);
        }
        self.phase = SyncPhase::Incremental;
    }

    /// True if `created_at` is strictly newer than the watermark
    pub fn is_newer(&self, created_at: DateTime<Utc>) -> bool {
        self.watermark.is_none_or(|w| created_at > w)
    }
}

/// Check a collection name against reddit's naming rules.
///
/// Names are 2-21 characters of ASCII letters, digits, or underscores. Names
/// are also used as file names, so anything else is rejected up front.
pub fn validate_collection_name(name: &str) -> bool {
    (2..=21).contains(&name.len())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
