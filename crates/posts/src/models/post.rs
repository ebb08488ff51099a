//! Post model representing one item of a collection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Unique identifier for a post (reddit base-36 ID, e.g. "1abcde")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PostId(pub String);

impl PostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PostId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PostId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for PostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fetched post
///
/// Only the identifier and creation time are guaranteed. Everything else the
/// API returned is kept in `attributes` and read through the typed accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub created_at: DateTime<Utc>,
    pub attributes: Map<String, Value>,
}

impl Post {
    /// Create a post with no extra attributes
    pub fn new(id: impl Into<PostId>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at,
            attributes: Map::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn str_attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    pub fn i64_attr(&self, key: &str) -> Option<i64> {
        self.attributes
            .get(key)
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
    }

    pub fn f64_attr(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).and_then(Value::as_f64)
    }

    pub fn author(&self) -> &str {
        self.str_attr("author").unwrap_or("[deleted]")
    }

    pub fn title(&self) -> &str {
        self.str_attr("title").unwrap_or_default()
    }

    /// Project the open attribute map onto the record store's column set
    pub fn to_record(&self) -> PostRecord {
        PostRecord {
            id: self.id.clone(),
            author: self.author().to_string(),
            title: self.title().to_string(),
            selftext: self.str_attr("selftext").unwrap_or_default().to_string(),
            created_utc: self.created_at,
            ups: self.i64_attr("ups").unwrap_or(0),
            downs: self.i64_attr("downs").unwrap_or(0),
            upvote_ratio: self.f64_attr("upvote_ratio").unwrap_or(0.0),
            num_comments: self.i64_attr("num_comments").unwrap_or(0),
        }
    }
}

/// One row of a collection's record store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: PostId,
    pub author: String,
    pub title: String,
    pub selftext: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_utc: DateTime<Utc>,
    pub ups: i64,
    pub downs: i64,
    pub upvote_ratio: f64,
    pub num_comments: i64,
}

impl PostRecord {
    /// Minimal row with only identity and timestamp filled in
    pub fn new(id: impl Into<PostId>, created_utc: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            author: String::new(),
            title: String::new(),
            selftext: String::new(),
            created_utc,
            ups: 0,
            downs: 0,
            upvote_ratio: 0.0,
            num_comments: 0,
        }
    }
}
