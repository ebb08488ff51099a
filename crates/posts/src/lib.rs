//! Posts crate - Incremental collection polling
//!
//! This crate provides the pieces behind the Trawler poller:
//! - Domain models (Post, PostRecord, CollectionState)
//! - Reddit API client and OAuth token lifecycle
//! - Record store trait with in-memory and SQLite implementations
//! - Paginated fetching, rate pacing, and the round-based sync loop
//!
//! Everything is synchronous. Callers that live inside an async runtime should
//! drive [`SyncLoop`] from a blocking thread.

pub mod config;
pub mod error;
pub mod models;
pub mod reddit;
pub mod storage;
pub mod sync;

pub use self::config::{CredentialStore, FileCredentialStore, RedditCredentials, SyncSettings};
pub use error::{AuthError, FetchError, SyncError};
pub use models::{CollectionState, Cursor, ListingMode, Post, PostId, PostRecord, SyncPhase};
pub use reddit::{PasswordGrantIssuer, RedditClient, Token, TokenIssuer, TokenManager};
pub use storage::{InMemoryRecordStore, MergeSummary, RecordStore, SqliteRecordStore};
pub use sync::{
    // Fetching
    CollectionFetcher, FetchOutcome, PageRequest, PageSource, StopReason,
    // Looping
    CollectionOutcome, RoundReport, SyncLoop, SyncOptions,
    // Pacing and shutdown
    RateLimiter, ShutdownSignal, Sleeper,
};
