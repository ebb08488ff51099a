//! Error kinds for authentication, fetching, and per-collection sync

use std::time::Duration;

use crate::sync::StopReason;

/// Obtaining a usable access token failed
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token request failed: {0}")]
    Request(String),

    #[error("token response missing {0}")]
    IncompleteResponse(&'static str),

    #[error("token endpoint rejected credentials: {0}")]
    Rejected(String),
}

/// A single remote call failed
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("API returned status {status}")]
    Api { status: u16 },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Why one collection's round did not complete
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("collection '{name}' does not exist or is not accessible")]
    Validation { name: String },

    #[error(transparent)]
    Fetch(FetchError),

    #[error("fetch returned no posts ({0:?})")]
    EmptyFetch(StopReason),

    #[error("shutdown requested before the fetch finished")]
    Interrupted,

    #[error("record store failure: {0:#}")]
    Store(anyhow::Error),
}

impl From<FetchError> for SyncError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Auth(auth) => SyncError::Auth(auth),
            other => SyncError::Fetch(other),
        }
    }
}
