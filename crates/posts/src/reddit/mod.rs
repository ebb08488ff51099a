//! Reddit API integration
//!
//! This module provides:
//! - Password-grant token issuance and the token lifecycle manager
//! - Reddit API client for listing pages, collection lookups, and search
//! - Response normalization to domain models

mod auth;
mod client;
mod normalize;

pub use auth::{IssuedToken, PasswordGrantIssuer, Token, TokenIssuer, TokenManager};
pub use client::RedditClient;
pub use normalize::{NormalizeError, normalize_post, page_from_listing};

/// Reddit API response types
pub mod api {
    use serde::Deserialize;
    use serde_json::{Map, Value};

    /// Listing envelope: `{kind: "Listing", data: {children, after, before}}`
    #[derive(Debug, Deserialize)]
    pub struct ListingResponse {
        pub kind: Option<String>,
        #[serde(default)]
        pub data: ListingData,
    }

    #[derive(Debug, Default, Deserialize)]
    pub struct ListingData {
        #[serde(default)]
        pub children: Vec<Thing>,
        pub after: Option<String>,
        pub before: Option<String>,
        pub dist: Option<u32>,
    }

    /// One child of a listing (`kind` is "t3" for posts, "t5" for subreddits)
    #[derive(Debug, Deserialize)]
    pub struct Thing {
        pub kind: String,
        #[serde(default)]
        pub data: Map<String, Value>,
    }

    /// Response from `/r/{name}/about`
    #[derive(Debug, Deserialize)]
    pub struct AboutResponse {
        pub kind: String,
        #[serde(default)]
        pub data: AboutData,
    }

    #[derive(Debug, Default, Deserialize)]
    pub struct AboutData {
        pub display_name: Option<String>,
        pub subscribers: Option<u64>,
    }

    /// Response from the token endpoint
    ///
    /// Reddit answers bad credentials with 200 and an `error` field, so every
    /// field is optional.
    #[derive(Debug, Deserialize)]
    pub struct TokenResponse {
        pub access_token: Option<String>,
        pub expires_in: Option<i64>,
        pub token_type: Option<String>,
        pub error: Option<String>,
    }
}
