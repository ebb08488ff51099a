//! Configuration loading for the poller
//!
//! Two files live in the Trawler config directory:
//! - `credentials.json`: reddit script-app secrets plus the cached access token
//! - `trawler.json`: optional sync settings, every field defaulted

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::ListingMode;
use crate::reddit::Token;
use crate::sync::{RateLimiter, SyncOptions, UnknownQuota};

/// Credentials filename in the Trawler config directory
pub const CREDENTIALS_FILE: &str = "credentials.json";

/// Settings filename in the Trawler config directory
pub const SETTINGS_FILE: &str = "trawler.json";

/// Secrets for reddit's password grant
#[derive(Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
}

impl std::fmt::Debug for RedditCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditCredentials")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

/// On-disk credential file format
#[derive(Deserialize)]
struct CredentialFile {
    user_agent: String,
    username: String,
    password: String,
    client_id: String,
    client_secret: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    token_expires: Option<String>,
}

/// Source of long-lived secrets and sink for refreshed tokens
pub trait CredentialStore: Send + Sync {
    /// Load credentials and the last persisted token, if one is usable
    fn load(&self) -> Result<(RedditCredentials, Option<Token>)>;

    /// Persist a freshly issued token
    fn persist_token(&self, token: &Token) -> Result<()>;
}

/// Credential store backed by a JSON file
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at ~/.config/trawler/credentials.json
    pub fn default_location() -> Result<Self> {
        let path =
            config::config_path(CREDENTIALS_FILE).context("Could not determine config directory")?;
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<(RedditCredentials, Option<Token>)> {
        let file: CredentialFile = config::load_json_file(&self.path)?;

        let token = match (file.token, file.token_expires) {
            (Some(value), Some(expires)) if !value.is_empty() => {
                parse_expiry(&expires).map(|expires_at| Token { value, expires_at })
            }
            _ => None,
        };

        let credentials = RedditCredentials {
            client_id: file.client_id,
            client_secret: file.client_secret,
            username: file.username,
            password: file.password,
            user_agent: file.user_agent,
        };

        Ok((credentials, token))
    }

    /// Overlay `token` and `token_expires` onto the existing file
    ///
    /// The whole document is re-read so fields this crate doesn't know about
    /// survive, and the result replaces the file atomically.
    fn persist_token(&self, token: &Token) -> Result<()> {
        let mut document: Value = config::load_json_file(&self.path)?;
        let fields = document
            .as_object_mut()
            .with_context(|| format!("{} is not a JSON object", self.path.display()))?;

        fields.insert("token".to_string(), Value::String(token.value.clone()));
        fields.insert(
            "token_expires".to_string(),
            Value::String(token.expires_at.to_rfc3339()),
        );

        config::save_json_file(&self.path, &document)
    }
}

/// Parse a stored expiry timestamp
///
/// Accepts RFC 3339, or a naive ISO-8601 timestamp interpreted as local time.
pub fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Poller settings, loaded from `trawler.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Collections (subreddit names) to track
    pub collections: Vec<String>,
    pub mode: ListingMode,
    /// Posts fetched the first time a collection is seen
    pub bootstrap_count: usize,
    /// Page size of the first incremental round after start
    pub initial_page_size: usize,
    /// Page size of every later incremental round
    pub steady_page_size: usize,
    pub round_interval_secs: u64,
    /// Remaining-quota level below which requests are paced
    pub rate_low_water: f64,
    pub rate_backoff_ms: u64,
    pub unknown_quota: UnknownQuota,
    pub max_rate_limit_retries: u32,
    pub auth_backoff_secs: u64,
    /// Overrides ~/.local/share/trawler
    pub data_dir: Option<PathBuf>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            collections: Vec::new(),
            mode: ListingMode::New,
            bootstrap_count: 1000,
            initial_page_size: 1000,
            steady_page_size: 20,
            round_interval_secs: 300,
            rate_low_water: 100.0,
            rate_backoff_ms: 1000,
            unknown_quota: UnknownQuota::AssumeSafe,
            max_rate_limit_retries: 3,
            auth_backoff_secs: 30,
            data_dir: None,
        }
    }
}

impl SyncSettings {
    /// Load settings from ~/.config/trawler/trawler.json, or defaults if absent
    pub fn load() -> Result<Self> {
        if config::config_exists(SETTINGS_FILE) {
            return config::load_json(SETTINGS_FILE);
        }
        Ok(Self::default())
    }

    /// Load settings from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_json_file(path)
    }

    /// Directory for per-collection record stores
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => config::data_dir().context("Could not determine data directory"),
        }
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(
            self.rate_low_water,
            Duration::from_millis(self.rate_backoff_ms),
            self.unknown_quota,
        )
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            mode: self.mode,
            bootstrap_count: self.bootstrap_count,
            initial_page_size: self.initial_page_size,
            steady_page_size: self.steady_page_size,
            round_interval: Duration::from_secs(self.round_interval_secs),
            auth_backoff: Duration::from_secs(self.auth_backoff_secs),
            max_rate_limit_retries: self.max_rate_limit_retries,
            limiter: self.rate_limiter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_credentials(dir: &Path, extra: Value) -> PathBuf {
        let mut doc = json!({
            "user_agent": "trawler/0.1 (by /u/someone)",
            "username": "someone",
            "password": "hunter2",
            "client_id": "cid",
            "client_secret": "csecret"
        });
        if let (Some(base), Some(extra)) = (doc.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        let path = dir.join(CREDENTIALS_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(&doc).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_load_without_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_credentials(dir.path(), json!({}));

        let (creds, token) = FileCredentialStore::new(path).load().unwrap();
        assert_eq!(creds.username, "someone");
        assert_eq!(creds.client_id, "cid");
        assert!(token.is_none());
    }

    #[test]
    fn test_load_with_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_credentials(
            dir.path(),
            json!({"token": "abc", "token_expires": "2030-01-01T00:00:00+00:00"}),
        );

        let (_, token) = FileCredentialStore::new(path).load().unwrap();
        let token = token.unwrap();
        assert_eq!(token.value, "abc");
        assert_eq!(token.expires_at.timestamp(), 1_893_456_000);
    }

    #[test]
    fn test_empty_token_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_credentials(
            dir.path(),
            json!({"token": "", "token_expires": "2030-01-01T00:00:00+00:00"}),
        );

        let (_, token) = FileCredentialStore::new(path).load().unwrap();
        assert!(token.is_none());
    }

    #[test]
    fn test_persist_token_preserves_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_credentials(dir.path(), json!({"note": "keep me"}));
        let store = FileCredentialStore::new(&path);

        let token = Token {
            value: "fresh".into(),
            expires_at: DateTime::from_timestamp(2_000_000_000, 0).unwrap(),
        };
        store.persist_token(&token).unwrap();

        let doc: Value = config::load_json_file(&path).unwrap();
        assert_eq!(doc["token"], "fresh");
        assert_eq!(doc["note"], "keep me");
        assert_eq!(doc["password"], "hunter2");

        let (_, reloaded) = store.load().unwrap();
        assert_eq!(reloaded, Some(token));
    }

    #[test]
    fn test_parse_expiry_formats() {
        assert_eq!(
            parse_expiry("2030-01-01T00:00:00Z").map(|d| d.timestamp()),
            Some(1_893_456_000)
        );
        assert!(parse_expiry("2025-03-01T12:30:45.123456").is_some());
        assert!(parse_expiry("not a date").is_none());
    }

    #[test]
    fn test_settings_defaults_fill_missing_fields() {
        let settings: SyncSettings =
            serde_json::from_str(r#"{"collections": ["sweden"], "mode": "hot"}"#).unwrap();
        assert_eq!(settings.collections, vec!["sweden".to_string()]);
        assert_eq!(settings.mode, ListingMode::Hot);
        assert_eq!(settings.bootstrap_count, 1000);
        assert_eq!(settings.steady_page_size, 20);
        assert_eq!(settings.round_interval_secs, 300);

        let options = settings.sync_options();
        assert_eq!(options.round_interval, Duration::from_secs(300));
    }
}
