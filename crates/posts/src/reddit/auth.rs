//! Reddit OAuth2 token lifecycle
//!
//! Implements the password grant ("script" app) flow and keeps a single access
//! token fresh for the lifetime of the process. Uses synchronous HTTP (ureq).

use std::sync::Mutex;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, trace, warn};

use super::api::TokenResponse;
use crate::config::{CredentialStore, RedditCredentials};
use crate::error::AuthError;

/// An access token and the instant it stops working
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// True if the token is still usable `margin` after `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: TimeDelta) -> bool {
        now + margin < self.expires_at
    }
}

/// Token as returned by the issuing endpoint, before it is anchored in time
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: Duration,
}

/// Remote endpoint that hands out access tokens
pub trait TokenIssuer: Send + Sync {
    fn request_token(&self, credentials: &RedditCredentials) -> Result<IssuedToken, AuthError>;
}

/// Password-grant issuer against reddit's token endpoint
pub struct PasswordGrantIssuer {
    agent: ureq::Agent,
    token_url: String,
}

impl PasswordGrantIssuer {
    const TOKEN_URL: &'static str = "https://www.reddit.com/api/v1/access_token";

    pub fn new() -> Self {
        Self::with_url(Self::TOKEN_URL)
    }

    pub fn with_url(token_url: impl Into<String>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(30)))
            .build()
            .into();

        Self {
            agent,
            token_url: token_url.into(),
        }
    }
}

impl Default for PasswordGrantIssuer {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenIssuer for PasswordGrantIssuer {
    fn request_token(&self, credentials: &RedditCredentials) -> Result<IssuedToken, AuthError> {
        let basic = STANDARD.encode(format!(
            "{}:{}",
            credentials.client_id, credentials.client_secret
        ));

        let mut response = self
            .agent
            .post(&self.token_url)
            .header("Authorization", &format!("Basic {}", basic))
            .header("User-Agent", &credentials.user_agent)
            .send_form([
                ("grant_type", "password"),
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Rejected(format!("status {}", status.as_u16())));
        }

        let body: TokenResponse = response
            .body_mut()
            .read_json()
            .map_err(|e| AuthError::Request(format!("unreadable token response: {}", e)))?;

        parse_token_response(body)
    }
}

fn parse_token_response(body: TokenResponse) -> Result<IssuedToken, AuthError> {
    if let Some(error) = body.error {
        return Err(AuthError::Rejected(error));
    }

    let access_token = body
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::IncompleteResponse("access_token"))?;
    let expires_in = body
        .expires_in
        .filter(|secs| *secs > 0)
        .ok_or(AuthError::IncompleteResponse("expires_in"))?;

    Ok(IssuedToken {
        access_token,
        expires_in: Duration::from_secs(expires_in as u64),
    })
}

/// Owns the process's access token
///
/// Every authenticated call goes through [`TokenManager::ensure_valid`], which
/// refreshes the token when it is within the safety margin of expiring and
/// hands each refreshed token to the [`CredentialStore`] so a restart can
/// reuse it.
pub struct TokenManager {
    credentials: RedditCredentials,
    token: Mutex<Option<Token>>,
    issuer: Box<dyn TokenIssuer>,
    store: Box<dyn CredentialStore>,
    margin: TimeDelta,
}

impl TokenManager {
    /// Tokens closer than this to expiry are refreshed
    pub const SAFETY_MARGIN_SECS: i64 = 3600;

    pub fn new(
        credentials: RedditCredentials,
        token: Option<Token>,
        issuer: Box<dyn TokenIssuer>,
        store: Box<dyn CredentialStore>,
    ) -> Self {
        Self {
            credentials,
            token: Mutex::new(token),
            issuer,
            store,
            margin: TimeDelta::seconds(Self::SAFETY_MARGIN_SECS),
        }
    }

    /// Load credentials and any saved token from `store`
    pub fn from_store(
        store: Box<dyn CredentialStore>,
        issuer: Box<dyn TokenIssuer>,
    ) -> anyhow::Result<Self> {
        let (credentials, token) = store.load()?;
        Ok(Self::new(credentials, token, issuer, store))
    }

    pub fn user_agent(&self) -> &str {
        &self.credentials.user_agent
    }

    /// Snapshot of the current token, if any
    pub fn current_token(&self) -> Option<Token> {
        self.lock().clone()
    }

    /// Return an access token valid for at least the safety margin
    pub fn ensure_valid(&self) -> Result<String, AuthError> {
        self.ensure_valid_at(Utc::now())
    }

    /// [`ensure_valid`](Self::ensure_valid) with an explicit clock reading
    pub fn ensure_valid_at(&self, now: DateTime<Utc>) -> Result<String, AuthError> {
        let mut guard = self.lock();

        if let Some(token) = guard.as_ref()
            && token.is_valid_at(now, self.margin)
        {
            trace!("Access token valid until {}, no refresh needed", token.expires_at);
            return Ok(token.value.clone());
        }

        debug!("Requesting new access token for {}", self.credentials.username);
        let issued = self.issuer.request_token(&self.credentials)?;
        let lifetime = TimeDelta::from_std(issued.expires_in)
            .map_err(|_| AuthError::IncompleteResponse("expires_in"))?;

        let token = Token {
            value: issued.access_token,
            expires_at: now + lifetime,
        };

        if lifetime <= self.margin {
            warn!(
                "Issued token lives {}s, shorter than the {}s refresh margin",
                lifetime.num_seconds(),
                self.margin.num_seconds()
            );
        }

        if let Err(e) = self.store.persist_token(&token) {
            warn!("Failed to persist refreshed token: {:#}", e);
        }

        info!("Access token refreshed, expires at {}", token.expires_at);
        let value = token.value.clone();
        *guard = Some(token);
        Ok(value)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Token>> {
        self.token.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingIssuer {
        calls: Arc<AtomicUsize>,
        lifetime: Duration,
    }

    impl TokenIssuer for CountingIssuer {
        fn request_token(&self, _: &RedditCredentials) -> Result<IssuedToken, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(IssuedToken {
                access_token: format!("token-{}", n),
                expires_in: self.lifetime,
            })
        }
    }

    struct FailingIssuer;

    impl TokenIssuer for FailingIssuer {
        fn request_token(&self, _: &RedditCredentials) -> Result<IssuedToken, AuthError> {
            Err(AuthError::IncompleteResponse("access_token"))
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        persisted: Arc<Mutex<Vec<Token>>>,
    }

    impl CredentialStore for RecordingStore {
        fn load(&self) -> anyhow::Result<(RedditCredentials, Option<Token>)> {
            Ok((credentials(), None))
        }

        fn persist_token(&self, token: &Token) -> anyhow::Result<()> {
            self.persisted.lock().unwrap().push(token.clone());
            Ok(())
        }
    }

    fn credentials() -> RedditCredentials {
        RedditCredentials {
            client_id: "id".into(),
            client_secret: "secret".into(),
            username: "user".into(),
            password: "pass".into(),
            user_agent: "trawler-test/0.1".into(),
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn manager_expiring_at(
        expires_at: DateTime<Utc>,
    ) -> (TokenManager, Arc<AtomicUsize>, Arc<Mutex<Vec<Token>>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = RecordingStore::default();
        let persisted = store.persisted.clone();
        let manager = TokenManager::new(
            credentials(),
            Some(Token {
                value: "old".into(),
                expires_at,
            }),
            Box::new(CountingIssuer {
                calls: calls.clone(),
                lifetime: Duration::from_secs(86_400),
            }),
            Box::new(store),
        );
        (manager, calls, persisted)
    }

    #[test]
    fn test_no_refresh_before_margin() {
        let expiry = ts(100_000);
        let (manager, calls, persisted) = manager_expiring_at(expiry);

        let value = manager.ensure_valid_at(expiry - TimeDelta::seconds(3601)).unwrap();

        assert_eq!(value, "old");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(persisted.lock().unwrap().is_empty());
    }

    #[test]
    fn test_refresh_at_margin_boundary() {
        let expiry = ts(100_000);
        let (manager, calls, persisted) = manager_expiring_at(expiry);

        let value = manager.ensure_valid_at(expiry - TimeDelta::seconds(3600)).unwrap();

        assert_eq!(value, "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let new_expiry = manager.current_token().unwrap().expires_at;
        assert!(new_expiry > expiry);
        assert_eq!(persisted.lock().unwrap().len(), 1);
        assert_eq!(persisted.lock().unwrap()[0].value, "token-1");
    }

    #[test]
    fn test_refresh_after_expiry() {
        let expiry = ts(100_000);
        let (manager, calls, _) = manager_expiring_at(expiry);

        manager.ensure_valid_at(expiry + TimeDelta::seconds(10)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Fresh token is reused for subsequent calls
        manager.ensure_valid_at(expiry + TimeDelta::seconds(20)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_token_forces_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = TokenManager::new(
            credentials(),
            None,
            Box::new(CountingIssuer {
                calls: calls.clone(),
                lifetime: Duration::from_secs(86_400),
            }),
            Box::new(RecordingStore::default()),
        );

        assert_eq!(manager.ensure_valid_at(ts(0)).unwrap(), "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_refresh_is_auth_error() {
        let manager = TokenManager::new(
            credentials(),
            None,
            Box::new(FailingIssuer),
            Box::new(RecordingStore::default()),
        );

        let err = manager.ensure_valid_at(ts(0)).unwrap_err();
        assert!(matches!(err, AuthError::IncompleteResponse("access_token")));
        assert!(manager.current_token().is_none());
    }

    #[test]
    fn test_parse_token_response() {
        let ok = parse_token_response(TokenResponse {
            access_token: Some("abc".into()),
            expires_in: Some(86400),
            token_type: Some("bearer".into()),
            error: None,
        })
        .unwrap();
        assert_eq!(ok.access_token, "abc");
        assert_eq!(ok.expires_in, Duration::from_secs(86400));

        let rejected = parse_token_response(TokenResponse {
            access_token: None,
            expires_in: None,
            token_type: None,
            error: Some("invalid_grant".into()),
        });
        assert!(matches!(rejected, Err(AuthError::Rejected(_))));

        let no_expiry = parse_token_response(TokenResponse {
            access_token: Some("abc".into()),
            expires_in: None,
            token_type: None,
            error: None,
        });
        assert!(matches!(
            no_expiry,
            Err(AuthError::IncompleteResponse("expires_in"))
        ));
    }
}
