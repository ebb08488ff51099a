//! Reddit API HTTP client
//!
//! Fetches listing pages, checks collection existence, and searches
//! collection names. Uses synchronous HTTP (ureq) to be executor-agnostic.

use std::time::Duration;

use log::{debug, trace};
use serde::de::DeserializeOwned;
use url::Url;

use super::TokenManager;
use super::api::{AboutResponse, ListingResponse};
use super::page_from_listing;
use crate::error::FetchError;
use crate::sync::{CollectionDirectory, Page, PageRequest, PageSource, RateWindow, ResponseMeta};

/// Reddit API client
pub struct RedditClient {
    auth: TokenManager,
    agent: ureq::Agent,
    base_url: String,
}

impl RedditClient {
    /// OAuth API base URL
    const BASE_URL: &'static str = "https://oauth.reddit.com";

    pub fn new(auth: TokenManager) -> Self {
        Self::with_base_url(auth, Self::BASE_URL)
    }

    /// Client against a different API host
    pub fn with_base_url(auth: TokenManager, base_url: impl Into<String>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(30)))
            .build()
            .into();

        Self {
            auth,
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Search collection names starting with `prefix`
    ///
    /// Returns display names as reported by the API, at most `limit`.
    pub fn search_collections(&self, prefix: &str, limit: usize) -> Result<Vec<String>, FetchError> {
        let limit = limit.clamp(1, PageRequest::MAX_PAGE_SIZE).to_string();
        let url = self.endpoint(
            "/subreddits/search",
            &[("q", prefix), ("limit", limit.as_str()), ("raw_json", "1")],
        )?;

        let (listing, _): (ListingResponse, _) = self.get_json(url)?;

        let names = listing
            .data
            .children
            .into_iter()
            .filter(|thing| thing.kind == "t5")
            .filter_map(|thing| {
                thing
                    .data
                    .get("display_name")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .collect();

        Ok(names)
    }

    fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, FetchError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| FetchError::Transport(format!("invalid URL: {}", e)))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Authenticated GET, decoding a JSON body on success
    fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<(T, ResponseMeta), FetchError> {
        let access_token = self.auth.ensure_valid()?;

        trace!("GET {}", url);
        let mut response = self
            .agent
            .get(url.as_str())
            .header("Authorization", &format!("Bearer {}", access_token))
            .header("User-Agent", self.auth.user_agent())
            .call()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let headers = response.headers();
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        let rate = RateWindow::from_header_values(
            header("x-ratelimit-remaining"),
            header("x-ratelimit-used"),
            header("x-ratelimit-reset"),
        );
        let retry_after = header("retry-after").and_then(parse_retry_after);

        let status = response.status().as_u16();
        if let Err(e) = classify_response(status, &rate, retry_after) {
            debug!("{} returned {}", url.path(), status);
            return Err(e);
        }

        let body: T = response
            .body_mut()
            .read_json()
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        Ok((body, ResponseMeta { rate }))
    }
}

impl PageSource for RedditClient {
    fn fetch_page(&self, request: &PageRequest) -> Result<Page, FetchError> {
        let path = listing_path(&request.collection, request.mode.as_str());
        let limit = request.page_size.to_string();

        let mut query = vec![("limit", limit.as_str()), ("raw_json", "1")];
        if let Some(cursor) = &request.cursor {
            query.push(cursor.as_query());
        }
        let url = self.endpoint(&path, &query)?;

        let (listing, meta): (ListingResponse, _) = self.get_json(url)?;
        let page = page_from_listing(listing, meta, request.cursor.as_ref());

        debug!(
            "r/{} {}: {} posts, next {:?}, quota {:?}",
            request.collection,
            request.mode,
            page.posts.len(),
            page.next_cursor,
            meta.rate.remaining
        );
        Ok(page)
    }
}

impl CollectionDirectory for RedditClient {
    /// Missing, banned, and private collections all count as not existing
    fn collection_exists(&self, name: &str) -> Result<bool, FetchError> {
        let url = self.endpoint(&format!("/r/{}/about", urlencoding::encode(name)), &[])?;
        about_to_existence(self.get_json::<AboutResponse>(url).map(|(about, _)| about))
    }
}

/// Map a response status onto the fetch error it stands for
///
/// A 429 carries `Retry-After` when present, else the quota reset interval.
fn classify_response(
    status: u16,
    rate: &RateWindow,
    retry_after: Option<Duration>,
) -> Result<(), FetchError> {
    match status {
        200..=299 => Ok(()),
        429 => Err(FetchError::RateLimited {
            retry_after: retry_after.or(rate.reset),
        }),
        _ => Err(FetchError::Api { status }),
    }
}

/// Interpret the outcome of an `/about` lookup
fn about_to_existence(result: Result<AboutResponse, FetchError>) -> Result<bool, FetchError> {
    match result {
        Ok(about) => Ok(about.kind == "t5"),
        Err(FetchError::Api { status: 403 | 404 }) => Ok(false),
        Err(e) => Err(e),
    }
}

fn listing_path(collection: &str, mode: &str) -> String {
    format!("/r/{}/{}", urlencoding::encode(collection), mode)
}

/// `Retry-After` in delta-seconds form
fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_path() {
        assert_eq!(listing_path("sweden", "new"), "/r/sweden/new");
        assert_eq!(listing_path("a b", "hot"), "/r/a%20b/hot");
    }

    fn about(kind: &str) -> AboutResponse {
        serde_json::from_value(serde_json::json!({
            "kind": kind,
            "data": {"display_name": "sweden", "subscribers": 10}
        }))
        .unwrap()
    }

    #[test]
    fn test_classify_success() {
        assert!(classify_response(200, &RateWindow::default(), None).is_ok());
        assert!(classify_response(204, &RateWindow::default(), None).is_ok());
    }

    #[test]
    fn test_classify_rate_limited() {
        let rate = RateWindow::from_header_values(Some("0"), Some("600"), Some("42"));

        let err = classify_response(429, &rate, Some(Duration::from_secs(7))).unwrap_err();
        assert!(matches!(
            err,
            FetchError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(7)
        ));

        // Falls back to the quota reset without Retry-After
        let err = classify_response(429, &rate, None).unwrap_err();
        assert!(matches!(
            err,
            FetchError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(42)
        ));

        let err = classify_response(429, &RateWindow::default(), None).unwrap_err();
        assert!(matches!(err, FetchError::RateLimited { retry_after: None }));
    }

    #[test]
    fn test_classify_other_failures() {
        for status in [301, 400, 401, 403, 404, 500, 503] {
            let err = classify_response(status, &RateWindow::default(), None).unwrap_err();
            assert!(matches!(err, FetchError::Api { status: s } if s == status));
        }
    }

    #[test]
    fn test_about_to_existence() {
        assert!(about_to_existence(Ok(about("t5"))).unwrap());
        assert!(!about_to_existence(Ok(about("Listing"))).unwrap());
        assert!(!about_to_existence(Err(FetchError::Api { status: 404 })).unwrap());
        assert!(!about_to_existence(Err(FetchError::Api { status: 403 })).unwrap());
        assert!(matches!(
            about_to_existence(Err(FetchError::Api { status: 500 })),
            Err(FetchError::Api { status: 500 })
        ));
        assert!(matches!(
            about_to_existence(Err(FetchError::Transport("reset".into()))),
            Err(FetchError::Transport(_))
        ));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("12"), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after(" 3 "), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }
}
