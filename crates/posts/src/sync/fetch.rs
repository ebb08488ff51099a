//! Multi-page collection fetching

use std::collections::HashSet;
use std::time::Duration;

use log::{debug, warn};

use super::{PageRequest, PageSource, RateLimiter, Sleeper};
use crate::error::{AuthError, FetchError};
use crate::models::{Cursor, ListingMode, Post, PostId};

/// Why a paginated fetch stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The requested number of unique posts was collected
    TargetReached,
    /// The API returned an empty page or no continuation cursor
    Exhausted,
    /// The API handed back a cursor that was already submitted, or a page
    /// with nothing new on it
    CursorLoop,
    /// A request failed; `status` is set for non-success HTTP responses
    ApiFailure { status: Option<u16> },
    /// Still throttled after the allowed retries
    RateLimited,
    /// A shutdown request interrupted a pacing sleep
    Interrupted,
}

impl StopReason {
    /// True if the listing ended on its own terms rather than by failure
    pub fn is_clean(&self) -> bool {
        matches!(
            self,
            StopReason::TargetReached | StopReason::Exhausted | StopReason::CursorLoop
        )
    }
}

/// Result of [`CollectionFetcher::fetch_up_to`]
///
/// A failed request mid-way still yields whatever was gathered before it;
/// check [`is_short`](Self::is_short) and `stop` when completeness matters.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Unique posts in the order the API returned them
    pub posts: Vec<Post>,
    pub requested: usize,
    pub pages: usize,
    pub stop: StopReason,
}

impl FetchOutcome {
    pub fn is_short(&self) -> bool {
        self.posts.len() < self.requested
    }
}

/// Drives a [`PageSource`] across pages
pub struct CollectionFetcher<'a> {
    source: &'a dyn PageSource,
    sleeper: &'a dyn Sleeper,
    limiter: RateLimiter,
    max_rate_limit_retries: u32,
    max_retry_wait: Duration,
}

impl<'a> CollectionFetcher<'a> {
    pub fn new(source: &'a dyn PageSource, sleeper: &'a dyn Sleeper, limiter: RateLimiter) -> Self {
        Self {
            source,
            sleeper,
            limiter,
            max_rate_limit_retries: 3,
            max_retry_wait: Duration::from_secs(300),
        }
    }

    /// Configure explicit 429 handling: how many times to retry, and the
    /// longest single wait before a retry. Pacing sleeps share the same cap.
    pub fn with_rate_limit_retries(mut self, retries: u32, max_wait: Duration) -> Self {
        self.max_rate_limit_retries = retries;
        self.max_retry_wait = max_wait;
        self
    }

    /// Fetch up to `target` unique posts from `collection`
    ///
    /// Stops when enough posts are collected, the listing runs out, the
    /// cursor stops advancing, or a request fails. Only an authentication
    /// failure is returned as an error.
    pub fn fetch_up_to(
        &self,
        collection: &str,
        mode: ListingMode,
        target: usize,
        start: Option<Cursor>,
    ) -> Result<FetchOutcome, AuthError> {
        let page_size = target.clamp(1, PageRequest::MAX_PAGE_SIZE);
        let mut seen_ids: HashSet<PostId> = HashSet::new();
        let mut seen_cursors: HashSet<Cursor> = HashSet::new();
        let mut posts: Vec<Post> = Vec::new();
        let mut cursor = start;
        let mut pages = 0;
        let mut retries = 0;

        let stop = loop {
            if posts.len() >= target {
                break StopReason::TargetReached;
            }

            let request = PageRequest::new(collection, mode, cursor.clone(), page_size);
            let page = match self.source.fetch_page(&request) {
                Ok(page) => page,
                Err(FetchError::Auth(e)) => return Err(e),
                Err(FetchError::RateLimited { retry_after }) => {
                    if retries >= self.max_rate_limit_retries {
                        warn!(
                            "r/{}: still rate limited after {} retries, keeping {} posts",
                            collection,
                            retries,
                            posts.len()
                        );
                        break StopReason::RateLimited;
                    }
                    retries += 1;
                    let wait = retry_after
                        .unwrap_or(self.limiter.backoff())
                        .max(self.limiter.backoff())
                        .min(self.max_retry_wait);
                    warn!(
                        "r/{}: rate limited, retry {}/{} in {:?}",
                        collection, retries, self.max_rate_limit_retries, wait
                    );
                    if !self.sleeper.sleep(wait) {
                        break StopReason::Interrupted;
                    }
                    continue;
                }
                Err(FetchError::Api { status }) => {
                    warn!(
                        "r/{}: received status {}, keeping {} posts",
                        collection,
                        status,
                        posts.len()
                    );
                    break StopReason::ApiFailure {
                        status: Some(status),
                    };
                }
                Err(e) => {
                    warn!("r/{}: {}, keeping {} posts", collection, e, posts.len());
                    break StopReason::ApiFailure { status: None };
                }
            };

            retries = 0;
            pages += 1;

            if let Some(submitted) = cursor.take() {
                seen_cursors.insert(submitted);
            }
            let next = page.next_cursor;
            let delay = self
                .limiter
                .pacing_delay(&page.meta.rate)
                .min(self.max_retry_wait);
            let repeated = next.as_ref().is_some_and(|c| seen_cursors.contains(c));

            // A repeated cursor after the first page means this page repeats
            // an earlier one. On the first page its posts are still new.
            let finished = if page.posts.is_empty() {
                Some(StopReason::Exhausted)
            } else if repeated && pages > 1 {
                debug!("r/{}: cursor {:?} repeated, stopping", collection, next);
                Some(StopReason::CursorLoop)
            } else {
                let before = posts.len();
                for post in page.posts {
                    if seen_ids.insert(post.id.clone()) {
                        posts.push(post);
                    }
                }
                if posts.len() == before {
                    debug!("r/{}: page had no new posts, stopping", collection);
                    Some(StopReason::CursorLoop)
                } else if repeated {
                    debug!("r/{}: cursor {:?} repeated, stopping", collection, next);
                    Some(StopReason::CursorLoop)
                } else if posts.len() >= target {
                    Some(StopReason::TargetReached)
                } else if next.is_none() {
                    Some(StopReason::Exhausted)
                } else {
                    None
                }
            };

            debug!(
                "r/{}: page {} done, {} unique posts, remaining quota {:?}",
                collection, pages, posts.len(), page.meta.rate.remaining
            );

            cursor = next;

            if !delay.is_zero() {
                debug!("r/{}: pacing {:?}", collection, delay);
                if !self.sleeper.sleep(delay) && finished.is_none() {
                    break StopReason::Interrupted;
                }
            }

            if let Some(reason) = finished {
                break reason;
            }
        };

        posts.truncate(target);

        Ok(FetchOutcome {
            posts,
            requested: target,
            pages,
            stop,
        })
    }
}
