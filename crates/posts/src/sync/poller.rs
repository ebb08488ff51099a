//! Long-running incremental poller
//!
//! Each tracked collection starts in `Bootstrapping`: its name is checked
//! against the API, a large initial batch is stored, and the watermark is
//! taken from the stored data. From then on every round fetches the newest
//! posts, keeps only those strictly newer than the watermark, merges them
//! into the store, and moves the watermark forward.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use super::{
    CollectionDirectory, CollectionFetcher, PageSizeSchedule, PageSource, RateLimiter,
    ShutdownSignal, Sleeper, StopReason,
};
use crate::error::SyncError;
use crate::models::{CollectionState, ListingMode, Post, PostRecord, SyncPhase, validate_collection_name};
use crate::storage::RecordStore;

/// Tunables for [`SyncLoop`]
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    pub mode: ListingMode,
    pub bootstrap_count: usize,
    pub initial_page_size: usize,
    pub steady_page_size: usize,
    pub round_interval: Duration,
    pub auth_backoff: Duration,
    pub max_rate_limit_retries: u32,
    pub limiter: RateLimiter,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            mode: ListingMode::New,
            bootstrap_count: 1000,
            initial_page_size: 1000,
            steady_page_size: 20,
            round_interval: Duration::from_secs(300),
            auth_backoff: Duration::from_secs(30),
            max_rate_limit_retries: 3,
            limiter: RateLimiter::default(),
        }
    }
}

/// What happened to one collection during a round
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionOutcome {
    /// Initial fetch stored
    Bootstrapped {
        stored: usize,
        watermark: Option<DateTime<Utc>>,
    },
    /// New posts merged into the store
    Merged {
        added: usize,
        watermark: Option<DateTime<Utc>>,
    },
    /// Nothing newer than the watermark
    Unchanged,
    /// Collection is invalid and ignored for the rest of the run
    Skipped,
    /// Round failed for this collection; retried next round
    Failed(String),
    /// Shutdown cut the fetch short; nothing was stored
    Interrupted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionReport {
    pub name: String,
    /// Posts returned by the API this round, before watermark filtering
    pub fetched: usize,
    pub outcome: CollectionOutcome,
}

/// Summary of one pass over all tracked collections
#[derive(Debug, Clone, Default)]
pub struct RoundReport {
    pub round: u64,
    pub collections: Vec<CollectionReport>,
    /// Authentication failed and the round ended early
    pub auth_failed: bool,
    /// Shutdown was requested and the round ended early
    pub interrupted: bool,
    pub duration_ms: u64,
}

impl RoundReport {
    pub fn outcome(&self, name: &str) -> Option<&CollectionOutcome> {
        self.collections
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.outcome)
    }

    /// Posts newly written to the store this round
    pub fn posts_stored(&self) -> usize {
        self.collections
            .iter()
            .map(|c| match c.outcome {
                CollectionOutcome::Bootstrapped { stored, .. } => stored,
                CollectionOutcome::Merged { added, .. } => added,
                _ => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> usize {
        self.collections
            .iter()
            .filter(|c| matches!(c.outcome, CollectionOutcome::Failed(_)))
            .count()
    }
}

struct TrackedCollection {
    state: CollectionState,
    verified: bool,
    skipped: bool,
    consecutive_failures: u32,
}

/// The incremental poller
///
/// Collections are processed strictly one after another; one collection's
/// failure never stops the others.
pub struct SyncLoop<'a> {
    source: &'a dyn PageSource,
    directory: &'a dyn CollectionDirectory,
    store: &'a dyn RecordStore,
    sleeper: &'a dyn Sleeper,
    options: SyncOptions,
    collections: Vec<TrackedCollection>,
    schedule: PageSizeSchedule,
    rounds: u64,
    auth_failures: u32,
}

impl<'a> SyncLoop<'a> {
    pub fn new(
        source: &'a dyn PageSource,
        directory: &'a dyn CollectionDirectory,
        store: &'a dyn RecordStore,
        sleeper: &'a dyn Sleeper,
        options: SyncOptions,
    ) -> Self {
        let schedule = PageSizeSchedule::new(options.initial_page_size, options.steady_page_size);
        Self {
            source,
            directory,
            store,
            sleeper,
            options,
            collections: Vec::new(),
            schedule,
            rounds: 0,
            auth_failures: 0,
        }
    }

    /// Start tracking a collection. Returns false if it is already tracked.
    pub fn track(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.collections.iter().any(|c| c.state.name == name) {
            return false;
        }
        self.collections.push(TrackedCollection {
            state: CollectionState::new(name),
            verified: false,
            skipped: false,
            consecutive_failures: 0,
        });
        true
    }

    pub fn collection_state(&self, name: &str) -> Option<&CollectionState> {
        self.tracked(name).map(|c| &c.state)
    }

    pub fn is_skipped(&self, name: &str) -> bool {
        self.tracked(name).is_some_and(|c| c.skipped)
    }

    pub fn consecutive_failures(&self, name: &str) -> u32 {
        self.tracked(name).map_or(0, |c| c.consecutive_failures)
    }

    pub fn schedule(&self) -> &PageSizeSchedule {
        &self.schedule
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    fn tracked(&self, name: &str) -> Option<&TrackedCollection> {
        self.collections.iter().find(|c| c.state.name == name)
    }

    /// Process every tracked collection once
    pub fn run_round(&mut self) -> RoundReport {
        let start = Instant::now();
        self.rounds += 1;

        let fetcher = CollectionFetcher::new(self.source, self.sleeper, self.options.limiter)
            .with_rate_limit_retries(self.options.max_rate_limit_retries, self.options.round_interval);
        let ctx = RoundContext {
            fetcher: &fetcher,
            directory: self.directory,
            store: self.store,
            options: &self.options,
            page_size: self.schedule.current(),
        };

        let mut report = RoundReport {
            round: self.rounds,
            ..Default::default()
        };

        for tracked in self.collections.iter_mut() {
            let name = tracked.state.name.clone();

            if self.sleeper.is_cancelled() {
                info!("Shutdown requested, ending round {} before r/{}", report.round, name);
                report.interrupted = true;
                break;
            }

            if tracked.skipped {
                report.collections.push(CollectionReport {
                    name,
                    fetched: 0,
                    outcome: CollectionOutcome::Skipped,
                });
                continue;
            }

            let mut fetched = 0;
            let outcome = match ctx.sync_collection(tracked, &mut fetched) {
                Ok(outcome) => {
                    tracked.consecutive_failures = 0;
                    outcome
                }
                Err(SyncError::Interrupted) => {
                    info!("r/{}: fetch interrupted by shutdown, nothing stored", name);
                    report.interrupted = true;
                    report.collections.push(CollectionReport {
                        name,
                        fetched,
                        outcome: CollectionOutcome::Interrupted,
                    });
                    break;
                }
                Err(SyncError::Validation { .. }) => {
                    warn!("Skipping r/{} for the rest of this run: not a valid collection", name);
                    tracked.skipped = true;
                    CollectionOutcome::Skipped
                }
                Err(SyncError::Auth(e)) => {
                    error!("Authentication failed during r/{}: {}", name, e);
                    tracked.consecutive_failures += 1;
                    report.auth_failed = true;
                    report.collections.push(CollectionReport {
                        name,
                        fetched,
                        outcome: CollectionOutcome::Failed(e.to_string()),
                    });
                    break;
                }
                Err(e) => {
                    tracked.consecutive_failures += 1;
                    warn!(
                        "r/{} failed ({} in a row): {}",
                        name, tracked.consecutive_failures, e
                    );
                    CollectionOutcome::Failed(e.to_string())
                }
            };

            report.collections.push(CollectionReport {
                name,
                fetched,
                outcome,
            });
        }

        if !report.auth_failed && !report.interrupted {
            self.schedule.advance();
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Round {} done in {}ms: {} posts stored, {} failures",
            report.round,
            report.duration_ms,
            report.posts_stored(),
            report.failures()
        );
        report
    }

    /// Run rounds until `shutdown` is triggered
    ///
    /// Sleeps the round interval between rounds, or an exponential backoff
    /// after an authentication failure. Returns the number of rounds run.
    pub fn run(&mut self, shutdown: &ShutdownSignal) -> u64 {
        let first_round = self.rounds;

        while !shutdown.is_triggered() {
            let report = self.run_round();

            let pause = if report.auth_failed {
                self.auth_failures += 1;
                let backoff = auth_backoff(
                    self.options.auth_backoff,
                    self.auth_failures,
                    self.options.round_interval,
                );
                warn!(
                    "Authentication failing ({} in a row), retrying in {:?}",
                    self.auth_failures, backoff
                );
                backoff
            } else {
                self.auth_failures = 0;
                self.options.round_interval
            };

            debug!("Next round in {:?}", pause);
            if !shutdown.sleep(pause) {
                break;
            }
        }

        let ran = self.rounds - first_round;
        info!("Sync loop stopped after {} rounds", ran);
        ran
    }
}

/// Doubling backoff starting at `base`, capped at `cap`
fn auth_backoff(base: Duration, failures: u32, cap: Duration) -> Duration {
    let factor = 2u32.saturating_pow(failures.saturating_sub(1));
    base.saturating_mul(factor).min(cap)
}

/// Everything one collection's sync needs, borrowed for one round
struct RoundContext<'r> {
    fetcher: &'r CollectionFetcher<'r>,
    directory: &'r dyn CollectionDirectory,
    store: &'r dyn RecordStore,
    options: &'r SyncOptions,
    page_size: usize,
}

impl RoundContext<'_> {
    fn sync_collection(
        &self,
        tracked: &mut TrackedCollection,
        fetched: &mut usize,
    ) -> Result<CollectionOutcome, SyncError> {
        if tracked.state.phase == SyncPhase::Bootstrapping {
            let name = tracked.state.name.clone();
            if !validate_collection_name(&name) {
                return Err(SyncError::Validation { name });
            }

            if self.store.exists(&name).map_err(SyncError::Store)? {
                let latest = self.store.latest_timestamp(&name).map_err(SyncError::Store)?;
                tracked.state.mark_incremental(latest);
                info!("Resuming r/{} from stored watermark {:?}", name, latest);
            } else {
                return self.bootstrap(tracked, fetched);
            }
        }

        self.incremental(&mut tracked.state, fetched)
    }

    fn bootstrap(
        &self,
        tracked: &mut TrackedCollection,
        fetched: &mut usize,
    ) -> Result<CollectionOutcome, SyncError> {
        let name = tracked.state.name.clone();

        if !tracked.verified {
            if !self.directory.collection_exists(&name)? {
                return Err(SyncError::Validation { name });
            }
            tracked.verified = true;
        }

        info!(
            "Bootstrapping r/{} with up to {} posts",
            name, self.options.bootstrap_count
        );
        let outcome =
            self.fetcher
                .fetch_up_to(&name, self.options.mode, self.options.bootstrap_count, None)?;
        *fetched = outcome.posts.len();

        // A partial initial batch would become the watermark and the rest
        // of the history would never be fetched
        if outcome.stop == StopReason::Interrupted {
            return Err(SyncError::Interrupted);
        }
        if outcome.posts.is_empty() && !outcome.stop.is_clean() {
            return Err(SyncError::EmptyFetch(outcome.stop));
        }
        if outcome.is_short() {
            debug!(
                "r/{}: bootstrap got {} of {} posts ({:?})",
                name,
                outcome.posts.len(),
                outcome.requested,
                outcome.stop
            );
        }

        let records: Vec<PostRecord> = outcome.posts.iter().map(Post::to_record).collect();
        self.store.save(&name, &records).map_err(SyncError::Store)?;

        let latest = self.store.latest_timestamp(&name).map_err(SyncError::Store)?;
        tracked.state.mark_incremental(latest);

        info!(
            "Bootstrapped r/{}: {} posts stored, watermark {:?}",
            name,
            records.len(),
            tracked.state.watermark()
        );
        Ok(CollectionOutcome::Bootstrapped {
            stored: records.len(),
            watermark: tracked.state.watermark(),
        })
    }

    fn incremental(
        &self,
        state: &mut CollectionState,
        fetched: &mut usize,
    ) -> Result<CollectionOutcome, SyncError> {
        let outcome = self
            .fetcher
            .fetch_up_to(&state.name, self.options.mode, self.page_size, None)?;
        *fetched = outcome.posts.len();

        if outcome.stop == StopReason::Interrupted {
            return Err(SyncError::Interrupted);
        }
        if outcome.posts.is_empty() && !outcome.stop.is_clean() {
            return Err(SyncError::EmptyFetch(outcome.stop));
        }

        let fresh: Vec<PostRecord> = outcome
            .posts
            .iter()
            .filter(|p| state.is_newer(p.created_at))
            .map(Post::to_record)
            .collect();

        if fresh.is_empty() {
            debug!(
                "r/{}: nothing newer than {:?} among {} posts",
                state.name,
                state.watermark(),
                outcome.posts.len()
            );
            return Ok(CollectionOutcome::Unchanged);
        }

        let newest = fresh.iter().map(|r| r.created_utc).max();
        let summary = self
            .store
            .merge(&state.name, fresh)
            .map_err(SyncError::Store)?;

        if let Some(ts) = newest {
            state.advance(ts);
        }
        if let Some(ts) = summary.latest {
            state.advance(ts);
        }

        info!(
            "r/{}: merged {} new posts ({} stored), watermark {:?}",
            state.name,
            summary.added,
            summary.total,
            state.watermark()
        );
        Ok(CollectionOutcome::Merged {
            added: summary.added,
            watermark: state.watermark(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_backoff_doubles_and_caps() {
        let base = Duration::from_secs(30);
        let cap = Duration::from_secs(300);
        assert_eq!(auth_backoff(base, 1, cap), Duration::from_secs(30));
        assert_eq!(auth_backoff(base, 2, cap), Duration::from_secs(60));
        assert_eq!(auth_backoff(base, 3, cap), Duration::from_secs(120));
        assert_eq!(auth_backoff(base, 5, cap), cap);
        assert_eq!(auth_backoff(base, 40, cap), cap);
    }

    #[test]
    fn test_round_report_totals() {
        let report = RoundReport {
            round: 1,
            collections: vec![
                CollectionReport {
                    name: "a".into(),
                    fetched: 10,
                    outcome: CollectionOutcome::Bootstrapped {
                        stored: 10,
                        watermark: None,
                    },
                },
                CollectionReport {
                    name: "b".into(),
                    fetched: 3,
                    outcome: CollectionOutcome::Merged {
                        added: 2,
                        watermark: None,
                    },
                },
                CollectionReport {
                    name: "c".into(),
                    fetched: 0,
                    outcome: CollectionOutcome::Failed("boom".into()),
                },
            ],
            auth_failed: false,
            interrupted: false,
            duration_ms: 0,
        };

        assert_eq!(report.posts_stored(), 12);
        assert_eq!(report.failures(), 1);
        assert_eq!(report.outcome("c"), Some(&CollectionOutcome::Failed("boom".into())));
        assert_eq!(report.outcome("zzz"), None);
    }
}
