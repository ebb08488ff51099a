//! Fetch-and-sync engine
//!
//! Pages through collection listings under a request budget and merges new
//! posts into the record store without re-fetching history.

mod fetch;
mod poller;
mod rate;
mod schedule;
mod shutdown;
mod source;

pub use fetch::{CollectionFetcher, FetchOutcome, StopReason};
pub use poller::{CollectionOutcome, CollectionReport, RoundReport, SyncLoop, SyncOptions};
pub use rate::{RateLimiter, RateWindow, UnknownQuota};
pub use schedule::{PageSizeSchedule, ScheduleState};
pub use shutdown::{ShutdownSignal, Sleeper};
pub use source::{CollectionDirectory, Page, PageRequest, PageSource, ResponseMeta};
