//! Quota-header driven request pacing
//!
//! This is a speed governor, not a token bucket: it only looks at the quota
//! the previous response reported.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Quota information from the most recent response
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RateWindow {
    /// `x-ratelimit-remaining`
    pub remaining: Option<f64>,
    /// `x-ratelimit-used`
    pub used: Option<u32>,
    /// `x-ratelimit-reset`, time until the window resets
    pub reset: Option<Duration>,
}

impl RateWindow {
    /// Parse raw header values. Unparseable values count as absent.
    pub fn from_header_values(
        remaining: Option<&str>,
        used: Option<&str>,
        reset: Option<&str>,
    ) -> Self {
        Self {
            remaining: remaining
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite()),
            used: used.and_then(|v| v.trim().parse::<f64>().ok()).map(|v| v as u32),
            reset: reset
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(Duration::from_secs_f64),
        }
    }
}

/// What to assume when a response carries no usable quota header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownQuota {
    /// No delay
    #[default]
    AssumeSafe,
    /// Apply the low-quota backoff
    AssumeScarce,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiter {
    low_water: f64,
    backoff: Duration,
    unknown: UnknownQuota,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self {
            low_water: 100.0,
            backoff: Duration::from_secs(1),
            unknown: UnknownQuota::AssumeSafe,
        }
    }
}

impl RateLimiter {
    pub fn new(low_water: f64, backoff: Duration, unknown: UnknownQuota) -> Self {
        Self {
            low_water,
            backoff,
            unknown,
        }
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Delay before the next request given the last reported remaining quota
    pub fn compute_delay(&self, remaining: Option<f64>) -> Duration {
        match remaining {
            Some(r) if r < self.low_water => self.backoff,
            Some(_) => Duration::ZERO,
            None => match self.unknown {
                UnknownQuota::AssumeSafe => Duration::ZERO,
                UnknownQuota::AssumeScarce => self.backoff,
            },
        }
    }

    /// Delay derived from a whole quota window
    ///
    /// Same as [`compute_delay`](Self::compute_delay), except that a fully
    /// spent window waits out the reported reset interval.
    pub fn pacing_delay(&self, window: &RateWindow) -> Duration {
        if let (Some(remaining), Some(reset)) = (window.remaining, window.reset)
            && remaining < 1.0
        {
            return reset.max(self.backoff);
        }
        self.compute_delay(window.remaining)
    }
}
