//! Time-bounded exclusion of services that keep failing discovery

use crate::config::ExclusionPolicy;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// What the scheduler should do with a service this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionCheck {
    /// Not excluded, evaluate normally
    Clear,
    /// Still cooling down, skip
    Excluded { until: DateTime<Utc> },
    /// Cool-down elapsed, evaluate once more
    Retry,
}

/// Per-service failure bookkeeping, owned by that service's runtime state
#[derive(Debug, Clone, Default)]
pub struct ExclusionState {
    consecutive_failures: u32,
    excluded_until: Option<DateTime<Utc>>,
}

impl ExclusionState {
    pub fn check(&self, now: DateTime<Utc>) -> ExclusionCheck {
        match self.excluded_until {
            Some(until) if now < until => ExclusionCheck::Excluded { until },
            Some(_) => ExclusionCheck::Retry,
            None => ExclusionCheck::Clear,
        }
    }

    /// Count a failed evaluation; returns the new expiry if the service is now excluded
    ///
    /// Once the threshold is reached every further failure (the retry after a
    /// cool-down) starts a fresh cool-down.
    pub fn record_failure(
        &mut self,
        policy: &ExclusionPolicy,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures < policy.failure_threshold {
            return None;
        }

        let until = add_std(now, policy.cooldown);
        self.excluded_until = Some(until);
        Some(until)
    }

    /// Clear failures after a successful evaluation; returns how many there were
    pub fn record_success(&mut self) -> u32 {
        let previous = self.consecutive_failures;
        self.consecutive_failures = 0;
        self.excluded_until = None;
        previous
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_excluded(&self, now: DateTime<Utc>) -> bool {
        matches!(self.check(now), ExclusionCheck::Excluded { .. })
    }
}

fn add_std(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
