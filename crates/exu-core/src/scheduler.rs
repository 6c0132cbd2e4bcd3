//! ---
//! exu_section: "02-update-engine"
//! exu_subsection: "module"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Update reconciliation and lifecycle orchestration."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
use std::time::Duration;

use exu_common::config::UpdateConfig;
use exu_common::time::seconds_until;

/// Check-timing policy. Every method returns the delay for the next
/// single-shot timer; the caller is responsible for re-arming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateScheduler {
    interval: Duration,
    retry_delay: Duration,
}

impl UpdateScheduler {
    pub fn new(interval: Duration, retry_delay: Duration) -> Self {
        Self {
            interval,
            retry_delay,
        }
    }

    pub fn from_config(config: &UpdateConfig) -> Self {
        Self::new(config.interval, config.retry_delay)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Unix timestamp at which the next full check is due.
    pub fn next_check(&self, last_check: i64) -> i64 {
        let interval = i64::try_from(self.interval.as_secs()).unwrap_or(i64::MAX);
        last_check.saturating_add(interval)
    }

    /// Delay before the first check after startup; zero when overdue.
    pub fn initial_delay(&self, last_check: i64, now: i64) -> Duration {
        seconds_until(now, self.next_check(last_check))
    }

    /// Delay after a successful reconciliation, empty result included.
    pub fn after_success(&self) -> Duration {
        self.interval
    }

    /// Delay after a transport failure. The persisted timestamp is left alone.
    pub fn after_failure(&self) -> Duration {
        self.retry_delay
    }
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::from_config(&UpdateConfig::default())
    }
}
