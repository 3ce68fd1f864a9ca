//! Backoff bookkeeping for failed reconciles
//!
//! The scheduler owns retries; this module only supplies the curve. Faults
//! escalate exponentially per object, user-fixable states use the fixed
//! 5-second delay in the reconciler, and conflicts bypass the counter.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Base delay for the first retry
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Cap applied to the exponential curve
const BACKOFF_CAP: Duration = Duration::from_secs(300);

/// Exponential backoff for the given attempt number (1-based)
pub fn backoff_for(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    BACKOFF_BASE
        .saturating_mul(1u32 << exp)
        .min(BACKOFF_CAP)
}

/// Per-object consecutive-failure counter
#[derive(Default)]
pub struct RetryTracker {
    attempts: Mutex<HashMap<String, u32>>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure; returns the new attempt count
    pub fn increment(&self, key: &str) -> u32 {
        let mut attempts = self.attempts.lock();
        let count = attempts.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Clear the counter after a successful reconcile
    pub fn reset(&self, key: &str) {
        self.attempts.lock().remove(key);
    }
}
