//! Exponential retry delays with an optional overall deadline.

use std::time::{Duration, Instant};

/// First retry delay after a failed enrollment.
pub const ENROLL_BACKOFF_INITIAL: Duration = Duration::from_secs(5);
/// Retry delays never grow past this.
pub const ENROLL_BACKOFF_MAX: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct Backoff {
    pub delay: Duration,
    pub max_delay: Duration,
    pub deadline: Option<Instant>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(ENROLL_BACKOFF_INITIAL, ENROLL_BACKOFF_MAX)
    }
}

impl Backoff {
    pub fn new(initial: Duration, max_delay: Duration) -> Self {
        let max_delay = max_delay.max(initial);
        Self {
            delay: initial,
            max_delay,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Delay to wait before the next attempt, doubling the one after it.
    /// `None` once the deadline has passed; never longer than the time left.
    pub fn next_delay(&mut self, now: Instant) -> Option<Duration> {
        let mut wait = self.delay;
        if let Some(deadline) = self.deadline {
            let remaining = deadline.checked_duration_since(now)?;
            if remaining.is_zero() {
                return None;
            }
            wait = wait.min(remaining);
        }
        self.delay = self
            .delay
            .checked_mul(2)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        Some(wait)
    }
}
