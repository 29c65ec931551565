use std::time::{Duration, Instant};

/// Schedule for store reconnect attempts.
///
/// Each failed attempt doubles the wait (capped at `max`) and pushes the next
/// due time out; a success resets the schedule so the next outage starts from
/// `initial` again.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    delay: Duration,
    failures: u32,
    due_at: Option<Instant>,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            delay: initial,
            failures: 0,
            due_at: None,
        }
    }

    /// Whether a reconnect may be attempted at `now`. True until the first failure.
    pub fn is_due(&self, now: Instant) -> bool {
        self.due_at.map_or(true, |at| now >= at)
    }

    /// Record a failed attempt (or a lost connection) at `now` and return the
    /// wait before the next attempt.
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        let wait = self.delay;
        self.delay = self.delay.saturating_mul(2).min(self.max);
        self.failures = self.failures.saturating_add(1);
        self.due_at = Some(now + wait);
        wait
    }

    pub fn record_success(&mut self) {
        self.delay = self.initial;
        self.failures = 0;
        self.due_at = None;
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}
