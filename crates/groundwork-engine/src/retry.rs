use std::time::Duration;

/// Exponential backoff schedule: `base`, `2*base`, `4*base`, ... with one
/// delay per remaining retry.
#[derive(Debug, Clone)]
pub struct Backoff {
    next_delay: Duration,
    remaining: u32,
}

impl Backoff {
    /// `max_attempts` counts the first attempt, so a value of 1 yields no
    /// retries at all.
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Backoff {
            next_delay: base,
            remaining: max_attempts.saturating_sub(1),
        }
    }

    /// The delay to sleep before the next retry, or `None` when attempts
    /// are exhausted.
    pub fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let delay = self.next_delay;
        self.next_delay = self.next_delay.saturating_mul(2);
        Some(delay)
    }
}
