//! Rolling-window event rate limiter.

use std::time::Duration;

use tokio::time::Instant;

/// Counts events per window; past the limit only high-value events pass.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    max_per_window: u32,
    window_start: Option<Instant>,
    seen: u32,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            window,
            max_per_window,
            window_start: None,
            seen: 0,
        }
    }

    /// Record an event at `now` and decide whether it passes.
    ///
    /// Every event counts toward the window; only noisy ones are refused.
    pub fn admit(&mut self, noisy: bool, now: Instant) -> bool {
        match self.window_start {
            Some(start) if now.duration_since(start) < self.window => {}
            _ => {
                self.window_start = Some(now);
                self.seen = 0;
            }
        }
        self.seen = self.seen.saturating_add(1);
        !noisy || self.seen <= self.max_per_window
    }

    /// Whether the current window is over its limit.
    pub fn is_saturated(&self, now: Instant) -> bool {
        match self.window_start {
            Some(start) => {
                now.duration_since(start) < self.window && self.seen >= self.max_per_window
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn noisy_events_are_shed_until_the_window_rolls() {
        let mut limiter = RateLimiter::new(3, Duration::from_secs(1));
        let now = Instant::now();
        let passed = (0..5).filter(|_| limiter.admit(true, now)).count();
        assert_eq!(passed, 3);
        assert!(limiter.is_saturated(now));

        assert!(limiter.admit(false, now), "high-value events always pass");

        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert!(limiter.admit(true, Instant::now()));
        assert!(!limiter.is_saturated(Instant::now()));
    }
}
