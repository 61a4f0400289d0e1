//! Token-bucket rate limiter over think cycles.
//!
//! Grounded on the teacher's Flash/Pro escalation gating in
//! `tool_loop::run_tool_loop` (a bounded-rounds guard against runaway
//! loops) generalized to a sliding-window call budget, the shape the
//! original Python `Governor` used.

use std::time::{Duration, Instant};

pub struct Governor {
    limit: usize,
    window: Duration,
    call_history: Vec<Instant>,
    cooldown_until: Option<Instant>,
}

impl Governor {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            call_history: Vec::new(),
            cooldown_until: None,
        }
    }

    /// Record a call if under the limit within the sliding window. Returns
    /// `false` (and leaves the history untouched) if the limit is hit.
    pub fn check_limit(&mut self) -> bool {
        let now = Instant::now();
        self.call_history.retain(|t| now.duration_since(*t) < self.window);
        if self.call_history.len() >= self.limit {
            return false;
        }
        self.call_history.push(now);
        true
    }

    pub fn trip_cooldown(&mut self, duration: Duration) {
        self.cooldown_until = Some(Instant::now() + duration);
    }

    pub fn cooldown_remaining(&self) -> Duration {
        match self.cooldown_until {
            Some(until) => until.saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    pub fn is_cooling_down(&self) -> bool {
        !self.cooldown_remaining().is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_calls_under_limit() {
        let mut gov = Governor::new(3, Duration::from_secs(300));
        assert!(gov.check_limit());
        assert!(gov.check_limit());
        assert!(gov.check_limit());
    }

    #[test]
    fn blocks_calls_once_limit_hit_within_window() {
        let mut gov = Governor::new(2, Duration::from_secs(300));
        assert!(gov.check_limit());
        assert!(gov.check_limit());
        assert!(!gov.check_limit());
    }

    #[test]
    fn old_calls_age_out_of_the_window() {
        let mut gov = Governor::new(1, Duration::from_millis(20));
        assert!(gov.check_limit());
        assert!(!gov.check_limit());
        std::thread::sleep(Duration::from_millis(30));
        assert!(gov.check_limit());
    }

    #[test]
    fn cooldown_reports_remaining_time() {
        let mut gov = Governor::new(1, Duration::from_secs(300));
        assert!(!gov.is_cooling_down());
        gov.trip_cooldown(Duration::from_secs(60));
        assert!(gov.is_cooling_down());
    }
}
