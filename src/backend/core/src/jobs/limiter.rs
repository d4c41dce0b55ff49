//! Sliding-window limiter for worker claims.
//!
//! The limiter is split into a peek ([`ClaimRateLimiter::wait_time`]) and a
//! commit ([`ClaimRateLimiter::record`]) so that polls which find the queue
//! empty do not consume quota.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// At most `max` claims in any `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl RateLimit {
    pub fn new(max: u32, window: Duration) -> Self {
        Self { max, window }
    }

    pub fn per_second(max: u32) -> Self {
        Self::new(max, Duration::from_secs(1))
    }
}

/// Claim limiter owned by one worker.
#[derive(Debug)]
pub struct ClaimRateLimiter {
    limit: RateLimit,
    /// Claim instants inside the current window, oldest first.
    log: Mutex<VecDeque<Instant>>,
}

impl ClaimRateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            log: Mutex::new(VecDeque::with_capacity(limit.max as usize)),
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// How long until one more claim fits, or `None` if it fits now.
    pub fn wait_time(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut log = self.log.lock();
        self.expire(&mut log, now);

        if (log.len() as u64) < u64::from(self.limit.max) {
            return None;
        }
        let oldest = log.front().copied()?;
        Some((oldest + self.limit.window).saturating_duration_since(now))
    }

    /// Count one claim against the window.
    pub fn record(&self) {
        let now = Instant::now();
        let mut log = self.log.lock();
        self.expire(&mut log, now);
        log.push_back(now);
    }

    /// Peek and commit in one step.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut log = self.log.lock();
        self.expire(&mut log, now);
        if (log.len() as u64) < u64::from(self.limit.max) {
            log.push_back(now);
            true
        } else {
            false
        }
    }

    /// Claims counted in the current window.
    pub fn in_window(&self) -> usize {
        let mut log = self.log.lock();
        self.expire(&mut log, Instant::now());
        log.len()
    }

    fn expire(&self, log: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&front) = log.front() {
            if now.duration_since(front) >= self.limit.window {
                log.pop_front();
            } else {
                break;
            }
        }
    }
}
