//! Requests-per-minute limiter shared by every completion call.
//!
//! One bucket for the whole adapter, not keyed by caller. The limiter keeps
//! the start times of the most recent acquisitions; a new acquisition is
//! allowed only while fewer than `rpm` of them fall inside the trailing
//! 60-second window. This holds the limit over *any* rolling minute, not just
//! on average.
//!
//! [`RateLimiter::check`] never waits. [`RateLimiter::acquire`] suspends the
//! caller on the tokio timer until [`check`](RateLimiter::check) succeeds.

use std::{collections::VecDeque, sync::Mutex, time::Duration};

use tokio::time::Instant;

/// Length of the rolling window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Shared rate limiter: at most `rpm` acquisitions per rolling minute.
#[derive(Debug)]
pub struct RateLimiter {
    /// Configured limit in requests per minute.
    pub rpm: u32,
    /// Start times of acquisitions still inside the window, oldest first.
    granted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter for the given requests-per-minute limit.
    ///
    /// An `rpm` of 0 is treated as 1 so that `acquire` always terminates.
    pub fn new(rpm: u32) -> Self {
        let rpm = rpm.max(1);
        Self {
            rpm,
            granted: Mutex::new(VecDeque::with_capacity(rpm as usize)),
        }
    }

    /// Attempt to take one slot.
    ///
    /// Returns `Ok(())` if the acquisition is allowed, or `Err(wait)` with the
    /// time until the oldest acquisition leaves the window.
    pub fn check(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut granted = self.granted.lock().unwrap_or_else(|e| e.into_inner());

        // Evict acquisitions that have aged out of the window.
        while granted
            .front()
            .is_some_and(|&t| now.duration_since(t) >= WINDOW)
        {
            granted.pop_front();
        }

        if granted.len() < self.rpm as usize {
            granted.push_back(now);
            return Ok(());
        }

        let oldest = granted.front().copied().unwrap_or(now);
        Err(WINDOW.saturating_sub(now.duration_since(oldest)))
    }

    /// Take one slot, sleeping until capacity is available.
    ///
    /// Waiters are not queued: whichever task re-checks first after a slot
    /// frees up gets it.
    pub async fn acquire(&self) {
        loop {
            match self.check() {
                Ok(()) => return,
                Err(wait) => {
                    tracing::debug!(
                        wait_ms = wait.as_millis() as u64,
                        rpm = self.rpm,
                        "rate limit reached, waiting"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Number of acquisitions still counted against the current window.
    pub fn in_window(&self) -> usize {
        let now = Instant::now();
        let granted = self.granted.lock().unwrap_or_else(|e| e.into_inner());
        granted
            .iter()
            .filter(|&&t| now.duration_since(t) < WINDOW)
            .count()
    }
}
