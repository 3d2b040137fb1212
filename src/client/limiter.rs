//! Sliding-window rate limiting for outbound model calls.
//!
//! Callers past the window capacity are delayed, never rejected: `acquire`
//! suspends until a slot frees up, so every call is eventually admitted.
//! The admission queue is the only shared mutable state in the client and
//! sits behind a single async mutex; admitted calls run unserialized.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Bounds calls to `max_calls` per rolling `window`.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    admissions: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter admitting at most `max_calls` per `window`.
    ///
    /// A zero capacity would never admit anything, so it is clamped to 1.
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window,
            admissions: Mutex::new(VecDeque::new()),
        }
    }

    /// Suspend until a slot is available, then consume it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut admissions = self.admissions.lock().await;
                let now = Instant::now();
                while admissions
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= self.window)
                {
                    admissions.pop_front();
                }
                if admissions.len() < self.max_calls {
                    admissions.push_back(now);
                    return;
                }
                match admissions.front() {
                    Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };
            // Lock released before sleeping so other callers can race for
            // the slot once it frees up.
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Release the most recently consumed slot.
    ///
    /// Used when a call admitted through `acquire` fails with a retryable
    /// error and the configuration refunds quota before the retry.
    pub async fn refund(&self) {
        let mut admissions = self.admissions.lock().await;
        admissions.pop_back();
    }

    /// Slots currently consumed within the live window.
    pub async fn in_flight(&self) -> usize {
        let mut admissions = self.admissions.lock().await;
        let now = Instant::now();
        while admissions
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            admissions.pop_front();
        }
        admissions.len()
    }
}
