//! Sliding-window rate limiter.
//!
//! One limiter per upstream source. When the window is at capacity the
//! caller waits until the oldest request exits the window before proceeding.
//! Requests are serialized and delayed, never dropped.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Sliding-window limiter: at most `max_requests` acquisitions per `window`.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        // A zero-capacity window would deadlock every caller.
        let max_requests = max_requests.max(1);
        Self {
            max_requests,
            window,
            timestamps: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    /// Wait until a request slot is available, then claim it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut stamps = self.timestamps.lock().await;
                let now = Instant::now();
                while let Some(front) = stamps.front() {
                    if now.duration_since(*front) >= self.window {
                        stamps.pop_front();
                    } else {
                        break;
                    }
                }
                if stamps.len() < self.max_requests {
                    stamps.push_back(now);
                    return;
                }
                // Window full: wait for the oldest entry to age out.
                match stamps.front() {
                    Some(oldest) => self.window.saturating_sub(now.duration_since(*oldest)),
                    None => continue,
                }
            };
            debug!(wait_ms = wait.as_millis() as u64, "rate limit window full, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Requests currently counted in the window.
    pub async fn in_flight(&self) -> usize {
        let mut stamps = self.timestamps.lock().await;
        let now = Instant::now();
        while let Some(front) = stamps.front() {
            if now.duration_since(*front) >= self.window {
                stamps.pop_front();
            } else {
                break;
            }
        }
        stamps.len()
    }
}
