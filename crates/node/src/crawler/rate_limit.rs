//! Per-endpoint request limiter.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Sliding-window limiter: at most `max_requests` calls start within any
/// window of length `window`.
///
/// Callers over the limit wait for the oldest call to leave the window. They
/// are served in arrival order and never dropped.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: Option<usize>,
    window: Duration,
    started: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Limit to `max_requests` per `window`.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: Some(max_requests.max(1) as usize),
            window,
            started: Mutex::new(VecDeque::new()),
        }
    }

    /// A limiter that never waits.
    pub fn unlimited() -> Self {
        Self {
            max_requests: None,
            window: Duration::ZERO,
            started: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until a call may start, then record it.
    pub async fn acquire(&self) {
        let Some(max_requests) = self.max_requests else {
            return;
        };

        let mut started = self.started.lock().await;
        loop {
            let now = Instant::now();
            while let Some(&oldest) = started.front() {
                if now.saturating_duration_since(oldest) >= self.window {
                    started.pop_front();
                } else {
                    break;
                }
            }

            if started.len() < max_requests {
                started.push_back(now);
                return;
            }

            let Some(&oldest) = started.front() else {
                continue;
            };
            let wait = self.window - now.saturating_duration_since(oldest);
            debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}
