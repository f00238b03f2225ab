//! Per-source request throttle
//!
//! Fixed window that resets once a full window has elapsed. Callers over
//! budget sleep until the window ends. The lock is never held across a sleep,
//! so interactive and bulk callers can share one instance.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct WindowState {
    window_start: Instant,
    count: u32,
    blocked_until: Option<Instant>,
}

impl WindowState {
    fn reset(&mut self, now: Instant) {
        self.window_start = now;
        self.count = 0;
    }
}

/// Requests-per-window limiter shared by every caller of one source
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

impl RateLimiter {
    /// Limiter allowing `requests_per_minute` requests per rolling minute
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::with_window(requests_per_minute, DEFAULT_WINDOW)
    }

    pub fn with_window(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            state: Mutex::new(WindowState {
                window_start: Instant::now(),
                count: 0,
                blocked_until: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until a request may proceed, then consume one slot
    pub async fn wait(&self) {
        loop {
            let pause = {
                let mut state = self.lock();
                self.try_acquire(&mut state, Instant::now())
            };

            match pause {
                None => return,
                Some(pause) => {
                    tracing::debug!(
                        limit = self.limit,
                        wait_ms = pause.as_millis() as u64,
                        "Rate limit reached, waiting for next window"
                    );
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }

    /// Consume a slot, or report how long to sleep before trying again
    fn try_acquire(&self, state: &mut WindowState, now: Instant) -> Option<Duration> {
        if let Some(until) = state.blocked_until {
            if now < until {
                return Some(until - now);
            }
            state.blocked_until = None;
            state.reset(now);
        }

        if now.duration_since(state.window_start) >= self.window {
            state.reset(now);
        }

        if state.count < self.limit {
            state.count += 1;
            return None;
        }

        Some(self.window.saturating_sub(now.duration_since(state.window_start)))
    }

    /// Requests left in the current window
    pub fn remaining(&self) -> u32 {
        let state = self.lock();
        let now = Instant::now();
        if matches!(state.blocked_until, Some(until) if now < until) {
            return 0;
        }
        if now.duration_since(state.window_start) >= self.window {
            return self.limit;
        }
        self.limit.saturating_sub(state.count)
    }

    /// Block every caller for `duration`, e.g. after a 429/503 with Retry-After
    pub fn block_for(&self, duration: Duration) {
        let mut state = self.lock();
        let until = Instant::now() + duration;
        if state.blocked_until.map_or(true, |current| until > current) {
            state.blocked_until = Some(until);
        }
        tracing::warn!(
            block_secs = duration.as_secs(),
            "Source requested backoff, blocking requests"
        );
    }

    /// Honour a Retry-After header value in seconds (missing or invalid: one window)
    pub fn wait_for_retry_after(&self, retry_after: Option<&str>) {
        let secs = retry_after
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(self.window);
        self.block_for(secs);
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requests_within_limit_do_not_wait() {
        let limiter = RateLimiter::with_window(5, Duration::from_millis(500));
        let start = Instant::now();
        for _ in 0..5 {
            limiter.wait().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(limiter.remaining(), 0);
    }

    #[tokio::test]
    async fn test_request_over_limit_waits_for_window() {
        let limiter = RateLimiter::with_window(3, Duration::from_millis(300));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.wait().await;
        }
        limiter.wait().await;

        // The fourth call sleeps out the remainder of the first window
        assert!(start.elapsed() >= Duration::from_millis(290));
        assert_eq!(limiter.remaining(), 2);
    }

    #[tokio::test]
    async fn test_remaining_resets_after_window() {
        let limiter = RateLimiter::with_window(2, Duration::from_millis(50));
        limiter.wait().await;
        assert_eq!(limiter.remaining(), 1);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(limiter.remaining(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_budget() {
        let limiter = std::sync::Arc::new(RateLimiter::with_window(4, Duration::from_millis(250)));
        let start = Instant::now();

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.wait().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        // Two callers must have spilled into the second window
        assert!(start.elapsed() >= Duration::from_millis(240));
    }

    #[tokio::test]
    async fn test_retry_after_blocks_all_callers() {
        let limiter = RateLimiter::with_window(10, Duration::from_secs(60));
        limiter.block_for(Duration::from_millis(150));
        assert_eq!(limiter.remaining(), 0);

        let start = Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(140));
        assert_eq!(limiter.remaining(), 9);
    }
}
