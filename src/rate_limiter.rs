//! Per-provider admission gate
//!
//! A sliding one-minute window of admission timestamps. Callers that find
//! the window full sleep until the oldest admission expires and try again,
//! so every caller eventually gets through.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);
const MIN_WAIT: Duration = Duration::from_millis(100);

/// Sliding-window rate limiter
///
/// A limit of `0` disables limiting entirely.
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum number of admissions per minute
    max_requests_per_minute: u32,
    /// Admission timestamps inside the current window, oldest first
    admissions: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    ///
    /// # Arguments
    ///
    /// * `max_requests_per_minute` - Maximum admissions allowed per minute, 0 for unlimited
    ///
    /// # Returns
    ///
    /// Returns a new RateLimiter instance
    pub fn new(max_requests_per_minute: u32) -> Self {
        Self {
            max_requests_per_minute,
            admissions: Mutex::new(VecDeque::new()),
        }
    }

    /// Configured limit
    pub fn limit(&self) -> u32 {
        self.max_requests_per_minute
    }

    /// Wait until the window has room, then record the admission
    ///
    /// Never fails; only blocks. Cancel by dropping the future.
    pub async fn acquire(&self) {
        if self.max_requests_per_minute == 0 {
            return;
        }

        loop {
            let wait = {
                let mut admissions = self.admissions.lock().await;
                let now = Instant::now();
                while admissions
                    .front()
                    .is_some_and(|oldest| now.duration_since(*oldest) >= WINDOW)
                {
                    admissions.pop_front();
                }

                if admissions.len() < self.max_requests_per_minute as usize {
                    admissions.push_back(now);
                    return;
                }

                match admissions.front() {
                    Some(oldest) => (*oldest + WINDOW).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };

            let wait = wait.max(MIN_WAIT);
            tracing::debug!(
                "Rate limit of {} requests/minute reached, waiting {:?}",
                self.max_requests_per_minute,
                wait
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of admissions currently inside the window
    pub async fn in_window(&self) -> usize {
        let admissions = self.admissions.lock().await;
        let now = Instant::now();
        admissions
            .iter()
            .filter(|at| now.duration_since(**at) < WINDOW)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_never_waits() {
        let limiter = RateLimiter::new(0);
        let start = Instant::now();
        for _ in 0..1000 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_window().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admits_up_to_limit_immediately() {
        let limiter = RateLimiter::new(3);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_window().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extra_request_waits_for_oldest_to_expire() {
        let limiter = RateLimiter::new(2);
        let start = Instant::now();
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        limiter.acquire().await;

        limiter.acquire().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(60), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(61), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_all_progress() {
        let limiter = Arc::new(RateLimiter::new(2));
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut admitted = Vec::new();
        for handle in handles {
            admitted.push(handle.await.unwrap().duration_since(start));
        }
        admitted.sort();

        assert_eq!(admitted.len(), 5);
        assert!(admitted[1] < Duration::from_secs(1));
        assert!(admitted[2] >= Duration::from_secs(60));
        assert!(admitted[4] >= Duration::from_secs(120));
    }
}
