use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(1);

/// Sliding-window limiter: at most `max_per_second` acquisitions in any
/// one-second window.
///
/// Uses tokio's clock so paused-time tests can drive it.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_second: usize,
    recent: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// A limit of zero disables limiting.
    pub fn new(max_per_second: usize) -> Self {
        Self {
            max_per_second,
            recent: Mutex::new(VecDeque::with_capacity(max_per_second)),
        }
    }

    /// Wait until a slot is free and take it.
    pub async fn acquire(&self) {
        if self.max_per_second == 0 {
            return;
        }
        loop {
            let wait = {
                let mut recent = self.recent.lock().await;
                let now = Instant::now();
                while recent.front().is_some_and(|t| now.duration_since(*t) >= WINDOW) {
                    recent.pop_front();
                }
                if recent.len() < self.max_per_second {
                    recent.push_back(now);
                    return;
                }
                match recent.front() {
                    Some(oldest) => WINDOW.saturating_sub(now.duration_since(*oldest)),
                    None => Duration::ZERO,
                }
            };
            // Never spin on a zero wait.
            let wait = wait.max(Duration::from_millis(1));
            tracing::trace!(wait_ms = wait.as_millis() as u64, "Rate limiter waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_within_limit_is_immediate() {
        let limiter = RateLimiter::new(3);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_excess_waits_for_window() {
        let limiter = RateLimiter::new(3);
        let start = Instant::now();
        for _ in 0..7 {
            limiter.acquire().await;
        }
        // Slots 4-6 open after one second, slot 7 after two.
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_limit() {
        let limiter = Arc::new(RateLimiter::new(2));
        let start = Instant::now();
        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_disables_limit() {
        let limiter = RateLimiter::new(0);
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
