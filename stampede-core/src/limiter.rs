//! Concurrency and pacing gate for outbound operations
//!
//! Two independent instances exist per run: one throttling source-control
//! and API traffic, one throttling test invocations.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

/// Admits at most `max_concurrent` tasks at once, with at least `min_delay`
/// between consecutive dispatches
///
/// Admission is FIFO relative to submission; completion order between
/// concurrently-admitted tasks is unconstrained. Completing a task frees a
/// concurrency slot but never bypasses the pacing gate for the next
/// admission. A failing task resolves only its own future.
#[derive(Debug)]
pub struct RateLimiter {
    slots: Semaphore,
    next_dispatch: Mutex<Instant>,
    min_delay: Duration,
}

impl RateLimiter {
    /// Create a limiter with the given concurrency bound and pacing delay
    pub fn new(max_concurrent: usize, min_delay: Duration) -> Self {
        Self {
            slots: Semaphore::new(max_concurrent),
            next_dispatch: Mutex::new(Instant::now()),
            min_delay,
        }
    }

    /// Run `task` once a concurrency slot is free and the pacing gate has
    /// elapsed
    ///
    /// The slot is held for the task's full duration; the pacing gate is
    /// keyed to dispatch times only.
    pub async fn run<F, Fut, T>(&self, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _slot = self
            .slots
            .acquire()
            .await
            .expect("rate limiter semaphore is never closed");

        let dispatch_at = {
            let mut next = self.next_dispatch.lock().await;
            let at = (*next).max(Instant::now());
            *next = at + self.min_delay;
            at
        };
        tokio::time::sleep_until(dispatch_at).await;

        task().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_serial_dispatches_are_spaced_by_min_delay() {
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_millis(100)));
        let starts = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            let starts = Arc::clone(&starts);
            handles.push(tokio::spawn(async move {
                limiter
                    .run(|| async {
                        starts.lock().await.push(Instant::now());
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let starts = starts.lock().await;
        assert_eq!(starts.len(), 4);
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let limiter = Arc::new(RateLimiter::new(3, Duration::ZERO));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let limiter = Arc::clone(&limiter);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                limiter
                    .run(|| async {
                        let now_active = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now_active, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_task_failure_does_not_affect_siblings() {
        let limiter = RateLimiter::new(1, Duration::ZERO);

        let bad: std::result::Result<(), &str> =
            limiter.run(|| async { Err("boom") }).await;
        assert!(bad.is_err());

        let good: std::result::Result<u32, &str> =
            limiter.run(|| async { Ok(42) }).await;
        assert_eq!(good.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_does_not_bypass_pacing_gate() {
        let limiter = Arc::new(RateLimiter::new(2, Duration::from_millis(100)));
        let starts = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let limiter = Arc::clone(&limiter);
            let starts = Arc::clone(&starts);
            handles.push(tokio::spawn(async move {
                limiter
                    .run(|| async {
                        starts.lock().await.push(Instant::now());
                        // Finishes well inside the pacing window.
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let starts = starts.lock().await;
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }
}
