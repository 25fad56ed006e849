//! Rate limiting for outbound platform calls.
//!
//! A [`RateLimiter`] runs operations one at a time in submission order, never
//! starts more than `max_per_window` operations within any rolling window,
//! and keeps a minimum gap between consecutive operations. It does not retry;
//! an operation's outcome (including an error) is handed straight back.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::MutexGuard;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use sweeper_core::WorkspaceId;

/// Rate limiter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum operations started per window.
    pub max_per_window: usize,

    /// Length of the rolling window.
    pub window: Duration,

    /// Minimum gap between the end of one operation and the start of the next.
    pub min_gap: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_window: 5,
            window: Duration::from_secs(1),
            min_gap: Duration::from_millis(100),
        }
    }
}

struct LimiterState {
    /// Start times inside the current window, oldest first.
    history: VecDeque<Instant>,
    last_finished: Option<Instant>,
}

/// FIFO, one-at-a-time rate limiter.
pub struct RateLimiter {
    config: RateLimitConfig,
    // tokio's mutex is fair, so waiters are served in submission order.
    state: tokio::sync::Mutex<LimiterState>,
    queued: AtomicUsize,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: RateLimitConfig {
                max_per_window: config.max_per_window.max(1),
                ..config
            },
            state: tokio::sync::Mutex::new(LimiterState {
                history: VecDeque::new(),
                last_finished: None,
            }),
            queued: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Operations waiting for or holding the limiter.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    /// Queue `op` and run it once the limits allow, returning its output.
    pub async fn execute<F, Fut, T>(&self, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _slot = QueueSlot::new(&self.queued);
        let mut state = self.state.lock().await;

        loop {
            let now = Instant::now();
            while let Some(&oldest) = state.history.front() {
                if now.duration_since(oldest) >= self.config.window {
                    state.history.pop_front();
                } else {
                    break;
                }
            }

            let mut ready = now;
            if let Some(finished) = state.last_finished {
                ready = ready.max(finished + self.config.min_gap);
            }
            if state.history.len() >= self.config.max_per_window {
                if let Some(&oldest) = state.history.front() {
                    ready = ready.max(oldest + self.config.window);
                }
            }

            if ready <= now {
                break;
            }
            debug!(
                wait_ms = ready.duration_since(now).as_millis() as u64,
                "Rate limiter waiting"
            );
            sleep_until(ready).await;
        }

        state.history.push_back(Instant::now());
        let running = RunningOp(state);
        let output = op().await;
        drop(running);
        output
    }
}

/// Counts one caller in `queued` until dropped, even if the caller is cancelled.
struct QueueSlot<'a>(&'a AtomicUsize);

impl<'a> QueueSlot<'a> {
    fn new(queued: &'a AtomicUsize) -> Self {
        queued.fetch_add(1, Ordering::Relaxed);
        Self(queued)
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Holds the limiter while an operation runs and stamps its finish time,
/// including when the operation is dropped midway.
struct RunningOp<'a>(MutexGuard<'a, LimiterState>);

impl Drop for RunningOp<'_> {
    fn drop(&mut self) {
        self.0.last_finished = Some(Instant::now());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

/// Hands out one independent limiter per key.
pub struct RateLimiterPool {
    config: RateLimitConfig,
    limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiterPool {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter for an arbitrary resource key, created on first use.
    pub fn for_key(&self, key: &str) -> Arc<RateLimiter> {
        let mut limiters = self
            .limiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        limiters
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(RateLimiter::new(self.config.clone())))
            .clone()
    }

    /// Limiter dedicated to one workspace.
    pub fn for_workspace(&self, workspace: &WorkspaceId) -> Arc<RateLimiter> {
        self.for_key(&format!("workspace:{workspace}"))
    }

    pub fn len(&self) -> usize {
        self.limiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Operations waiting on any limiter in the pool.
    pub fn queued(&self) -> usize {
        self.limiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|l| l.queued())
            .sum()
    }
}

impl Default for RateLimiterPool {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run_batch(limiter: Arc<RateLimiter>, count: usize) -> Vec<Instant> {
        let mut handles = Vec::new();
        for _ in 0..count {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.execute(|| async { Instant::now() }).await
            }));
        }

        let mut starts = Vec::new();
        for handle in handles {
            starts.push(handle.await.unwrap());
        }
        starts.sort();
        starts
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_window() {
        let limiter = Arc::new(RateLimiter::default());
        let starts = run_batch(limiter, 12).await;

        for pair in starts.windows(6) {
            assert!(pair[5].duration_since(pair[0]) >= Duration::from_secs(1));
        }
        for pair in starts.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tight_window_without_gap() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            max_per_window: 2,
            window: Duration::from_millis(500),
            min_gap: Duration::ZERO,
        }));
        let starts = run_batch(limiter, 7).await;

        for pair in starts.windows(3) {
            assert!(pair[2].duration_since(pair[0]) >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_execute_releases_slot() {
        let limiter = RateLimiter::default();
        limiter.execute(|| async {}).await;

        // Dropped while waiting out the minimum gap.
        tokio::select! {
            _ = limiter.execute(|| async {}) => panic!("gap should not have elapsed"),
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
        }
        assert_eq!(limiter.queued(), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;

        // Dropped while the operation itself is running.
        tokio::select! {
            _ = limiter.execute(|| tokio::time::sleep(Duration::from_secs(5))) => {
                panic!("operation should not have finished")
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {}
        }
        assert_eq!(limiter.queued(), 0);

        let cancelled_at = Instant::now();
        let started = limiter.execute(|| async { Instant::now() }).await;
        assert!(started >= cancelled_at + Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_block_queue() {
        let limiter = RateLimiter::default();

        let first: Result<(), &str> = limiter.execute(|| async { Err("boom") }).await;
        let second: Result<u32, &str> = limiter.execute(|| async { Ok(7) }).await;

        assert_eq!(first, Err("boom"));
        assert_eq!(second, Ok(7));
        assert_eq!(limiter.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_in_submission_order() {
        let limiter = Arc::new(RateLimiter::default());
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .execute(|| async move { order.lock().unwrap().push(i) })
                    .await
            }));
            // Let each task enqueue before spawning the next.
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_pool_isolates_workspaces() {
        let pool = RateLimiterPool::default();
        let a = pool.for_workspace(&WorkspaceId::new("g1"));
        let a_again = pool.for_workspace(&WorkspaceId::new("g1"));
        let b = pool.for_workspace(&WorkspaceId::new("g2"));

        assert!(Arc::ptr_eq(&a, &a_again));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 2);
    }
}
