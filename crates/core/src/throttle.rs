//! # Single-Flight Throttle
//!
//! Guards an external capability with a hard remote concurrency ceiling.
//! The permit pool is an explicit semaphore owned by the throttle instance;
//! clone the throttle (or inject the same semaphore) to share the ceiling
//! between callers.
//!
//! Completion polling is a bounded wait: a fixed interval up to a fixed
//! elapsed budget, after which the caller gets [`PollOutcome::TimedOut`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct SingleFlight {
    permits: Arc<Semaphore>,
    ceiling: usize,
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SingleFlight {
    /// Throttle allowing `ceiling` calls in flight (at least one)
    pub fn new(ceiling: usize) -> Self {
        let ceiling = ceiling.max(1);
        Self {
            permits: Arc::new(Semaphore::new(ceiling)),
            ceiling,
        }
    }

    /// Share an existing permit pool
    pub fn from_semaphore(permits: Arc<Semaphore>, ceiling: usize) -> Self {
        Self { permits, ceiling }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `work` while holding a permit, waiting for one if necessary.
    ///
    /// The permit is released when `work` completes or is dropped.
    pub async fn run<F, T>(&self, work: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let _permit = self.permits.acquire().await.ok()?;
        Some(work.await)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(300),
        }
    }
}

/// Result of one status check
pub enum Poll<T, E> {
    Ready(T),
    Pending,
    Failed(E),
}

/// Terminal outcome of [`poll_until`]
#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome<T, E> {
    Ready(T),
    Failed(E),
    TimedOut { waited: Duration },
}

/// Call `check` every `policy.interval` until it is no longer pending or
/// `policy.max_wait` has elapsed.
pub async fn poll_until<T, E, F, Fut>(policy: PollPolicy, mut check: F) -> PollOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Poll<T, E>>,
{
    let started = Instant::now();
    loop {
        match check().await {
            Poll::Ready(value) => return PollOutcome::Ready(value),
            Poll::Failed(err) => return PollOutcome::Failed(err),
            Poll::Pending => {}
        }
        if started.elapsed() + policy.interval > policy.max_wait {
            return PollOutcome::TimedOut {
                waited: started.elapsed(),
            };
        }
        tokio::time::sleep(policy.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_ceiling_of_one_serializes() {
        let throttle = SingleFlight::default();
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let work = |inside: Arc<AtomicUsize>, peak: Arc<AtomicUsize>| async move {
            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            inside.fetch_sub(1, Ordering::SeqCst);
        };

        let (a, b, c) = tokio::join!(
            throttle.run(work(inside.clone(), peak.clone())),
            throttle.run(work(inside.clone(), peak.clone())),
            throttle.run(work(inside.clone(), peak.clone())),
        );
        assert!(a.is_some() && b.is_some() && c.is_some());
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(throttle.available(), 1);
    }

    #[tokio::test]
    async fn test_configurable_ceiling() {
        let throttle = SingleFlight::new(2);
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let work = |inside: Arc<AtomicUsize>, peak: Arc<AtomicUsize>| async move {
            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            inside.fetch_sub(1, Ordering::SeqCst);
        };

        tokio::join!(
            throttle.run(work(inside.clone(), peak.clone())),
            throttle.run(work(inside.clone(), peak.clone())),
            throttle.run(work(inside.clone(), peak.clone())),
        );
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shared_semaphore() {
        let permits = Arc::new(Semaphore::new(1));
        let a = SingleFlight::from_semaphore(permits.clone(), 1);
        let b = SingleFlight::from_semaphore(permits, 1);
        let _held = a.permits.acquire().await.unwrap();
        assert_eq!(b.available(), 0);
    }

    #[tokio::test]
    async fn test_poll_ready_after_pending() {
        let calls = AtomicUsize::new(0);
        let policy = PollPolicy {
            interval: Duration::from_millis(1),
            max_wait: Duration::from_secs(1),
        };
        let outcome: PollOutcome<&str, ()> = poll_until(policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Poll::Pending
                } else {
                    Poll::Ready("done")
                }
            }
        })
        .await;
        assert_eq!(outcome, PollOutcome::Ready("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_times_out() {
        let policy = PollPolicy {
            interval: Duration::from_millis(5),
            max_wait: Duration::from_millis(20),
        };
        let outcome: PollOutcome<(), ()> = poll_until(policy, || async { Poll::Pending }).await;
        assert!(matches!(outcome, PollOutcome::TimedOut { .. }));
    }
}
