//! Local timer for delayed publishes
//!
//! The log has no native delay primitive, so a delayed message lives in this
//! process as a sleeping tokio task until its timer fires. Nothing is
//! persisted: if the process exits first the message is lost. `shutdown`
//! reports how many were dropped so the loss is at least visible in logs.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::trace;

use inkstream_core::error::{InkstreamError, Result};

/// Handle to a scheduled delayed message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DelayedId(u64);

impl fmt::Display for DelayedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delayed-{}", self.0)
    }
}

/// Runs one sleeping task per delayed message
#[derive(Debug, Default)]
pub struct DelayedScheduler {
    next_id: AtomicU64,
    tasks: Arc<Mutex<HashMap<DelayedId, JoinHandle<()>>>>,
    stopped: AtomicBool,
}

impl DelayedScheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` once `delay` has elapsed. Fails with `Internal` outside a
    /// tokio runtime and with `ServiceStopped` after [`shutdown`](Self::shutdown).
    pub fn schedule<F>(&self, delay: Duration, job: F) -> Result<DelayedId>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            InkstreamError::Internal(format!("delayed publish needs a tokio runtime: {e}"))
        })?;

        // The map lock is held across the stop check and the spawn: shutdown
        // cannot drain in between, and a job that fires immediately cannot
        // try to remove itself before it has been inserted.
        let mut guard = self.tasks.lock();
        if self.stopped.load(Ordering::Acquire) {
            return Err(InkstreamError::ServiceStopped);
        }

        let id = DelayedId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let tasks = Arc::clone(&self.tasks);
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            job.await;
            tasks.lock().remove(&id);
        });
        guard.insert(id, handle);
        trace!(%id, delay_ms = delay.as_millis() as u64, "scheduled delayed job");
        Ok(id)
    }

    /// Cancel a job that has not fired yet
    pub fn cancel(&self, id: DelayedId) -> bool {
        match self.tasks.lock().remove(&id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Jobs waiting for their timer
    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Abort every outstanding job and refuse new ones. Returns how many were dropped.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<_> = {
            let mut tasks = self.tasks.lock();
            self.stopped.store(true, Ordering::Release);
            tasks.drain().collect()
        };
        for (_, handle) in &drained {
            handle.abort();
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_job_fires_after_delay() {
        let scheduler = DelayedScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        scheduler
            .schedule(Duration::from_secs(5), async move {
                f.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(scheduler.pending(), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let scheduler = DelayedScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let id = scheduler
            .schedule(Duration::from_secs(1), async move {
                f.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_and_refuses() {
        let scheduler = DelayedScheduler::new();
        for _ in 0..3 {
            scheduler
                .schedule(Duration::from_secs(60), async {})
                .unwrap();
        }
        assert_eq!(scheduler.shutdown(), 3);
        assert_eq!(scheduler.pending(), 0);
        assert!(matches!(
            scheduler.schedule(Duration::from_secs(1), async {}),
            Err(InkstreamError::ServiceStopped)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_schedule_racing_shutdown_leaves_nothing_behind() {
        for _ in 0..50 {
            let scheduler = Arc::new(DelayedScheduler::new());
            let mut racers = Vec::new();
            for _ in 0..4 {
                let scheduler = Arc::clone(&scheduler);
                racers.push(tokio::spawn(async move {
                    for _ in 0..50 {
                        let _ = scheduler.schedule(Duration::from_secs(60), async {});
                    }
                }));
            }
            tokio::task::yield_now().await;
            scheduler.shutdown();
            for racer in racers {
                racer.await.unwrap();
            }
            assert_eq!(scheduler.pending(), 0);
        }
    }

    #[test]
    fn test_schedule_outside_runtime_is_error() {
        let scheduler = DelayedScheduler::new();
        assert!(matches!(
            scheduler.schedule(Duration::from_secs(1), async {}),
            Err(InkstreamError::Internal(_))
        ));
        assert_eq!(scheduler.pending(), 0);
    }
}
