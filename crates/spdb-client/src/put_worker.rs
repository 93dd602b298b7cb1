//! Bounded pool of detached put workers.
//!
//! Admission is a cutoff, not backpressure: when no permit is free a new put
//! is refused with [`ClientError::TooManyThreads`] and nothing is queued.
//! Workers report failures only through logs.

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use crate::config::DEFAULT_MAX_THREADS;
use crate::error::{ClientError, ClientResult};

#[derive(Debug)]
struct PoolInner {
    permits: Arc<Semaphore>,
    ceiling: Mutex<Ceiling>,
    idle: Notify,
}

/// `debt` counts permits still held by workers that must be retired when
/// they come back, after the ceiling was lowered below the live count.
#[derive(Debug, Default)]
struct Ceiling {
    max: usize,
    debt: usize,
}

impl PoolInner {
    fn live_count(&self) -> usize {
        let ceiling = self.ceiling.lock();
        (ceiling.max + ceiling.debt).saturating_sub(self.permits.available_permits())
    }
}

/// Cheap to clone; clones share one semaphore.
#[derive(Debug, Clone)]
pub struct PutWorkerPool {
    inner: Arc<PoolInner>,
}

/// A worker's permit. Returned to the pool, or retired, when dropped.
struct WorkerSlot {
    permit: Option<OwnedSemaphorePermit>,
    inner: Arc<PoolInner>,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            let mut ceiling = self.inner.ceiling.lock();
            if ceiling.debt > 0 {
                ceiling.debt -= 1;
                permit.forget();
            } else {
                drop(permit);
            }
        }
        if self.inner.live_count() == 0 {
            self.inner.idle.notify_waiters();
        }
    }
}

impl PutWorkerPool {
    pub fn new(max_workers: usize) -> Self {
        let max = max_workers.min(Semaphore::MAX_PERMITS);
        Self {
            inner: Arc::new(PoolInner {
                permits: Arc::new(Semaphore::new(max)),
                ceiling: Mutex::new(Ceiling { max, debt: 0 }),
                idle: Notify::new(),
            }),
        }
    }

    /// The process-wide pool shared by clients that are not given one.
    pub fn shared() -> Self {
        static SHARED: OnceLock<PutWorkerPool> = OnceLock::new();
        SHARED
            .get_or_init(|| PutWorkerPool::new(DEFAULT_MAX_THREADS))
            .clone()
    }

    pub fn live_count(&self) -> usize {
        self.inner.live_count()
    }

    pub fn max_workers(&self) -> usize {
        self.inner.ceiling.lock().max
    }

    /// Change the ceiling. Workers already running are not affected; when the
    /// ceiling drops below the live count, the excess permits are retired as
    /// those workers finish.
    pub fn set_max_workers(&self, max_workers: usize) {
        let new_max = max_workers.min(Semaphore::MAX_PERMITS);
        let mut ceiling = self.inner.ceiling.lock();
        if new_max > ceiling.max {
            let raise = new_max - ceiling.max;
            let repaid = raise.min(ceiling.debt);
            ceiling.debt -= repaid;
            self.inner.permits.add_permits(raise - repaid);
        } else if new_max < ceiling.max {
            let cut = ceiling.max - new_max;
            let forgotten = self.inner.permits.forget_permits(cut);
            ceiling.debt += cut - forgotten;
        }
        ceiling.max = new_max;
    }

    fn try_acquire(&self) -> ClientResult<WorkerSlot> {
        // The semaphore is never closed, so the only failure is NoPermits.
        let permit = Arc::clone(&self.inner.permits)
            .try_acquire_owned()
            .map_err(|_| ClientError::TooManyThreads {
                live: self.live_count(),
                max: self.max_workers(),
            })?;
        Ok(WorkerSlot {
            permit: Some(permit),
            inner: Arc::clone(&self.inner),
        })
    }

    /// Run `work` on a detached task if a permit is free.
    ///
    /// The returned `Ok` only means the work was admitted. Its outcome is
    /// logged under `label` and otherwise discarded.
    pub fn try_spawn<F>(&self, label: String, work: F) -> ClientResult<()>
    where
        F: Future<Output = ClientResult<()>> + Send + 'static,
    {
        let slot = self.try_acquire()?;
        tokio::spawn(async move {
            let _slot = slot;
            match work.await {
                Ok(()) => tracing::debug!(url = %label, "async put done"),
                Err(e) => tracing::error!(url = %label, error = %e, "async put failed"),
            }
        });
        Ok(())
    }

    /// Wait until no worker is live. Returns `false` if `timeout` elapsed
    /// first.
    pub async fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let wait = async {
            loop {
                let notified = self.inner.idle.notified();
                if self.live_count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        match timeout {
            Some(d) => tokio::time::timeout(d, wait).await.is_ok(),
            None => {
                wait.await;
                true
            }
        }
    }
}
