//! Bounded worker pool executing fired jobs.
//!
//! A fixed set of worker tasks drains one bounded queue, so submissions are
//! picked up in submission order by whichever worker frees up first.
//! Capacity is reserved at submission time: `available()` counts workers
//! that are neither running nor already promised work, which is what the
//! scheduler loop sizes its acquisition batches with.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use {
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::{debug, trace},
};

use crate::error::{Error, Result};

/// Workers spawned when the configuration does not say otherwise.
pub const DEFAULT_POOL_SIZE: usize = 10;

pub(crate) type WorkUnit = Pin<Box<dyn Future<Output = ()> + Send>>;

pub struct WorkerPool {
    tx: Mutex<Option<mpsc::Sender<WorkUnit>>>,
    rx_slot: Mutex<Option<mpsc::Receiver<WorkUnit>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    available: Arc<AtomicUsize>,
    size: usize,
}

impl WorkerPool {
    /// Build the pool without spawning anything; [`start`](Self::start)
    /// brings the workers up inside a runtime.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel::<WorkUnit>(size);
        Self {
            tx: Mutex::new(Some(tx)),
            rx_slot: Mutex::new(Some(rx)),
            handles: Mutex::new(Vec::new()),
            available: Arc::new(AtomicUsize::new(size)),
            size,
        }
    }

    /// Spawn the worker tasks. Idempotent.
    pub fn start(&self) {
        let rx = {
            let mut slot = self.rx_slot.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        let Some(rx) = rx else {
            return;
        };
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for worker in 0..self.size {
            let rx = Arc::clone(&rx);
            let available = Arc::clone(&self.available);
            handles.push(tokio::spawn(async move {
                loop {
                    let unit = { rx.lock().await.recv().await };
                    let Some(unit) = unit else {
                        trace!(worker, "worker queue closed, exiting");
                        break;
                    };
                    unit.await;
                    available.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        debug!(size = self.size, "worker pool started");
    }

    /// Workers with no running or promised work.
    pub fn available(&self) -> usize {
        self.available.load(Ordering::SeqCst)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue one unit. Callers check [`available`](Self::available) first;
    /// a rejection here means that discipline was broken and is treated as
    /// fatal upstream.
    pub(crate) fn submit(&self, unit: WorkUnit) -> Result<()> {
        let reserved = self
            .available
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok();
        if !reserved {
            return Err(Error::WorkerPoolExhausted);
        }

        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = tx.as_ref() else {
            self.available.fetch_add(1, Ordering::SeqCst);
            return Err(Error::SchedulerShutdown);
        };
        // Queue capacity equals pool size and a slot was reserved above, so
        // there is always room here.
        tx.try_send(unit).map_err(|_| {
            self.available.fetch_add(1, Ordering::SeqCst);
            Error::WorkerPoolExhausted
        })
    }

    /// Stop accepting work. With `wait_for_completion` the call returns
    /// after every queued and running unit finished; otherwise in-flight
    /// work is aborted.
    pub async fn shutdown(&self, wait_for_completion: bool) {
        {
            let mut tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
            tx.take();
        }
        let handles: Vec<JoinHandle<()>> = {
            let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            handles.drain(..).collect()
        };
        if wait_for_completion {
            for handle in handles {
                let _ = handle.await;
            }
        } else {
            for handle in handles {
                handle.abort();
            }
        }
        debug!(wait_for_completion, "worker pool shut down");
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn started(size: usize) -> WorkerPool {
        let pool = WorkerPool::new(size);
        pool.start();
        pool
    }

    #[tokio::test]
    async fn runs_submitted_units() {
        let pool = started(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let c = Arc::clone(&counter);
            pool.submit(Box::pin(async move {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        tokio::time::timeout(Duration::from_secs(1), async {
            while counter.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("both units should run");
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn available_reflects_reservations() {
        let pool = started(1);
        assert_eq!(pool.available(), 1);

        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        pool.submit(Box::pin(async move {
            let _ = done_rx.await;
        }))
        .unwrap();
        assert_eq!(pool.available(), 0);

        // A second submission is refused while the only worker is promised.
        let refused = pool.submit(Box::pin(async {}));
        assert!(matches!(refused, Err(Error::WorkerPoolExhausted)));

        done_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while pool.available() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("worker should become idle again");
    }

    #[tokio::test]
    async fn graceful_shutdown_waits_for_in_flight_work() {
        let pool = started(1);
        let finished = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&finished);
        pool.submit(Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            f.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        pool.shutdown(true).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);

        // No further submissions after shutdown.
        let refused = pool.submit(Box::pin(async {}));
        assert!(refused.is_err());
    }

    #[tokio::test]
    async fn hard_shutdown_aborts_workers() {
        let pool = started(1);
        let finished = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&finished);
        pool.submit(Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            f.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.shutdown(false).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }
}
