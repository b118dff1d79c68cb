//! Wake-up plumbing between store mutations and the scheduler loop.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Wakes the scheduler loop when new work arrives or state changes, and
/// carries the sticky shutdown flag the loop polls after every wake.
#[derive(Default)]
pub(crate) struct SchedulerSignaler {
    wake: Notify,
    shutting_down: AtomicBool,
}

impl SchedulerSignaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal a scheduling change (trigger added, completed, unblocked, ...)
    /// and wake the loop.
    pub fn signal_scheduling_change(&self) {
        self.wake.notify_one();
    }

    pub async fn wait(&self) {
        self.wake.notified().await;
    }

    pub fn request_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
        self.wake.notify_one();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    #[tokio::test]
    async fn change_signal_wakes_a_waiter() {
        let signaler = Arc::new(SchedulerSignaler::new());
        let waiter = {
            let s = Arc::clone(&signaler);
            tokio::spawn(async move { s.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        signaler.signal_scheduling_change();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .expect("waiter task should not panic");
    }

    #[tokio::test]
    async fn shutdown_flag_is_sticky() {
        let signaler = SchedulerSignaler::new();
        assert!(!signaler.is_shutting_down());
        signaler.request_shutdown();
        assert!(signaler.is_shutting_down());
    }
}
