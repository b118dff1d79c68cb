//! Observer hooks around trigger firing, job execution, and scheduler
//! lifecycle.
//!
//! Pre-fire notifications run on the scheduler loop; post-execution
//! notifications run on the worker that ran the job. A panicking listener is
//! caught and logged, never aborting the fire.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, RwLock},
};

use tracing::error;

use crate::{
    context::JobContext,
    trigger::Trigger,
    types::{CompletionCode, JobKey, TriggerKey},
};

/// Identity predicate scoping a trigger or job listener.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Matcher {
    #[default]
    Everything,
    NameEquals(String),
    GroupEquals(String),
}

impl Matcher {
    pub fn matches(&self, name: &str, group: &str) -> bool {
        match self {
            Self::Everything => true,
            Self::NameEquals(n) => n == name,
            Self::GroupEquals(g) => g == group,
        }
    }
}

/// Hooks around a trigger's fire cycle. All methods default to no-ops.
pub trait TriggerListener: Send + Sync {
    fn name(&self) -> &str;

    fn trigger_fired(&self, _trigger: &Trigger, _ctx: &JobContext) {}

    fn trigger_misfired(&self, _trigger: &Trigger) {}

    fn trigger_complete(&self, _trigger: &Trigger, _ctx: &JobContext, _code: CompletionCode) {}
}

/// Hooks around a job execution. All methods default to no-ops.
pub trait JobListener: Send + Sync {
    fn name(&self) -> &str;

    fn job_to_be_executed(&self, _ctx: &JobContext) {}

    fn job_was_executed(&self, _ctx: &JobContext, _code: CompletionCode) {}
}

/// Hooks around scheduler lifecycle and store mutations. All methods
/// default to no-ops.
pub trait SchedulerListener: Send + Sync {
    fn scheduler_started(&self) {}

    fn scheduler_in_standby(&self) {}

    fn scheduler_shutdown(&self) {}

    fn scheduler_error(&self, _message: &str) {}

    fn job_added(&self, _key: &JobKey) {}

    fn job_removed(&self, _key: &JobKey) {}

    fn trigger_scheduled(&self, _key: &TriggerKey) {}

    fn trigger_unscheduled(&self, _key: &TriggerKey) {}
}

/// Registered listeners. Lists are copy-on-write: notification snapshots
/// the current list and calls outside the lock, so listeners may themselves
/// register or remove listeners.
#[derive(Default)]
pub struct ListenerManager {
    trigger_listeners: RwLock<Vec<(Arc<dyn TriggerListener>, Matcher)>>,
    job_listeners: RwLock<Vec<(Arc<dyn JobListener>, Matcher)>>,
    scheduler_listeners: RwLock<Vec<Arc<dyn SchedulerListener>>>,
}

impl ListenerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_trigger_listener(&self, listener: Arc<dyn TriggerListener>, matcher: Matcher) {
        let mut listeners = self
            .trigger_listeners
            .write()
            .unwrap_or_else(|e| e.into_inner());
        listeners.push((listener, matcher));
    }

    pub fn add_job_listener(&self, listener: Arc<dyn JobListener>, matcher: Matcher) {
        let mut listeners = self
            .job_listeners
            .write()
            .unwrap_or_else(|e| e.into_inner());
        listeners.push((listener, matcher));
    }

    pub fn add_scheduler_listener(&self, listener: Arc<dyn SchedulerListener>) {
        let mut listeners = self
            .scheduler_listeners
            .write()
            .unwrap_or_else(|e| e.into_inner());
        listeners.push(listener);
    }

    pub fn remove_trigger_listener(&self, name: &str) -> bool {
        let mut listeners = self
            .trigger_listeners
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(l, _)| l.name() != name);
        listeners.len() < before
    }

    pub fn remove_job_listener(&self, name: &str) -> bool {
        let mut listeners = self
            .job_listeners
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(l, _)| l.name() != name);
        listeners.len() < before
    }

    fn trigger_snapshot(&self, key: &TriggerKey) -> Vec<Arc<dyn TriggerListener>> {
        let listeners = self
            .trigger_listeners
            .read()
            .unwrap_or_else(|e| e.into_inner());
        listeners
            .iter()
            .filter(|(_, m)| m.matches(&key.name, &key.group))
            .map(|(l, _)| Arc::clone(l))
            .collect()
    }

    fn job_snapshot(&self, key: &JobKey) -> Vec<Arc<dyn JobListener>> {
        let listeners = self
            .job_listeners
            .read()
            .unwrap_or_else(|e| e.into_inner());
        listeners
            .iter()
            .filter(|(_, m)| m.matches(&key.name, &key.group))
            .map(|(l, _)| Arc::clone(l))
            .collect()
    }

    fn scheduler_snapshot(&self) -> Vec<Arc<dyn SchedulerListener>> {
        let listeners = self
            .scheduler_listeners
            .read()
            .unwrap_or_else(|e| e.into_inner());
        listeners.clone()
    }

    pub(crate) fn notify_trigger_fired(&self, trigger: &Trigger, ctx: &JobContext) {
        for listener in self.trigger_snapshot(&trigger.key) {
            guarded(listener.name(), || listener.trigger_fired(trigger, ctx));
        }
    }

    pub(crate) fn notify_trigger_misfired(&self, trigger: &Trigger) {
        for listener in self.trigger_snapshot(&trigger.key) {
            guarded(listener.name(), || listener.trigger_misfired(trigger));
        }
    }

    pub(crate) fn notify_trigger_complete(
        &self,
        trigger: &Trigger,
        ctx: &JobContext,
        code: CompletionCode,
    ) {
        for listener in self.trigger_snapshot(&trigger.key) {
            guarded(listener.name(), || {
                listener.trigger_complete(trigger, ctx, code)
            });
        }
    }

    pub(crate) fn notify_job_to_be_executed(&self, ctx: &JobContext) {
        for listener in self.job_snapshot(ctx.job_key()) {
            guarded(listener.name(), || listener.job_to_be_executed(ctx));
        }
    }

    pub(crate) fn notify_job_was_executed(&self, ctx: &JobContext, code: CompletionCode) {
        for listener in self.job_snapshot(ctx.job_key()) {
            guarded(listener.name(), || listener.job_was_executed(ctx, code));
        }
    }

    pub(crate) fn notify_scheduler_started(&self) {
        for listener in self.scheduler_snapshot() {
            guarded("scheduler-listener", || listener.scheduler_started());
        }
    }

    pub(crate) fn notify_scheduler_in_standby(&self) {
        for listener in self.scheduler_snapshot() {
            guarded("scheduler-listener", || listener.scheduler_in_standby());
        }
    }

    pub(crate) fn notify_scheduler_shutdown(&self) {
        for listener in self.scheduler_snapshot() {
            guarded("scheduler-listener", || listener.scheduler_shutdown());
        }
    }

    pub(crate) fn notify_scheduler_error(&self, message: &str) {
        for listener in self.scheduler_snapshot() {
            guarded("scheduler-listener", || listener.scheduler_error(message));
        }
    }

    pub(crate) fn notify_job_added(&self, key: &JobKey) {
        for listener in self.scheduler_snapshot() {
            guarded("scheduler-listener", || listener.job_added(key));
        }
    }

    pub(crate) fn notify_job_removed(&self, key: &JobKey) {
        for listener in self.scheduler_snapshot() {
            guarded("scheduler-listener", || listener.job_removed(key));
        }
    }

    pub(crate) fn notify_trigger_scheduled(&self, key: &TriggerKey) {
        for listener in self.scheduler_snapshot() {
            guarded("scheduler-listener", || listener.trigger_scheduled(key));
        }
    }

    pub(crate) fn notify_trigger_unscheduled(&self, key: &TriggerKey) {
        for listener in self.scheduler_snapshot() {
            guarded("scheduler-listener", || listener.trigger_unscheduled(key));
        }
    }
}

/// Run one listener callback, catching panics so a broken listener cannot
/// take the fire down with it.
fn guarded<F: FnOnce()>(listener: &str, f: F) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(listener, "listener panicked; continuing");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct CountingSchedulerListener {
        started: AtomicUsize,
        jobs_added: AtomicUsize,
    }

    impl SchedulerListener for CountingSchedulerListener {
        fn scheduler_started(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn job_added(&self, _key: &JobKey) {
            self.jobs_added.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickingListener;

    impl SchedulerListener for PanickingListener {
        fn scheduler_started(&self) {
            panic!("listener bug");
        }
    }

    #[test]
    fn matcher_scoping() {
        assert!(Matcher::Everything.matches("a", "b"));
        assert!(Matcher::NameEquals("a".into()).matches("a", "whatever"));
        assert!(!Matcher::NameEquals("a".into()).matches("b", "whatever"));
        assert!(Matcher::GroupEquals("g".into()).matches("anything", "g"));
    }

    #[test]
    fn scheduler_listener_notified() {
        let manager = ListenerManager::new();
        let listener = Arc::new(CountingSchedulerListener::default());
        manager.add_scheduler_listener(listener.clone());

        manager.notify_scheduler_started();
        manager.notify_job_added(&JobKey::new("j"));

        assert_eq!(listener.started.load(Ordering::SeqCst), 1);
        assert_eq!(listener.jobs_added.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let manager = ListenerManager::new();
        let counting = Arc::new(CountingSchedulerListener::default());
        manager.add_scheduler_listener(Arc::new(PanickingListener));
        manager.add_scheduler_listener(counting.clone());

        manager.notify_scheduler_started();
        assert_eq!(counting.started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_listener_by_name() {
        struct Named;
        impl JobListener for Named {
            fn name(&self) -> &str {
                "audit"
            }
        }

        let manager = ListenerManager::new();
        manager.add_job_listener(Arc::new(Named), Matcher::Everything);
        assert!(manager.remove_job_listener("audit"));
        assert!(!manager.remove_job_listener("audit"));
    }
}
