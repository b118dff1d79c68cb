//! The scheduler facade: lifecycle, programmatic API, and the time-driven
//! loop that selects, acquires, and fires triggers.

use std::{
    collections::BTreeMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration as StdDuration,
};

use {
    chrono::{DateTime, Duration, Utc},
    tokio::{task::JoinHandle, time::sleep},
    tracing::{debug, error, info, warn},
    uuid::Uuid,
};

use crate::{
    context::JobContext,
    descriptor::{self, DescriptorFormat, LoadSummary},
    error::{Error, Result},
    job::{DeclaredSchedule, JobDetail, JobTypeRegistry},
    listener::ListenerManager,
    pool::{DEFAULT_POOL_SIZE, WorkUnit, WorkerPool},
    signal::SchedulerSignaler,
    store::JobStore,
    trigger::{RepeatCount, Schedule, Trigger},
    types::{DataMap, JobKey, SchedulerState, SchedulerStatus, TriggerKey},
};

/// Tunables for a scheduler instance.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker pool size.
    pub worker_threads: usize,
    /// How far ahead the loop looks for due triggers, and how long it parks
    /// with nothing to do.
    pub idle_wait: StdDuration,
    /// Lateness past the fire time before a trigger counts as misfired.
    pub misfire_threshold: StdDuration,
    /// How far apart the fire times within one acquisition batch may be.
    pub batch_time_window: StdDuration,
    /// Cap on one acquisition batch; defaults to the pool size.
    pub max_batch_size: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: DEFAULT_POOL_SIZE,
            idle_wait: StdDuration::from_secs(30),
            misfire_threshold: StdDuration::from_secs(5),
            batch_time_window: StdDuration::ZERO,
            max_batch_size: None,
        }
    }
}

/// One currently running execution, tracked for interruption and
/// introspection.
pub(crate) struct ExecutingJob {
    pub job_key: JobKey,
    pub trigger_key: TriggerKey,
    pub fire_instance_id: String,
    pub fire_time: DateTime<Utc>,
    pub data: DataMap,
    pub interrupt: Arc<AtomicBool>,
}

/// Public view of a running execution.
#[derive(Debug, Clone)]
pub struct ExecutingJobInfo {
    pub job_key: JobKey,
    pub trigger_key: TriggerKey,
    pub fire_instance_id: String,
    pub fire_time: DateTime<Utc>,
}

/// An in-process, in-memory job scheduler. Construct one per embedding
/// application; there is no process-wide singleton.
pub struct Scheduler {
    pub(crate) config: SchedulerConfig,
    pub(crate) store: JobStore,
    pub(crate) pool: WorkerPool,
    pub(crate) listeners: ListenerManager,
    pub(crate) registry: JobTypeRegistry,
    pub(crate) signaler: SchedulerSignaler,
    pub(crate) executing: std::sync::Mutex<Vec<ExecutingJob>>,
    pub(crate) global_lock: AtomicBool,
    state: RwLock<SchedulerState>,
    loop_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        let misfire_threshold = Duration::from_std(config.misfire_threshold)
            .unwrap_or_else(|_| Duration::seconds(5));
        Arc::new(Self {
            store: JobStore::new(misfire_threshold),
            pool: WorkerPool::new(config.worker_threads),
            listeners: ListenerManager::new(),
            registry: JobTypeRegistry::new(),
            signaler: SchedulerSignaler::new(),
            executing: std::sync::Mutex::new(Vec::new()),
            global_lock: AtomicBool::new(false),
            state: RwLock::new(SchedulerState::Initialized),
            loop_handle: tokio::sync::Mutex::new(None),
            config,
        })
    }

    pub fn with_defaults() -> Arc<Self> {
        Self::new(SchedulerConfig::default())
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    pub fn state(&self) -> SchedulerState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: SchedulerState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn ensure_mutable(&self) -> Result<()> {
        match self.state() {
            SchedulerState::ShuttingDown | SchedulerState::Shutdown => {
                Err(Error::SchedulerShutdown)
            },
            _ => Ok(()),
        }
    }

    /// Start (or resume from standby) firing triggers.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.ensure_mutable()?;
        if self.state() == SchedulerState::Started {
            return Ok(());
        }
        self.pool.start();
        self.set_state(SchedulerState::Started);

        let mut handle = self.loop_handle.lock().await;
        if handle.is_none() {
            let scheduler = Arc::clone(self);
            *handle = Some(tokio::spawn(async move {
                scheduler.scheduler_loop().await;
            }));
        }
        drop(handle);

        self.signaler.signal_scheduling_change();
        self.listeners.notify_scheduler_started();
        info!(workers = self.config.worker_threads, "scheduler started");
        Ok(())
    }

    /// Keep advancing trigger times but stop dispatching executions.
    pub fn standby(&self) {
        if self.ensure_mutable().is_err() {
            return;
        }
        self.set_state(SchedulerState::Standby);
        self.signaler.signal_scheduling_change();
        self.listeners.notify_scheduler_in_standby();
        info!("scheduler in standby");
    }

    /// Stop the loop and the worker pool. With `wait_for_completion` every
    /// in-flight job finishes first; otherwise running jobs get their
    /// interrupt flag raised and the workers are aborted.
    pub async fn shutdown(&self, wait_for_completion: bool) {
        if self.state() == SchedulerState::Shutdown {
            return;
        }
        self.set_state(SchedulerState::ShuttingDown);
        info!(wait_for_completion, "scheduler shutting down");
        self.signaler.request_shutdown();

        if let Some(handle) = self.loop_handle.lock().await.take() {
            let _ = handle.await;
        }

        if !wait_for_completion {
            let executing = self.executing.lock().unwrap_or_else(|e| e.into_inner());
            for entry in executing.iter() {
                entry.interrupt.store(true, Ordering::SeqCst);
            }
        }
        self.pool.shutdown(wait_for_completion).await;

        self.set_state(SchedulerState::Shutdown);
        self.listeners.notify_scheduler_shutdown();
    }

    // ── Global lock ─────────────────────────────────────────────────────

    /// Suppress new executions without stopping trigger advancement.
    pub fn lock(&self) {
        self.global_lock.store(true, Ordering::SeqCst);
        info!("scheduler locked");
    }

    pub fn unlock(&self) {
        self.global_lock.store(false, Ordering::SeqCst);
        info!("scheduler unlocked");
    }

    pub fn is_locked(&self) -> bool {
        self.global_lock.load(Ordering::SeqCst)
    }

    // ── Jobs ────────────────────────────────────────────────────────────

    pub fn add_job(&self, detail: JobDetail, replace: bool) -> Result<()> {
        self.ensure_mutable()?;
        let key = detail.key.clone();
        self.store.store_job(detail, replace)?;
        self.listeners.notify_job_added(&key);
        Ok(())
    }

    /// Add a durable job resolved from the type registry, installing any
    /// triggers declared with the type.
    pub fn add_job_by_type(
        &self,
        name: &str,
        type_name: &str,
        concurrency_allowed: bool,
    ) -> Result<()> {
        self.ensure_mutable()?;
        let factory = self
            .registry
            .factory(type_name)
            .ok_or_else(|| Error::unknown_job_type(type_name))?;
        let key = JobKey::new(name);
        let detail = JobDetail::new(key.clone(), factory)
            .durable(true)
            .concurrency_allowed(concurrency_allowed);
        self.store.store_job(detail, false)?;
        self.listeners.notify_job_added(&key);

        for (i, declared) in self.registry.declared_triggers(type_name).iter().enumerate() {
            let trigger_key = TriggerKey::new(format!("{name}_trigger_{i}"));
            let schedule = match &declared.schedule {
                DeclaredSchedule::Cron { expression } => Schedule::Cron {
                    expression: expression.parse()?,
                    time_zone: chrono_tz::UTC,
                },
                DeclaredSchedule::Simple {
                    repeat_interval_ms,
                    repeat_count,
                } => Schedule::Simple {
                    repeat_interval_ms: *repeat_interval_ms,
                    repeat_count: repeat_count
                        .map_or(RepeatCount::Indefinitely, RepeatCount::Times),
                },
            };
            let trigger = Trigger::new(trigger_key, key.clone(), schedule)
                .with_data(declared.data.clone());
            self.schedule_job(trigger)?;
        }
        Ok(())
    }

    /// Remove a job and everything scheduled for it.
    pub fn remove_job(&self, key: &JobKey) -> bool {
        let removed = self.store.remove_job(key);
        if removed {
            self.listeners.notify_job_removed(key);
            self.signaler.signal_scheduling_change();
        }
        removed
    }

    // ── Triggers ────────────────────────────────────────────────────────

    pub fn schedule_job(&self, trigger: Trigger) -> Result<()> {
        self.ensure_mutable()?;
        let key = trigger.key.clone();
        self.store.store_trigger(trigger, false)?;
        self.listeners.notify_trigger_scheduled(&key);
        self.signaler.signal_scheduling_change();
        Ok(())
    }

    /// Replace a trigger by identity, rescheduling it.
    pub fn reschedule_job(&self, trigger: Trigger) -> Result<()> {
        self.ensure_mutable()?;
        let key = trigger.key.clone();
        self.store.store_trigger(trigger, true)?;
        self.listeners.notify_trigger_scheduled(&key);
        self.signaler.signal_scheduling_change();
        Ok(())
    }

    pub fn unschedule_job(&self, key: &TriggerKey) -> bool {
        let removed = self.store.remove_trigger(key);
        if removed {
            self.listeners.notify_trigger_unscheduled(key);
            self.signaler.signal_scheduling_change();
        }
        removed
    }

    pub fn pause_trigger(&self, key: &TriggerKey) -> Result<()> {
        self.store.pause_trigger(key)
    }

    pub fn resume_trigger(&self, key: &TriggerKey) -> Result<()> {
        self.store.resume_trigger(key)?;
        self.signaler.signal_scheduling_change();
        Ok(())
    }

    /// Schedule `expression` (UTC) against an existing job.
    pub fn add_cron_trigger(&self, name: &str, job_name: &str, expression: &str) -> Result<()> {
        let trigger = Trigger::new(
            TriggerKey::new(name),
            JobKey::new(job_name),
            Schedule::Cron {
                expression: expression.parse()?,
                time_zone: chrono_tz::UTC,
            },
        );
        self.schedule_job(trigger)
    }

    /// Schedule a fixed-interval trigger against an existing job.
    pub fn add_simple_trigger(
        &self,
        name: &str,
        job_name: &str,
        repeat_count: RepeatCount,
        repeat_interval_ms: u64,
    ) -> Result<()> {
        let trigger = Trigger::new(
            TriggerKey::new(name),
            JobKey::new(job_name),
            Schedule::Simple {
                repeat_interval_ms,
                repeat_count,
            },
        );
        self.schedule_job(trigger)
    }

    // ── Immediate fires and interruption ────────────────────────────────

    /// Fire a job once, now.
    pub fn trigger_job(&self, key: &JobKey) -> Result<()> {
        self.trigger_job_with_data(key, DataMap::new())
    }

    /// Fire a job once, now, with extra data overlaid on the job's map for
    /// this fire only.
    pub fn trigger_job_with_data(&self, key: &JobKey, data: DataMap) -> Result<()> {
        self.ensure_mutable()?;
        if !self.store.contains_job(key) {
            error!(job = %key, "cannot fire unknown job");
            return Err(Error::job_not_found(key.clone()));
        }
        let trigger = Trigger::new(
            TriggerKey::new(format!("MT_{}", Uuid::new_v4().simple())),
            key.clone(),
            Schedule::Simple {
                repeat_interval_ms: 0,
                repeat_count: RepeatCount::Times(0),
            },
        )
        .with_data(data)
        .with_start_time(Utc::now());
        self.store.store_trigger(trigger, false)?;
        self.signaler.signal_scheduling_change();
        Ok(())
    }

    /// Raise the interrupt flag on every running execution of the named
    /// job. Returns how many were flagged.
    pub fn interrupt_job(&self, job_name: &str) -> usize {
        let executing = self.executing.lock().unwrap_or_else(|e| e.into_inner());
        let mut flagged = 0;
        for entry in executing.iter() {
            if entry.job_key.name == job_name {
                debug!(job = %entry.job_key, fire = %entry.fire_instance_id, "interrupting");
                entry.interrupt.store(true, Ordering::SeqCst);
                flagged += 1;
            }
        }
        if flagged == 0 {
            debug!(job = job_name, "no matching running job to interrupt");
        }
        flagged
    }

    /// Like [`interrupt_job`](Self::interrupt_job), additionally requiring
    /// the execution's merged data map to carry `key` with a value equal to
    /// `value`, compared case-insensitively.
    pub fn interrupt_job_matching(&self, job_name: &str, key: &str, value: &str) -> usize {
        let executing = self.executing.lock().unwrap_or_else(|e| e.into_inner());
        let mut flagged = 0;
        for entry in executing.iter() {
            if entry.job_key.name != job_name {
                continue;
            }
            let matches = entry
                .data
                .get(key)
                .is_some_and(|v| v.to_string().eq_ignore_ascii_case(value));
            if matches {
                entry.interrupt.store(true, Ordering::SeqCst);
                flagged += 1;
            }
        }
        flagged
    }

    pub fn is_job_running(&self, job_name: &str) -> bool {
        let executing = self.executing.lock().unwrap_or_else(|e| e.into_inner());
        executing.iter().any(|e| e.job_key.name == job_name)
    }

    pub fn executing_jobs(&self) -> Vec<ExecutingJobInfo> {
        let executing = self.executing.lock().unwrap_or_else(|e| e.into_inner());
        executing
            .iter()
            .map(|e| ExecutingJobInfo {
                job_key: e.job_key.clone(),
                trigger_key: e.trigger_key.clone(),
                fire_instance_id: e.fire_instance_id.clone(),
                fire_time: e.fire_time,
            })
            .collect()
    }

    // ── Introspection ───────────────────────────────────────────────────

    /// All job names, alphabetical.
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .store
            .job_keys()
            .into_iter()
            .map(|k| k.name)
            .collect();
        names.sort();
        names
    }

    /// Sorted map of every job to its triggers.
    pub fn jobs_and_triggers(&self) -> BTreeMap<JobKey, Vec<TriggerKey>> {
        self.store.jobs_and_triggers()
    }

    pub fn status(&self) -> SchedulerStatus {
        let executing_count = self
            .executing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len();
        SchedulerStatus {
            state: self.state(),
            job_count: self.store.job_count(),
            trigger_count: self.store.trigger_count(),
            executing_count,
            locked: self.is_locked(),
            next_fire_time: self.store.next_fire_time(),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn registry(&self) -> &JobTypeRegistry {
        &self.registry
    }

    pub fn listeners(&self) -> &ListenerManager {
        &self.listeners
    }

    // ── Descriptor loading ──────────────────────────────────────────────

    /// Load a declarative schedule document from `path`. A missing file is
    /// tolerated with a warning unless `fail_on_missing` is set.
    pub fn load_descriptor(
        &self,
        path: impl AsRef<std::path::Path>,
        fail_on_missing: bool,
    ) -> Result<LoadSummary> {
        self.ensure_mutable()?;
        let summary = descriptor::load_file(path.as_ref(), fail_on_missing, self)?;
        self.signaler.signal_scheduling_change();
        Ok(summary)
    }

    /// Load a declarative schedule document from a string.
    pub fn load_descriptor_str(&self, text: &str, format: DescriptorFormat) -> Result<LoadSummary> {
        self.ensure_mutable()?;
        let summary = descriptor::load_str(text, format, self)?;
        self.signaler.signal_scheduling_change();
        Ok(summary)
    }

    // ── The loop ────────────────────────────────────────────────────────

    async fn scheduler_loop(self: Arc<Self>) {
        debug!("scheduler loop running");
        loop {
            if self.signaler.is_shutting_down() {
                break;
            }

            if self.pool.available() == 0 {
                tokio::select! {
                    () = self.signaler.wait() => {},
                    () = sleep(StdDuration::from_millis(50)) => {},
                }
                continue;
            }

            let now = Utc::now();
            let idle_wait =
                Duration::from_std(self.config.idle_wait).unwrap_or_else(|_| Duration::seconds(30));
            let window = Duration::from_std(self.config.batch_time_window)
                .unwrap_or_else(|_| Duration::zero());
            let max_batch = self
                .config
                .max_batch_size
                .unwrap_or(self.pool.size())
                .min(self.pool.available())
                .max(1);

            let result = self
                .store
                .acquire_next_triggers(now, now + idle_wait, max_batch, window);
            for misfired in &result.misfired {
                warn!(trigger = %misfired.key, "trigger misfired");
                self.listeners.notify_trigger_misfired(misfired);
            }

            if result.acquired.is_empty() {
                tokio::select! {
                    () = self.signaler.wait() => {},
                    () = sleep(self.config.idle_wait) => {},
                }
                continue;
            }

            let Some(head_fire) = result.acquired[0].next_fire_time() else {
                // Cannot happen: acquisition only returns indexed triggers.
                for t in &result.acquired {
                    self.store.release_acquired_trigger(&t.key);
                }
                continue;
            };

            if !self.wait_for_fire_time(head_fire).await {
                debug!("releasing acquired batch after scheduling change");
                for t in &result.acquired {
                    self.store.release_acquired_trigger(&t.key);
                }
                continue;
            }

            let now = Utc::now();
            let keys: Vec<TriggerKey> = result.acquired.iter().map(|t| t.key.clone()).collect();
            let bundles = self.store.triggers_fired(&keys, now);
            let dispatching = self.state() == SchedulerState::Started;

            for bundle in bundles {
                if !dispatching {
                    debug!(trigger = %bundle.trigger.key, "standby: trigger advanced without dispatch");
                    self.store
                        .triggered_job_complete(&bundle.trigger.key, &bundle.job.key);
                    continue;
                }

                let ctx = JobContext::new(
                    &bundle.job,
                    &bundle.trigger,
                    bundle.fire_instance_id.clone(),
                    bundle.fire_time,
                    bundle.scheduled_fire_time,
                );
                self.listeners.notify_trigger_fired(&bundle.trigger, &ctx);

                let scheduler = Arc::clone(&self);
                let unit: WorkUnit = Box::pin(async move {
                    scheduler.run_fired_job(bundle, ctx).await;
                });
                if let Err(e) = self.pool.submit(unit) {
                    // The availability precheck makes this unreachable;
                    // observing it means the engine is unsound.
                    error!(error = %e, "worker pool rejected a fired job");
                    self.set_state(SchedulerState::Error);
                    self.listeners
                        .notify_scheduler_error("worker pool rejected a submission");
                    return;
                }
            }
        }
        debug!("scheduler loop exited");
    }

    /// Sleep until `fire_time`, watching the signaler. Returns false when
    /// the batch should be released and re-acquired (shutdown, or an
    /// earlier trigger arrived).
    async fn wait_for_fire_time(&self, fire_time: DateTime<Utc>) -> bool {
        loop {
            let now = Utc::now();
            let wait = fire_time - now;
            if wait <= Duration::zero() {
                return true;
            }
            let wait = wait.to_std().unwrap_or(StdDuration::from_millis(1));
            tokio::select! {
                () = sleep(wait) => return true,
                () = self.signaler.wait() => {
                    if self.signaler.is_shutting_down() {
                        return false;
                    }
                    if self.store.next_fire_time().is_some_and(|t| t < fire_time) {
                        return false;
                    }
                },
            }
        }
    }
}
