//! In-memory job store: the single source of truth for jobs, triggers, and
//! the relationships between them.
//!
//! Every mutating operation takes the store-wide mutex; callers hold clones,
//! never references into the store. The acquisition index orders runnable
//! triggers by `(fire time asc, priority desc, name asc)`.

use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};

use {
    chrono::{DateTime, Duration, Utc},
    tracing::{debug, warn},
    uuid::Uuid,
};

use crate::{
    error::{Error, Result},
    job::JobDetail,
    trigger::Trigger,
    types::{JobKey, TriggerKey, TriggerState},
};

/// Default window past a trigger's fire time before it counts as misfired.
pub const DEFAULT_MISFIRE_THRESHOLD_MS: i64 = 5_000;

type IndexEntry = (i64, Reverse<i32>, TriggerKey);

/// One fired trigger, ready for dispatch: snapshots of the advanced trigger
/// and its job, plus fire metadata.
#[derive(Debug, Clone)]
pub struct FiredBundle {
    pub trigger: Trigger,
    pub job: JobDetail,
    pub fire_instance_id: String,
    pub fire_time: DateTime<Utc>,
    pub scheduled_fire_time: DateTime<Utc>,
}

/// Outcome of an acquisition pass.
#[derive(Debug, Default)]
pub struct AcquireResult {
    /// Triggers now marked `ACQUIRED`, in firing order.
    pub acquired: Vec<Trigger>,
    /// Triggers whose misfire policy was applied during the scan.
    pub misfired: Vec<Trigger>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobKey, JobDetail>,
    triggers: HashMap<TriggerKey, Trigger>,
    time_index: BTreeSet<IndexEntry>,
    blocked_jobs: HashSet<JobKey>,
}

impl Inner {
    fn index_entry(trigger: &Trigger) -> Option<IndexEntry> {
        trigger.next_fire_time().map(|at| {
            (
                at.timestamp_millis(),
                Reverse(trigger.priority),
                trigger.key.clone(),
            )
        })
    }

    fn index_insert(&mut self, trigger: &Trigger) {
        if let Some(entry) = Self::index_entry(trigger) {
            self.time_index.insert(entry);
        }
    }

    fn index_remove(&mut self, trigger: &Trigger) {
        if let Some(entry) = Self::index_entry(trigger) {
            self.time_index.remove(&entry);
        }
    }

    /// Remove a trigger; when that leaves a non-durable job with no
    /// triggers, remove the job too. Returns the cascaded job key, if any.
    fn remove_trigger_cascade(&mut self, key: &TriggerKey) -> Option<JobKey> {
        let trigger = self.triggers.remove(key)?;
        self.index_remove(&trigger);
        let job_key = trigger.job_key;

        let orphaned = !self.triggers.values().any(|t| t.job_key == job_key);
        if orphaned && self.jobs.get(&job_key).is_some_and(|job| !job.durable) {
            self.jobs.remove(&job_key);
            self.blocked_jobs.remove(&job_key);
            return Some(job_key);
        }
        None
    }

    fn trigger_keys_of_job(&self, job: &JobKey) -> Vec<TriggerKey> {
        let mut keys: Vec<TriggerKey> = self
            .triggers
            .values()
            .filter(|t| t.job_key == *job)
            .map(|t| t.key.clone())
            .collect();
        keys.sort();
        keys
    }
}

/// The RAM-backed store. See module docs for the locking discipline.
pub struct JobStore {
    inner: Mutex<Inner>,
    misfire_threshold: Duration,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new(Duration::milliseconds(DEFAULT_MISFIRE_THRESHOLD_MS))
    }
}

impl JobStore {
    pub fn new(misfire_threshold: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            misfire_threshold,
        }
    }

    fn locked(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace a job. Replacing keeps the job's triggers.
    pub fn store_job(&self, job: JobDetail, replace: bool) -> Result<()> {
        let mut inner = self.locked();
        if inner.jobs.contains_key(&job.key) && !replace {
            return Err(Error::JobAlreadyExists {
                key: job.key.clone(),
            });
        }
        debug!(job = %job.key, "storing job");
        inner.jobs.insert(job.key.clone(), job);
        Ok(())
    }

    /// Insert or replace a trigger. The target job must already exist. A
    /// fresh trigger gets its first fire time computed here; a trigger that
    /// can never fire is rejected.
    pub fn store_trigger(&self, mut trigger: Trigger, replace: bool) -> Result<()> {
        let mut inner = self.locked();
        if !inner.jobs.contains_key(&trigger.job_key) {
            return Err(Error::JobNotFound {
                key: trigger.job_key.clone(),
            });
        }
        if let Some(existing) = inner.triggers.get(&trigger.key) {
            if !replace {
                return Err(Error::TriggerAlreadyExists {
                    key: trigger.key.clone(),
                });
            }
            let existing = existing.clone();
            inner.index_remove(&existing);
        }

        if trigger.next_fire_time().is_none() {
            trigger.compute_first_fire_time();
        }
        if trigger.next_fire_time().is_none() {
            return Err(Error::TriggerWillNeverFire {
                key: trigger.key.clone(),
            });
        }

        trigger.state = TriggerState::Normal;
        debug!(trigger = %trigger.key, job = %trigger.job_key, "storing trigger");
        inner.index_insert(&trigger);
        inner.triggers.insert(trigger.key.clone(), trigger);
        Ok(())
    }

    /// Remove a job and all of its triggers. Acquired-but-unfired triggers
    /// simply vanish; the firing pass skips them.
    pub fn remove_job(&self, key: &JobKey) -> bool {
        let mut inner = self.locked();
        if inner.jobs.remove(key).is_none() {
            return false;
        }
        let trigger_keys = inner.trigger_keys_of_job(key);
        for tk in trigger_keys {
            if let Some(trigger) = inner.triggers.remove(&tk) {
                inner.index_remove(&trigger);
            }
        }
        inner.blocked_jobs.remove(key);
        debug!(job = %key, "removed job and its triggers");
        true
    }

    /// Remove a trigger, cascading removal of a non-durable job left with
    /// no triggers.
    pub fn remove_trigger(&self, key: &TriggerKey) -> bool {
        let mut inner = self.locked();
        let existed = inner.triggers.contains_key(key);
        if existed {
            let cascaded = inner.remove_trigger_cascade(key);
            if let Some(job) = cascaded {
                debug!(trigger = %key, job = %job, "trigger removal cascaded to its job");
            }
        }
        existed
    }

    /// Suspend a trigger until [`resume_trigger`](Self::resume_trigger).
    pub fn pause_trigger(&self, key: &TriggerKey) -> Result<()> {
        let mut inner = self.locked();
        let Some(trigger) = inner.triggers.get(key).cloned() else {
            return Err(Error::trigger_not_found(key.clone()));
        };
        if matches!(trigger.state, TriggerState::Normal | TriggerState::Blocked) {
            inner.index_remove(&trigger);
            if let Some(t) = inner.triggers.get_mut(key) {
                t.state = TriggerState::Paused;
            }
        }
        Ok(())
    }

    pub fn resume_trigger(&self, key: &TriggerKey) -> Result<()> {
        let mut inner = self.locked();
        let Some(trigger) = inner.triggers.get(key).cloned() else {
            return Err(Error::trigger_not_found(key.clone()));
        };
        if trigger.state == TriggerState::Paused {
            if let Some(t) = inner.triggers.get_mut(key) {
                t.state = TriggerState::Normal;
            }
            inner.index_insert(&trigger);
        }
        Ok(())
    }

    pub fn job(&self, key: &JobKey) -> Option<JobDetail> {
        self.locked().jobs.get(key).cloned()
    }

    pub fn trigger(&self, key: &TriggerKey) -> Option<Trigger> {
        self.locked().triggers.get(key).cloned()
    }

    pub fn contains_job(&self, key: &JobKey) -> bool {
        self.locked().jobs.contains_key(key)
    }

    pub fn job_count(&self) -> usize {
        self.locked().jobs.len()
    }

    pub fn trigger_count(&self) -> usize {
        self.locked().triggers.len()
    }

    /// All job keys, sorted.
    pub fn job_keys(&self) -> Vec<JobKey> {
        let inner = self.locked();
        let mut keys: Vec<JobKey> = inner.jobs.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Trigger keys of one job, sorted.
    pub fn triggers_of_job(&self, job: &JobKey) -> Vec<TriggerKey> {
        self.locked().trigger_keys_of_job(job)
    }

    /// Sorted map of every job to its trigger keys.
    pub fn jobs_and_triggers(&self) -> BTreeMap<JobKey, Vec<TriggerKey>> {
        let inner = self.locked();
        inner
            .jobs
            .keys()
            .map(|job| (job.clone(), inner.trigger_keys_of_job(job)))
            .collect()
    }

    /// Earliest indexed fire time, for loop parking decisions.
    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        let inner = self.locked();
        inner
            .time_index
            .first()
            .and_then(|(ms, _, _)| DateTime::from_timestamp_millis(*ms))
    }

    /// Claim up to `max_count` due triggers, in firing order, marking them
    /// `ACQUIRED`. The first claimed trigger may fire as late as
    /// `no_later_than`; the rest must fire within `time_window` of the
    /// first. Triggers of currently blocked jobs are skipped in place, and
    /// misfired triggers have their policy applied during the scan.
    pub fn acquire_next_triggers(
        &self,
        now: DateTime<Utc>,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: Duration,
    ) -> AcquireResult {
        let mut guard = self.locked();
        let inner = &mut *guard;
        let mut result = AcquireResult::default();
        let no_later_ms = no_later_than.timestamp_millis();
        let now_ms = now.timestamp_millis();
        let window_ms = time_window.num_milliseconds();

        'rescan: loop {
            let entries: Vec<IndexEntry> = inner.time_index.iter().cloned().collect();
            for entry in entries {
                let (fire_ms, _, ref key) = entry;
                if result.acquired.len() >= max_count {
                    break 'rescan;
                }
                let batch_limit = match result.acquired.first().and_then(Trigger::next_fire_time) {
                    Some(first) => first.timestamp_millis().max(now_ms) + window_ms,
                    None => no_later_ms,
                };
                if fire_ms > batch_limit {
                    break 'rescan;
                }

                let Some(trigger) = inner.triggers.get(key) else {
                    // Stale entry; drop it and rescan.
                    inner.time_index.remove(&entry);
                    continue 'rescan;
                };
                if inner.blocked_jobs.contains(&trigger.job_key) {
                    continue;
                }

                if trigger.has_misfired(now, self.misfire_threshold) {
                    inner.time_index.remove(&entry);
                    if let Some(t) = inner.triggers.get_mut(key) {
                        t.apply_misfire(now);
                        result.misfired.push(t.clone());
                        if t.next_fire_time().is_some() {
                            let t = t.clone();
                            inner.index_insert(&t);
                        } else {
                            debug!(trigger = %key, "trigger exhausted by misfire policy");
                            inner.remove_trigger_cascade(key);
                        }
                    }
                    continue 'rescan;
                }

                inner.time_index.remove(&entry);
                if let Some(t) = inner.triggers.get_mut(key) {
                    t.state = TriggerState::Acquired;
                    result.acquired.push(t.clone());
                }
            }
            break;
        }

        result
    }

    /// Return an acquired-but-unfired trigger to the runnable pool.
    pub fn release_acquired_trigger(&self, key: &TriggerKey) {
        let mut inner = self.locked();
        if let Some(trigger) = inner.triggers.get_mut(key)
            && trigger.state == TriggerState::Acquired
        {
            trigger.state = TriggerState::Normal;
            let trigger = trigger.clone();
            inner.index_insert(&trigger);
        }
    }

    /// Fire a batch of acquired triggers: advance each one, re-index or
    /// finalize it, and apply the non-concurrent blocking discipline.
    /// Triggers that disappeared (or whose job did) since acquisition are
    /// skipped.
    pub fn triggers_fired(&self, keys: &[TriggerKey], now: DateTime<Utc>) -> Vec<FiredBundle> {
        let mut guard = self.locked();
        let inner = &mut *guard;
        let mut bundles = Vec::with_capacity(keys.len());

        for key in keys {
            let Some(trigger) = inner.triggers.get_mut(key) else {
                debug!(trigger = %key, "acquired trigger vanished before firing");
                continue;
            };
            if trigger.state != TriggerState::Acquired {
                continue;
            }
            // A batch-mate may have just blocked this job: park the trigger
            // instead of firing it; completion bookkeeping releases it.
            if inner.blocked_jobs.contains(&trigger.job_key) {
                trigger.state = TriggerState::Blocked;
                continue;
            }
            let Some(job) = inner.jobs.get(&trigger.job_key).cloned() else {
                warn!(trigger = %key, "trigger references a missing job");
                trigger.state = TriggerState::Error;
                continue;
            };

            let scheduled_fire_time = trigger.next_fire_time().unwrap_or(now);
            trigger.state = TriggerState::Executing;
            trigger.triggered();
            let snapshot = trigger.clone();

            if !job.concurrent_execution_allowed {
                // Leave this trigger EXECUTING (unindexed) and park its
                // runnable siblings until the run completes.
                inner.blocked_jobs.insert(job.key.clone());
                let siblings = inner.trigger_keys_of_job(&job.key);
                for sibling in siblings {
                    if sibling == *key {
                        continue;
                    }
                    if let Some(s) = inner.triggers.get_mut(&sibling)
                        && s.state == TriggerState::Normal
                    {
                        let frozen = s.clone();
                        s.state = TriggerState::Blocked;
                        inner.index_remove(&frozen);
                    }
                }
            } else if snapshot.next_fire_time().is_some() {
                if let Some(t) = inner.triggers.get_mut(key) {
                    t.state = TriggerState::Normal;
                }
                inner.index_insert(&snapshot);
            } else if let Some(t) = inner.triggers.get_mut(key) {
                t.state = TriggerState::Complete;
            }

            bundles.push(FiredBundle {
                trigger: snapshot,
                job,
                fire_instance_id: Uuid::new_v4().to_string(),
                fire_time: now,
                scheduled_fire_time,
            });
        }

        bundles
    }

    /// Install a fully validated descriptor batch under one lock: jobs
    /// replace-if-exists (keeping their triggers), triggers reschedule on
    /// identity collision. Validation happens before this is called, so the
    /// installation itself cannot fail half-way.
    pub(crate) fn install(&self, jobs: Vec<JobDetail>, triggers: Vec<Trigger>) {
        let mut guard = self.locked();
        let inner = &mut *guard;
        for job in jobs {
            inner.jobs.insert(job.key.clone(), job);
        }
        for trigger in triggers {
            if let Some(old) = inner.triggers.get(&trigger.key).cloned() {
                inner.index_remove(&old);
            }
            inner.index_insert(&trigger);
            inner.triggers.insert(trigger.key.clone(), trigger);
        }
    }

    /// Completion bookkeeping for one finished execution: unblock the job's
    /// parked triggers and re-index or retire the fired trigger.
    pub fn triggered_job_complete(&self, trigger_key: &TriggerKey, job_key: &JobKey) {
        let mut inner = self.locked();

        if inner.blocked_jobs.remove(job_key) {
            let siblings = inner.trigger_keys_of_job(job_key);
            for sibling in siblings {
                if let Some(s) = inner.triggers.get_mut(&sibling)
                    && s.state == TriggerState::Blocked
                {
                    s.state = TriggerState::Normal;
                    let thawed = s.clone();
                    inner.index_insert(&thawed);
                }
            }
        }

        let Some(trigger) = inner.triggers.get(trigger_key).cloned() else {
            return;
        };
        match trigger.state {
            TriggerState::Executing => {
                if trigger.next_fire_time().is_some() {
                    if let Some(t) = inner.triggers.get_mut(trigger_key) {
                        t.state = TriggerState::Normal;
                    }
                    inner.index_insert(&trigger);
                } else {
                    debug!(trigger = %trigger_key, "trigger exhausted; removing");
                    inner.remove_trigger_cascade(trigger_key);
                }
            },
            TriggerState::Complete => {
                inner.remove_trigger_cascade(trigger_key);
            },
            _ => {},
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::{
        job::test_support::Noop,
        trigger::{RepeatCount, Schedule},
    };

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn job(name: &str) -> JobDetail {
        JobDetail::with_producer(JobKey::new(name), || Noop)
    }

    fn simple(name: &str, job: &str, start: DateTime<Utc>) -> Trigger {
        Trigger::new(
            TriggerKey::new(name),
            JobKey::new(job),
            Schedule::Simple {
                repeat_interval_ms: 60_000,
                repeat_count: RepeatCount::Indefinitely,
            },
        )
        .with_start_time(start)
    }

    #[test]
    fn duplicate_job_requires_replace() {
        let store = JobStore::default();
        store.store_job(job("a"), false).unwrap();
        assert!(matches!(
            store.store_job(job("a"), false),
            Err(Error::JobAlreadyExists { .. })
        ));
        store.store_job(job("a"), true).unwrap();
    }

    #[test]
    fn trigger_requires_existing_job() {
        let store = JobStore::default();
        let t = simple("t", "ghost", utc(2024, 1, 1, 0, 0, 0));
        assert!(matches!(
            store.store_trigger(t, false),
            Err(Error::JobNotFound { .. })
        ));
    }

    #[test]
    fn trigger_that_cannot_fire_is_rejected() {
        let store = JobStore::default();
        store.store_job(job("a"), false).unwrap();
        let t = simple("t", "a", utc(2024, 1, 2, 0, 0, 0))
            .with_end_time(utc(2024, 1, 1, 0, 0, 0));
        assert!(matches!(
            store.store_trigger(t, false),
            Err(Error::TriggerWillNeverFire { .. })
        ));
    }

    #[test]
    fn acquire_orders_by_time_priority_name() {
        let store = JobStore::default();
        store.store_job(job("a"), false).unwrap();
        let start = utc(2024, 1, 1, 0, 0, 0);
        let later = utc(2024, 1, 1, 0, 0, 30);

        store
            .store_trigger(simple("beta", "a", start).with_priority(5), false)
            .unwrap();
        store
            .store_trigger(simple("alpha", "a", start).with_priority(5), false)
            .unwrap();
        store
            .store_trigger(simple("urgent", "a", start).with_priority(9), false)
            .unwrap();
        store
            .store_trigger(simple("early-low", "a", later).with_priority(1), false)
            .unwrap();

        let result = store.acquire_next_triggers(
            start,
            start + Duration::seconds(60),
            10,
            Duration::seconds(60),
        );
        let names: Vec<&str> = result
            .acquired
            .iter()
            .map(|t| t.key.name.as_str())
            .collect();
        assert_eq!(names, vec!["urgent", "alpha", "beta", "early-low"]);
    }

    #[test]
    fn acquire_respects_batch_window() {
        let store = JobStore::default();
        store.store_job(job("a"), false).unwrap();
        let start = utc(2024, 1, 1, 0, 0, 0);
        store
            .store_trigger(simple("now", "a", start), false)
            .unwrap();
        store
            .store_trigger(simple("soon", "a", start + Duration::seconds(10)), false)
            .unwrap();

        // Zero window: only the first trigger is batched.
        let result =
            store.acquire_next_triggers(start, start + Duration::seconds(30), 10, Duration::zero());
        assert_eq!(result.acquired.len(), 1);
        assert_eq!(result.acquired[0].key.name, "now");
        assert_eq!(result.acquired[0].state(), TriggerState::Acquired);
    }

    #[test]
    fn release_returns_trigger_to_normal() {
        let store = JobStore::default();
        store.store_job(job("a"), false).unwrap();
        let start = utc(2024, 1, 1, 0, 0, 0);
        store.store_trigger(simple("t", "a", start), false).unwrap();

        let result =
            store.acquire_next_triggers(start, start + Duration::seconds(1), 1, Duration::zero());
        assert_eq!(result.acquired.len(), 1);
        let key = result.acquired[0].key.clone();

        store.release_acquired_trigger(&key);
        assert_eq!(
            store.trigger(&key).unwrap().state(),
            TriggerState::Normal
        );
        // Releasable again on the next scan.
        let again =
            store.acquire_next_triggers(start, start + Duration::seconds(1), 1, Duration::zero());
        assert_eq!(again.acquired.len(), 1);
    }

    #[test]
    fn fired_trigger_advances_and_reindexes() {
        let store = JobStore::default();
        store.store_job(job("a"), false).unwrap();
        let start = utc(2024, 1, 1, 0, 0, 0);
        store.store_trigger(simple("t", "a", start), false).unwrap();

        let acquired = store
            .acquire_next_triggers(start, start + Duration::seconds(1), 1, Duration::zero())
            .acquired;
        let keys: Vec<TriggerKey> = acquired.iter().map(|t| t.key.clone()).collect();
        let bundles = store.triggers_fired(&keys, start);
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].scheduled_fire_time, start);

        let stored = store.trigger(&keys[0]).unwrap();
        assert_eq!(stored.state(), TriggerState::Normal);
        assert_eq!(
            stored.next_fire_time(),
            Some(start + Duration::seconds(60))
        );
        assert_eq!(stored.previous_fire_time(), Some(start));
    }

    #[test]
    fn non_concurrent_job_blocks_siblings() {
        let store = JobStore::default();
        store
            .store_job(job("serial").concurrency_allowed(false), false)
            .unwrap();
        let start = utc(2024, 1, 1, 0, 0, 0);
        store
            .store_trigger(simple("one", "serial", start), false)
            .unwrap();
        store
            .store_trigger(simple("two", "serial", start), false)
            .unwrap();

        let acquired = store
            .acquire_next_triggers(start, start + Duration::seconds(1), 10, Duration::seconds(1))
            .acquired;
        assert_eq!(acquired.len(), 2);
        let keys: Vec<TriggerKey> = acquired.iter().map(|t| t.key.clone()).collect();

        // Only the first fires; the second parks as BLOCKED.
        let bundles = store.triggers_fired(&keys, start);
        assert_eq!(bundles.len(), 1);
        let fired_key = bundles[0].trigger.key.clone();
        let parked_key = keys.iter().find(|k| **k != fired_key).unwrap().clone();
        assert_eq!(
            store.trigger(&parked_key).unwrap().state(),
            TriggerState::Blocked
        );
        assert_eq!(
            store.trigger(&fired_key).unwrap().state(),
            TriggerState::Executing
        );

        // Nothing further can be acquired for the blocked job.
        let empty = store.acquire_next_triggers(
            start,
            start + Duration::seconds(120),
            10,
            Duration::seconds(120),
        );
        assert!(empty.acquired.is_empty());

        // Completion unblocks and re-indexes both triggers.
        store.triggered_job_complete(&fired_key, &JobKey::new("serial"));
        assert_eq!(
            store.trigger(&parked_key).unwrap().state(),
            TriggerState::Normal
        );
        assert_eq!(
            store.trigger(&fired_key).unwrap().state(),
            TriggerState::Normal
        );
        let after = store.acquire_next_triggers(
            start,
            start + Duration::seconds(120),
            10,
            Duration::seconds(120),
        );
        assert!(!after.acquired.is_empty());
    }

    #[test]
    fn exhausted_trigger_is_removed_and_non_durable_job_cascades() {
        let store = JobStore::default();
        store.store_job(job("once"), false).unwrap();
        let start = utc(2024, 1, 1, 0, 0, 0);
        let t = Trigger::new(
            TriggerKey::new("single"),
            JobKey::new("once"),
            Schedule::Simple {
                repeat_interval_ms: 0,
                repeat_count: RepeatCount::Times(0),
            },
        )
        .with_start_time(start);
        store.store_trigger(t, false).unwrap();

        let acquired = store
            .acquire_next_triggers(start, start + Duration::seconds(1), 1, Duration::zero())
            .acquired;
        let keys: Vec<TriggerKey> = acquired.iter().map(|t| t.key.clone()).collect();
        let bundles = store.triggers_fired(&keys, start);
        assert_eq!(bundles.len(), 1);
        assert!(bundles[0].trigger.next_fire_time().is_none());

        store.triggered_job_complete(&keys[0], &JobKey::new("once"));
        assert!(store.trigger(&keys[0]).is_none());
        // Non-durable job went with its last trigger.
        assert!(!store.contains_job(&JobKey::new("once")));
    }

    #[test]
    fn durable_job_survives_last_trigger_removal() {
        let store = JobStore::default();
        store.store_job(job("keep").durable(true), false).unwrap();
        let start = utc(2024, 1, 1, 0, 0, 0);
        store.store_trigger(simple("t", "keep", start), false).unwrap();

        assert!(store.remove_trigger(&TriggerKey::new("t")));
        assert!(store.contains_job(&JobKey::new("keep")));

        // Non-durable counterpart disappears.
        store.store_job(job("drop"), false).unwrap();
        store.store_trigger(simple("t2", "drop", start), false).unwrap();
        assert!(store.remove_trigger(&TriggerKey::new("t2")));
        assert!(!store.contains_job(&JobKey::new("drop")));
    }

    #[test]
    fn remove_job_takes_triggers_with_it() {
        let store = JobStore::default();
        store.store_job(job("a"), false).unwrap();
        let start = utc(2024, 1, 1, 0, 0, 0);
        store.store_trigger(simple("t1", "a", start), false).unwrap();
        store.store_trigger(simple("t2", "a", start), false).unwrap();

        assert!(store.remove_job(&JobKey::new("a")));
        assert_eq!(store.trigger_count(), 0);
        assert_eq!(store.next_fire_time(), None);
        assert!(!store.remove_job(&JobKey::new("a")));
    }

    #[test]
    fn misfired_trigger_policy_applied_during_acquire() {
        let store = JobStore::default();
        store.store_job(job("a"), false).unwrap();
        let start = utc(2024, 1, 1, 0, 0, 0);
        store
            .store_trigger(
                simple("late", "a", start).with_priority(5),
                false,
            )
            .unwrap();

        // One hour past the fire time, far beyond the 5s threshold.
        let now = start + Duration::hours(1);
        let result =
            store.acquire_next_triggers(now, now + Duration::seconds(90), 10, Duration::zero());
        assert_eq!(result.misfired.len(), 1);
        // Smart policy for an indefinite simple trigger skips the missed
        // occurrences and re-aims at the next aligned instant; the trigger
        // is acquired at its new time in the same pass.
        assert_eq!(result.acquired.len(), 1);
        assert_eq!(
            result.acquired[0].next_fire_time(),
            Some(now + Duration::seconds(60))
        );
    }

    #[test]
    fn paused_trigger_is_not_acquired() {
        let store = JobStore::default();
        store.store_job(job("a"), false).unwrap();
        let start = utc(2024, 1, 1, 0, 0, 0);
        store.store_trigger(simple("t", "a", start), false).unwrap();

        store.pause_trigger(&TriggerKey::new("t")).unwrap();
        let result =
            store.acquire_next_triggers(start, start + Duration::seconds(30), 10, Duration::zero());
        assert!(result.acquired.is_empty());
        assert_eq!(
            store.trigger(&TriggerKey::new("t")).unwrap().state(),
            TriggerState::Paused
        );

        store.resume_trigger(&TriggerKey::new("t")).unwrap();
        let result =
            store.acquire_next_triggers(start, start + Duration::seconds(30), 10, Duration::zero());
        assert_eq!(result.acquired.len(), 1);
    }

    #[test]
    fn jobs_and_triggers_is_sorted() {
        let store = JobStore::default();
        store.store_job(job("zebra").durable(true), false).unwrap();
        store.store_job(job("ant").durable(true), false).unwrap();
        let listing = store.jobs_and_triggers();
        let names: Vec<&str> = listing.keys().map(|k| k.name.as_str()).collect();
        assert_eq!(names, vec!["ant", "zebra"]);
    }
}
