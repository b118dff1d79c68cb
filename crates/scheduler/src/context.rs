//! Per-fire execution context handed to the running job.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use chrono::{DateTime, Utc};

use crate::{
    job::{JobDetail, JobError},
    trigger::Trigger,
    types::{
        DataMap, DataValue, JobKey, KEY_JOB_NAME, KEY_TRIGGER_CRON_EXPRESSION, KEY_TRIGGER_NAME,
        TriggerKey,
    },
};

/// Snapshot context for one execution: the job's data map overlaid by the
/// trigger's, plus reserved metadata entries. Built at fire, dropped when
/// the run finishes; user mutations of copies never reach the store.
#[derive(Debug, Clone)]
pub struct JobContext {
    merged: DataMap,
    job_key: JobKey,
    trigger_key: TriggerKey,
    fire_instance_id: String,
    fire_time: DateTime<Utc>,
    scheduled_fire_time: DateTime<Utc>,
    interrupted: Arc<AtomicBool>,
}

impl JobContext {
    pub(crate) fn new(
        job: &JobDetail,
        trigger: &Trigger,
        fire_instance_id: String,
        fire_time: DateTime<Utc>,
        scheduled_fire_time: DateTime<Utc>,
    ) -> Self {
        let mut merged = job.data.merged_with(&trigger.data);
        merged.insert(KEY_JOB_NAME, job.key.name.as_str());
        merged.insert(KEY_TRIGGER_NAME, trigger.key.name.as_str());
        if let Some(expression) = trigger.cron_expression() {
            merged.insert(KEY_TRIGGER_CRON_EXPRESSION, expression);
        }

        Self {
            merged,
            job_key: job.key.clone(),
            trigger_key: trigger.key.clone(),
            fire_instance_id,
            fire_time,
            scheduled_fire_time,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.merged.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.merged.get(key).and_then(DataValue::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.merged.get(key).and_then(DataValue::as_i64)
    }

    /// A mandatory entry; absent keys abort the fire with
    /// [`JobError::MissingParameter`].
    pub fn required(&self, key: &str) -> Result<&DataValue, JobError> {
        self.merged.get(key).ok_or_else(|| JobError::MissingParameter {
            key: key.to_string(),
        })
    }

    /// The full merged snapshot.
    pub fn data(&self) -> &DataMap {
        &self.merged
    }

    pub fn job_key(&self) -> &JobKey {
        &self.job_key
    }

    pub fn trigger_key(&self) -> &TriggerKey {
        &self.trigger_key
    }

    pub fn job_name(&self) -> &str {
        &self.job_key.name
    }

    pub fn trigger_name(&self) -> &str {
        &self.trigger_key.name
    }

    /// The cron expression of the firing trigger, when it has one.
    pub fn cron_expression(&self) -> Option<&str> {
        self.get_str(KEY_TRIGGER_CRON_EXPRESSION)
    }

    /// Unique id of this fire.
    pub fn fire_instance_id(&self) -> &str {
        &self.fire_instance_id
    }

    /// When the fire actually happened.
    pub fn fire_time(&self) -> DateTime<Utc> {
        self.fire_time
    }

    /// When the trigger was scheduled to fire.
    pub fn scheduled_fire_time(&self) -> DateTime<Utc> {
        self.scheduled_fire_time
    }

    /// Whether an interrupt was requested. Long-running jobs poll this and
    /// bail out with [`JobError::Interrupted`].
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// `Err(JobError::Interrupted)` once an interrupt was requested, for use
    /// with `?` at loop heads in job bodies.
    pub fn check_interrupted(&self) -> Result<(), JobError> {
        if self.is_interrupted() {
            Err(JobError::Interrupted)
        } else {
            Ok(())
        }
    }

    pub(crate) fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }
}
