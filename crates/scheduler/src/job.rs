//! The job contract: user-implemented work units, per-fire instantiation,
//! and the type registry used for declarative scheduling.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock},
};

use {async_trait::async_trait, thiserror::Error, tracing::warn};

use crate::{
    context::JobContext,
    types::{DataMap, JobKey},
};

/// Outcomes a job run signals besides plain success. `Interrupted` and
/// `MissingParameter` are cooperative control flow, not failures; the runner
/// maps them to their own completion codes.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job interrupted")]
    Interrupted,

    #[error("required parameter missing: {key}")]
    MissingParameter { key: String },

    #[error("{message}")]
    Failed { message: String },
}

impl JobError {
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// A unit of user logic. The scheduler produces a fresh instance per fire
/// through the job's factory; instances never outlive one execution.
#[async_trait]
pub trait Job: Send {
    /// The body of the job. Long-running work should poll
    /// [`JobContext::is_interrupted`] and return [`JobError::Interrupted`]
    /// when asked to stop.
    async fn run(&mut self, ctx: &JobContext) -> Result<(), JobError>;

    /// Runs after every execution, whatever the outcome of [`run`](Job::run).
    fn cleanup(&mut self, _ctx: &JobContext) {}
}

/// Produces a fresh [`Job`] instance for each fire.
pub type JobFactory = Arc<dyn Fn() -> Box<dyn Job> + Send + Sync>;

/// Installed description of a job: identity, payload, and behavior flags.
#[derive(Clone)]
pub struct JobDetail {
    pub key: JobKey,
    pub description: Option<String>,
    pub data: DataMap,
    /// Keep the job in the store even when it has no triggers.
    pub durable: bool,
    /// When false, at most one execution of this job runs at a time.
    pub concurrent_execution_allowed: bool,
    /// Informational only; there is no persistence to recover from.
    pub requests_recovery: bool,
    pub(crate) factory: JobFactory,
}

impl JobDetail {
    pub fn new(key: JobKey, factory: JobFactory) -> Self {
        Self {
            key,
            description: None,
            data: DataMap::new(),
            durable: false,
            concurrent_execution_allowed: true,
            requests_recovery: false,
            factory,
        }
    }

    /// Wrap a plain constructor closure as the job factory.
    pub fn with_producer<J, F>(key: JobKey, producer: F) -> Self
    where
        J: Job + 'static,
        F: Fn() -> J + Send + Sync + 'static,
    {
        Self::new(key, Arc::new(move || Box::new(producer()) as Box<dyn Job>))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_data(mut self, data: DataMap) -> Self {
        self.data = data;
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn concurrency_allowed(mut self, allowed: bool) -> Self {
        self.concurrent_execution_allowed = allowed;
        self
    }

    pub fn requests_recovery(mut self, requests: bool) -> Self {
        self.requests_recovery = requests;
        self
    }

    pub(crate) fn instantiate(&self) -> Box<dyn Job> {
        (self.factory)()
    }
}

impl fmt::Debug for JobDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDetail")
            .field("key", &self.key)
            .field("description", &self.description)
            .field("data", &self.data)
            .field("durable", &self.durable)
            .field(
                "concurrent_execution_allowed",
                &self.concurrent_execution_allowed,
            )
            .field("requests_recovery", &self.requests_recovery)
            .finish_non_exhaustive()
    }
}

/// A trigger declared alongside a registered job type; installed whenever a
/// job of that type is added by name.
#[derive(Debug, Clone)]
pub enum DeclaredSchedule {
    Cron { expression: String },
    Simple {
        repeat_interval_ms: u64,
        /// `None` repeats indefinitely.
        repeat_count: Option<u32>,
    },
}

#[derive(Debug, Clone)]
pub struct DeclaredTrigger {
    pub schedule: DeclaredSchedule,
    pub data: DataMap,
}

#[derive(Clone)]
struct JobTypeEntry {
    factory: JobFactory,
    declared: Vec<DeclaredTrigger>,
}

/// Maps descriptor `job-class` names (and `add_job_by_type` type names) to
/// factories. Fills the role the original's classpath lookup played.
#[derive(Default)]
pub struct JobTypeRegistry {
    entries: RwLock<HashMap<String, JobTypeEntry>>,
}

impl JobTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, factory: JobFactory) {
        self.register_with_triggers(name, factory, Vec::new());
    }

    /// Register a factory under `name` as a plain constructor closure.
    pub fn register_producer<J, F>(&self, name: impl Into<String>, producer: F)
    where
        J: Job + 'static,
        F: Fn() -> J + Send + Sync + 'static,
    {
        self.register(name, Arc::new(move || Box::new(producer()) as Box<dyn Job>));
    }

    pub fn register_with_triggers(
        &self,
        name: impl Into<String>,
        factory: JobFactory,
        declared: Vec<DeclaredTrigger>,
    ) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(name.into(), JobTypeEntry { factory, declared });
    }

    pub fn contains(&self, name: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(name)
    }

    pub(crate) fn factory(&self, name: &str) -> Option<JobFactory> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(name).map(|e| Arc::clone(&e.factory))
    }

    pub(crate) fn declared_triggers(&self, name: &str) -> Vec<DeclaredTrigger> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(name)
            .map(|e| e.declared.clone())
            .unwrap_or_default()
    }
}

impl fmt::Debug for JobTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<&String> = entries.keys().collect();
        names.sort();
        f.debug_struct("JobTypeRegistry")
            .field("types", &names)
            .finish()
    }
}

/// Parse `"KEY:VALUE"` declarative data entries, splitting on the first
/// colon. Entries without a colon are dropped with a warning.
pub fn parse_data_entries<S: AsRef<str>>(entries: &[S]) -> DataMap {
    let mut map = DataMap::new();
    for entry in entries {
        let entry = entry.as_ref();
        match entry.split_once(':') {
            Some((key, value)) => map.insert(key, value),
            None => warn!(entry, "ignoring data entry without a ':' separator"),
        }
    }
    map
}


#[cfg(test)]
mod tests {
    use super::{test_support::Noop, *};

    #[test]
    fn registry_resolves_registered_factory() {
        let registry = JobTypeRegistry::new();
        registry.register_producer("noop", || Noop);
        assert!(registry.contains("noop"));
        assert!(registry.factory("noop").is_some());
        assert!(registry.factory("other").is_none());
    }

    #[test]
    fn registry_keeps_declared_triggers() {
        let registry = JobTypeRegistry::new();
        registry.register_with_triggers(
            "nightly",
            Arc::new(|| Box::new(Noop) as Box<dyn Job>),
            vec![DeclaredTrigger {
                schedule: DeclaredSchedule::Cron {
                    expression: "0 0 2 * * ?".into(),
                },
                data: parse_data_entries(&["REGION:eu-west", "DRY_RUN:true"]),
            }],
        );
        let declared = registry.declared_triggers("nightly");
        assert_eq!(declared.len(), 1);
        assert_eq!(
            declared[0].data.get("REGION").map(ToString::to_string),
            Some("eu-west".into())
        );
    }

    #[test]
    fn data_entries_split_on_first_colon() {
        let map = parse_data_entries(&["URL:http://example.com:8080", "broken"]);
        assert_eq!(map.len(), 1);
        assert_eq!(
            map.get("URL").map(ToString::to_string),
            Some("http://example.com:8080".into())
        );
    }

    #[test]
    fn job_detail_builder_defaults() {
        let detail = JobDetail::with_producer(JobKey::new("j"), || Noop);
        assert!(detail.concurrent_execution_allowed);
        assert!(!detail.durable);
        assert!(!detail.requests_recovery);
        let debug = format!("{detail:?}");
        assert!(debug.contains("JobDetail"));
    }
}
