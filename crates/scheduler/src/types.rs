//! Identity, data-map, and state types shared across the scheduler.

use std::{collections::BTreeMap, fmt};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// Group assigned to jobs and triggers created without an explicit one.
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// Context key holding the executing job's name.
pub const KEY_JOB_NAME: &str = "KEY_JOB_NAME";

/// Context key holding the firing trigger's name.
pub const KEY_TRIGGER_NAME: &str = "KEY_TRIGGER_NAME";

/// Context key holding the firing trigger's cron expression, when it has one.
pub const KEY_TRIGGER_CRON_EXPRESSION: &str = "KEY_TRIGGER_CRON_EXPRESSION";

/// Identity of a job: name plus group, unique within the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub name: String,
    pub group: String,
}

impl JobKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: DEFAULT_GROUP.to_string(),
        }
    }

    pub fn with_group(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Identity of a trigger: name plus group, unique within the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TriggerKey {
    pub name: String,
    pub group: String,
}

impl TriggerKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: DEFAULT_GROUP.to_string(),
        }
    }

    pub fn with_group(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// A typed payload value carried in a job or trigger data map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl DataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for DataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for DataValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for DataValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for DataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for DataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Ordered key/value payload attached to jobs and triggers. Handed to user
/// code only as snapshots; mutating a snapshot never touches the stored
/// original.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataMap(BTreeMap<String, DataValue>);

impl DataMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<DataValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DataValue)> {
        self.0.iter()
    }

    /// New map with `overlay`'s entries written over this map's.
    pub fn merged_with(&self, overlay: &DataMap) -> DataMap {
        let mut merged = self.clone();
        for (key, value) in overlay.iter() {
            merged.0.insert(key.clone(), value.clone());
        }
        merged
    }
}

impl FromIterator<(String, DataValue)> for DataMap {
    fn from_iter<I: IntoIterator<Item = (String, DataValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Lifecycle state of a stored trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerState {
    /// Waiting for its next fire time.
    Normal,
    /// Suspended; skipped by acquisition until resumed.
    Paused,
    /// Claimed by the scheduler loop for imminent firing.
    Acquired,
    /// Its job is currently running on a worker.
    Executing,
    /// Parked because its non-concurrent job is already executing.
    Blocked,
    /// Exhausted; removed at completion bookkeeping.
    Complete,
    /// Firing failed in a way that stops further scheduling.
    Error,
}

/// How a single execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompletionCode {
    /// The job returned normally.
    Success,
    /// The job observed the interrupt flag and aborted cooperatively.
    Interrupted,
    /// The job read a mandatory context key that was absent.
    MissingParameter,
    /// The job failed or panicked.
    Failed,
    /// Execution was suppressed by the global lock.
    Skipped,
}

/// Lifecycle state of the scheduler itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SchedulerState {
    Initialized,
    Started,
    Standby,
    ShuttingDown,
    Shutdown,
    Error,
}

/// Point-in-time snapshot of the scheduler.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub job_count: usize,
    pub trigger_count: usize,
    pub executing_count: usize,
    pub locked: bool,
    pub next_fire_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_display_group_dot_name() {
        assert_eq!(JobKey::new("sweep").to_string(), "DEFAULT.sweep");
        assert_eq!(
            TriggerKey::with_group("nightly", "reports").to_string(),
            "reports.nightly"
        );
    }

    #[test]
    fn data_map_merge_overlay_wins() {
        let mut base = DataMap::new();
        base.insert("color", "red");
        base.insert("retries", 3i64);

        let mut overlay = DataMap::new();
        overlay.insert("color", "blue");

        let merged = base.merged_with(&overlay);
        assert_eq!(merged.get("color").and_then(DataValue::as_str), Some("blue"));
        assert_eq!(merged.get("retries").and_then(DataValue::as_i64), Some(3));
        // The original is untouched.
        assert_eq!(base.get("color").and_then(DataValue::as_str), Some("red"));
    }

    #[test]
    fn data_value_untagged_serde() {
        let mut map = DataMap::new();
        map.insert("enabled", true);
        map.insert("threshold", 0.5);
        map.insert("count", 42i64);
        map.insert("label", "hot");

        let json = serde_json::to_string(&map).unwrap();
        let back: DataMap = serde_json::from_str(&json).unwrap();
        assert_eq!(map, back);
        assert_eq!(back.get("count"), Some(&DataValue::Int(42)));
        assert_eq!(back.get("enabled"), Some(&DataValue::Bool(true)));
    }

    #[test]
    fn data_value_display_for_matching() {
        assert_eq!(DataValue::Int(7).to_string(), "7");
        assert_eq!(DataValue::from("Ready").to_string(), "Ready");
        assert_eq!(DataValue::Bool(true).to_string(), "true");
    }
}
