//! Declarative schedule documents: parse, validate the whole document, then
//! install in one pass.
//!
//! The document shape mirrors the programmatic model: a `schedule` section
//! with `jobs` and `triggers` lists. JSON, YAML, and TOML are accepted,
//! chosen by file extension. Nothing touches the store until every job and
//! trigger in the document has validated, so a failed load leaves the store
//! exactly as it was.

use std::path::Path;

use {
    chrono::{DateTime, Duration, NaiveDateTime, Utc},
    chrono_tz::Tz,
    serde::Deserialize,
    tracing::{info, warn},
};

use crate::{
    error::{Error, Result},
    job::JobDetail,
    scheduler::Scheduler,
    trigger::{IntervalUnit, MisfireInstruction, RepeatCount, Schedule, Trigger},
    types::{DataMap, DataValue, JobKey, TriggerKey},
};

/// Conventional descriptor file name, looked for in the working directory.
pub const DEFAULT_DESCRIPTOR_FILE: &str = "jobs.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorFormat {
    Json,
    Yaml,
    Toml,
}

impl DescriptorFormat {
    pub fn from_extension(extension: &str) -> Result<Self> {
        match extension {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            other => Err(Error::UnsupportedDescriptorFormat {
                extension: other.to_string(),
            }),
        }
    }
}

/// Counts reported after a successful load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub jobs: usize,
    pub triggers: usize,
}

// ── Document model ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ScheduleDocument {
    schedule: ScheduleSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ScheduleSection {
    #[serde(default)]
    jobs: Vec<JobDecl>,
    #[serde(default)]
    triggers: Vec<TriggerDecl>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct JobDecl {
    name: String,
    group: Option<String>,
    description: Option<String>,
    job_class: String,
    #[serde(default = "default_true")]
    concurrency_allowed: bool,
    #[serde(default)]
    durability: bool,
    #[serde(default)]
    requests_recovery: bool,
    #[serde(default)]
    data_map: Vec<DataEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct DataEntry {
    key: String,
    value: DataValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum TriggerVariant {
    Simple,
    Cron,
    CalendarInterval,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct TriggerDecl {
    variant: TriggerVariant,
    name: String,
    group: Option<String>,
    description: Option<String>,
    job_name: String,
    job_group: Option<String>,
    start_time: Option<String>,
    start_time_seconds_in_future: Option<u64>,
    end_time: Option<String>,
    priority: Option<i32>,
    misfire_instruction: Option<MisfireInstruction>,
    calendar_name: Option<String>,
    #[serde(default)]
    data_map: Vec<DataEntry>,
    // simple
    repeat_count: Option<i64>,
    repeat_interval: Option<u64>,
    // cron
    cron_expression: Option<String>,
    time_zone: Option<String>,
    // calendar-interval
    repeat_interval_unit: Option<IntervalUnit>,
}

fn default_true() -> bool {
    true
}

fn data_map(entries: Vec<DataEntry>) -> DataMap {
    entries.into_iter().map(|e| (e.key, e.value)).collect()
}

// ── Loading ─────────────────────────────────────────────────────────────

/// Load a descriptor file. A missing file is tolerated with a warning
/// unless `fail_on_missing` is set; that mirrors optional convention-based
/// discovery of [`DEFAULT_DESCRIPTOR_FILE`].
pub(crate) fn load_file(
    path: &Path,
    fail_on_missing: bool,
    scheduler: &Scheduler,
) -> Result<LoadSummary> {
    if !path.exists() {
        if fail_on_missing {
            return Err(Error::DescriptorNotFound {
                path: path.to_path_buf(),
            });
        }
        warn!(path = %path.display(), "descriptor file not found; continuing without it");
        return Ok(LoadSummary::default());
    }
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
    let format = DescriptorFormat::from_extension(extension)?;
    let text = std::fs::read_to_string(path)?;
    info!(path = %path.display(), "loading schedule descriptor");
    load_str(&text, format, scheduler)
}

pub(crate) fn load_str(
    text: &str,
    format: DescriptorFormat,
    scheduler: &Scheduler,
) -> Result<LoadSummary> {
    let doc: ScheduleDocument = match format {
        DescriptorFormat::Json => serde_json::from_str(text)?,
        DescriptorFormat::Yaml => serde_yaml::from_str(text)?,
        DescriptorFormat::Toml => toml::from_str(text)?,
    };

    let loaded = build(doc, scheduler)?;
    let summary = LoadSummary {
        jobs: loaded.jobs.len(),
        triggers: loaded.triggers.len(),
    };
    info!(
        jobs = summary.jobs,
        triggers = summary.triggers,
        "installing schedule descriptor"
    );
    scheduler.store().install(loaded.jobs, loaded.triggers);
    Ok(summary)
}

struct LoadedSchedule {
    jobs: Vec<JobDetail>,
    triggers: Vec<Trigger>,
}

/// Validate the whole document into ready-to-install jobs and triggers.
fn build(doc: ScheduleDocument, scheduler: &Scheduler) -> Result<LoadedSchedule> {
    let now = Utc::now();

    let mut jobs = Vec::with_capacity(doc.schedule.jobs.len());
    for decl in doc.schedule.jobs {
        let factory = scheduler
            .registry()
            .factory(&decl.job_class)
            .ok_or_else(|| Error::unknown_job_type(&decl.job_class))?;
        let key = match decl.group {
            Some(group) => JobKey::with_group(decl.name, group),
            None => JobKey::new(decl.name),
        };
        let mut detail = JobDetail::new(key, factory)
            .durable(decl.durability)
            .concurrency_allowed(decl.concurrency_allowed)
            .requests_recovery(decl.requests_recovery)
            .with_data(data_map(decl.data_map));
        detail.description = decl.description;
        jobs.push(detail);
    }

    let mut triggers = Vec::with_capacity(doc.schedule.triggers.len());
    for decl in doc.schedule.triggers {
        triggers.push(build_trigger(decl, now)?);
    }

    // Every trigger must target a job from this document or one already in
    // the store.
    for trigger in &triggers {
        let declared_here = jobs.iter().any(|j| j.key == trigger.job_key);
        if !declared_here && !scheduler.store().contains_job(&trigger.job_key) {
            return Err(Error::invalid_descriptor(format!(
                "trigger '{}' references unknown job '{}'",
                trigger.key, trigger.job_key
            )));
        }
    }

    // Durability rules, matching the replace/merge semantics of install.
    for job in &jobs {
        if job.durable {
            continue;
        }
        let has_doc_trigger = triggers.iter().any(|t| t.job_key == job.key);
        if has_doc_trigger {
            continue;
        }
        match scheduler.store().job(&job.key) {
            None => {
                return Err(Error::invalid_descriptor(format!(
                    "a new job defined without any triggers must be durable: {}",
                    job.key
                )));
            },
            Some(existing)
                if existing.durable && scheduler.store().triggers_of_job(&job.key).is_empty() =>
            {
                return Err(Error::invalid_descriptor(format!(
                    "cannot demote a durable job without triggers to non-durable: {}",
                    job.key
                )));
            },
            Some(_) => {},
        }
    }

    Ok(LoadedSchedule { jobs, triggers })
}

fn build_trigger(decl: TriggerDecl, now: DateTime<Utc>) -> Result<Trigger> {
    let key = match decl.group {
        Some(ref group) => TriggerKey::with_group(decl.name.clone(), group.clone()),
        None => TriggerKey::new(decl.name.clone()),
    };
    let job_key = match decl.job_group {
        Some(ref group) => JobKey::with_group(decl.job_name.clone(), group.clone()),
        None => JobKey::new(decl.job_name.clone()),
    };

    let schedule = match decl.variant {
        TriggerVariant::Simple => {
            reject_foreign_fields(
                &key,
                "simple",
                &[
                    ("cron-expression", decl.cron_expression.is_some()),
                    ("time-zone", decl.time_zone.is_some()),
                    ("repeat-interval-unit", decl.repeat_interval_unit.is_some()),
                ],
            )?;
            let repeat_count = match decl.repeat_count {
                None | Some(-1) => RepeatCount::Indefinitely,
                Some(n) => {
                    let n = u32::try_from(n).map_err(|_| {
                        Error::invalid_descriptor(format!(
                            "trigger '{key}': repeat-count {n} is invalid"
                        ))
                    })?;
                    RepeatCount::Times(n)
                },
            };
            Schedule::Simple {
                repeat_interval_ms: decl.repeat_interval.unwrap_or(0),
                repeat_count,
            }
        },
        TriggerVariant::Cron => {
            reject_foreign_fields(
                &key,
                "cron",
                &[
                    ("repeat-count", decl.repeat_count.is_some()),
                    ("repeat-interval", decl.repeat_interval.is_some()),
                    ("repeat-interval-unit", decl.repeat_interval_unit.is_some()),
                ],
            )?;
            let expression = decl.cron_expression.as_deref().ok_or_else(|| {
                Error::invalid_descriptor(format!(
                    "cron trigger '{key}' is missing cron-expression"
                ))
            })?;
            let time_zone = match decl.time_zone.as_deref() {
                Some(name) => name
                    .parse::<Tz>()
                    .map_err(|_| Error::unknown_time_zone(name))?,
                None => chrono_tz::UTC,
            };
            Schedule::Cron {
                expression: expression.parse()?,
                time_zone,
            }
        },
        TriggerVariant::CalendarInterval => {
            reject_foreign_fields(
                &key,
                "calendar-interval",
                &[
                    ("cron-expression", decl.cron_expression.is_some()),
                    ("time-zone", decl.time_zone.is_some()),
                    ("repeat-count", decl.repeat_count.is_some()),
                ],
            )?;
            let interval = decl.repeat_interval.ok_or_else(|| {
                Error::invalid_descriptor(format!(
                    "calendar-interval trigger '{key}' is missing repeat-interval"
                ))
            })?;
            let unit = decl.repeat_interval_unit.ok_or_else(|| {
                Error::invalid_descriptor(format!(
                    "calendar-interval trigger '{key}' is missing repeat-interval-unit"
                ))
            })?;
            let interval = u32::try_from(interval).map_err(|_| {
                Error::invalid_descriptor(format!(
                    "trigger '{key}': repeat-interval {interval} is out of range"
                ))
            })?;
            Schedule::CalendarInterval { interval, unit }
        },
    };

    let start_time = match (decl.start_time_seconds_in_future, decl.start_time.as_deref()) {
        (Some(seconds), _) => now + Duration::seconds(seconds as i64),
        (None, Some(text)) => parse_timestamp(&key, text)?,
        (None, None) => now,
    };

    let mut trigger = Trigger::new(key.clone(), job_key, schedule)
        .with_start_time(start_time)
        .with_data(data_map(decl.data_map));
    trigger.description = decl.description;
    if let Some(priority) = decl.priority {
        trigger = trigger.with_priority(priority);
    }
    if let Some(instruction) = decl.misfire_instruction {
        trigger = trigger.with_misfire_instruction(instruction);
    }
    if let Some(calendar) = decl.calendar_name {
        trigger = trigger.with_calendar_name(calendar);
    }
    if let Some(end) = decl.end_time.as_deref() {
        trigger = trigger.with_end_time(parse_timestamp(&key, end)?);
    }

    trigger.compute_first_fire_time();
    if trigger.next_fire_time().is_none() {
        return Err(Error::invalid_descriptor(format!(
            "trigger '{key}' would never fire"
        )));
    }
    Ok(trigger)
}

fn reject_foreign_fields(
    key: &TriggerKey,
    variant: &str,
    fields: &[(&str, bool)],
) -> Result<()> {
    for (field, present) in fields {
        if *present {
            return Err(Error::invalid_descriptor(format!(
                "{variant} trigger '{key}' does not take {field}"
            )));
        }
    }
    Ok(())
}

/// Accept RFC 3339 timestamps, or a bare `YYYY-MM-DDTHH:MM:SS` read as UTC.
fn parse_timestamp(key: &TriggerKey, text: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = text.parse::<DateTime<Utc>>() {
        return Ok(dt);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Ok(naive.and_utc());
    }
    Err(Error::invalid_descriptor(format!(
        "trigger '{key}': invalid timestamp '{text}'"
    )))
}
