use std::path::PathBuf;

use thiserror::Error;

use crate::types::{JobKey, TriggerKey};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    CronParse(#[from] gnomon_cronexpr::ParseError),

    #[error("job already exists: {key}")]
    JobAlreadyExists { key: JobKey },

    #[error("trigger already exists: {key}")]
    TriggerAlreadyExists { key: TriggerKey },

    #[error("job not found: {key}")]
    JobNotFound { key: JobKey },

    #[error("trigger not found: {key}")]
    TriggerNotFound { key: TriggerKey },

    #[error("trigger will never fire: {key}")]
    TriggerWillNeverFire { key: TriggerKey },

    #[error("no job type registered under '{name}'")]
    UnknownJobType { name: String },

    #[error("unknown time zone: {name}")]
    UnknownTimeZone { name: String },

    #[error("invalid descriptor: {message}")]
    InvalidDescriptor { message: String },

    #[error("descriptor file not found: {path}")]
    DescriptorNotFound { path: PathBuf },

    #[error("unsupported descriptor format: .{extension}")]
    UnsupportedDescriptorFormat { extension: String },

    #[error("scheduler is shut down")]
    SchedulerShutdown,

    #[error("worker pool rejected a submission with no capacity")]
    WorkerPoolExhausted,
}

impl Error {
    #[must_use]
    pub fn job_not_found(key: JobKey) -> Self {
        Self::JobNotFound { key }
    }

    #[must_use]
    pub fn trigger_not_found(key: TriggerKey) -> Self {
        Self::TriggerNotFound { key }
    }

    #[must_use]
    pub fn unknown_job_type(name: impl Into<String>) -> Self {
        Self::UnknownJobType { name: name.into() }
    }

    #[must_use]
    pub fn unknown_time_zone(name: impl Into<String>) -> Self {
        Self::UnknownTimeZone { name: name.into() }
    }

    #[must_use]
    pub fn invalid_descriptor(message: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
