//! In-process, in-memory job scheduler.
//!
//! Jobs are named units of user code; triggers (simple, cron, or
//! calendar-interval) decide when they fire. A single loop task selects and
//! acquires due triggers and dispatches them onto a bounded worker pool;
//! per-fire context carries the merged data map and a cooperative interrupt
//! flag. Schedules can also be loaded from a declarative document.
//!
//! ```no_run
//! use gnomon_scheduler::{
//!     Job, JobContext, JobDetail, JobError, JobKey, RepeatCount, Scheduler,
//! };
//!
//! struct Heartbeat;
//!
//! #[async_trait::async_trait]
//! impl Job for Heartbeat {
//!     async fn run(&mut self, ctx: &JobContext) -> Result<(), JobError> {
//!         ctx.check_interrupted()?;
//!         tracing::info!(job = ctx.job_name(), "beat");
//!         Ok(())
//!     }
//! }
//!
//! # async fn demo() -> gnomon_scheduler::Result<()> {
//! let scheduler = Scheduler::with_defaults();
//! scheduler.add_job(
//!     JobDetail::with_producer(JobKey::new("heartbeat"), || Heartbeat).durable(true),
//!     false,
//! )?;
//! scheduler.add_simple_trigger("tick", "heartbeat", RepeatCount::Indefinitely, 30_000)?;
//! scheduler.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod descriptor;
pub mod error;
pub mod job;
pub mod listener;
pub mod pool;
mod runner;
pub mod scheduler;
mod signal;
pub mod store;
pub mod trigger;
pub mod types;

pub use gnomon_cronexpr::{CronExpression, ParseError as CronParseError};

pub use crate::{
    context::JobContext,
    descriptor::{DEFAULT_DESCRIPTOR_FILE, DescriptorFormat, LoadSummary},
    error::{Error, Result},
    job::{
        DeclaredSchedule, DeclaredTrigger, Job, JobDetail, JobError, JobFactory, JobTypeRegistry,
        parse_data_entries,
    },
    listener::{JobListener, ListenerManager, Matcher, SchedulerListener, TriggerListener},
    pool::WorkerPool,
    scheduler::{ExecutingJobInfo, Scheduler, SchedulerConfig},
    store::{AcquireResult, FiredBundle, JobStore},
    trigger::{
        DEFAULT_PRIORITY, IntervalUnit, MisfireInstruction, RepeatCount, Schedule, Trigger,
    },
    types::{
        CompletionCode, DataMap, DataValue, JobKey, KEY_JOB_NAME, KEY_TRIGGER_CRON_EXPRESSION,
        KEY_TRIGGER_NAME, SchedulerState, SchedulerStatus, TriggerKey, TriggerState,
    },
};
