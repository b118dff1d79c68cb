//! Per-fire execution: the unit a worker runs for one fired trigger.
//!
//! Ordering per fire: global-lock gate, fresh job instance, listener
//! pre-notification, the run itself, cleanup (always), then completion
//! bookkeeping and post-notifications. Cooperative outcomes (interrupt,
//! missing parameter) surface to listeners with their own completion codes
//! rather than being swallowed.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use {
    futures::FutureExt,
    tracing::{debug, error, info, warn},
};

use crate::{
    context::JobContext,
    job::JobError,
    scheduler::{ExecutingJob, Scheduler},
    store::FiredBundle,
    types::CompletionCode,
};

impl Scheduler {
    pub(crate) async fn run_fired_job(self: Arc<Self>, bundle: FiredBundle, ctx: JobContext) {
        let job_key = bundle.job.key.clone();
        let trigger_key = bundle.trigger.key.clone();

        // Global lock: abort before `job_to_be_executed` fires, but run the
        // completion bookkeeping so blocked siblings are released, and
        // report the skip through the post-execution notifications.
        if self.is_locked() {
            info!(job = %job_key, "global lock set; execution skipped");
            self.store.triggered_job_complete(&trigger_key, &job_key);
            self.listeners
                .notify_job_was_executed(&ctx, CompletionCode::Skipped);
            self.listeners
                .notify_trigger_complete(&bundle.trigger, &ctx, CompletionCode::Skipped);
            self.signaler.signal_scheduling_change();
            return;
        }

        let mut job = bundle.job.instantiate();

        self.register_execution(ExecutingJob {
            job_key: job_key.clone(),
            trigger_key: trigger_key.clone(),
            fire_instance_id: ctx.fire_instance_id().to_string(),
            fire_time: ctx.fire_time(),
            data: ctx.data().clone(),
            interrupt: ctx.interrupt_flag(),
        });

        self.listeners.notify_job_to_be_executed(&ctx);
        debug!(
            job = %job_key,
            trigger = %trigger_key,
            fire = %ctx.fire_instance_id(),
            "job starting"
        );

        let outcome = AssertUnwindSafe(job.run(&ctx)).catch_unwind().await;
        let code = match outcome {
            Ok(Ok(())) => CompletionCode::Success,
            Ok(Err(JobError::Interrupted)) => {
                info!(job = %job_key, "job interrupted");
                CompletionCode::Interrupted
            },
            Ok(Err(JobError::MissingParameter { key })) => {
                warn!(job = %job_key, key, "required parameter missing; fire aborted");
                CompletionCode::MissingParameter
            },
            Ok(Err(JobError::Failed { message })) => {
                error!(job = %job_key, error = %message, "job execution failed");
                CompletionCode::Failed
            },
            Err(_) => {
                error!(job = %job_key, "job panicked");
                CompletionCode::Failed
            },
        };

        // Cleanup always runs, shielded the same way listeners are.
        if catch_unwind(AssertUnwindSafe(|| job.cleanup(&ctx))).is_err() {
            error!(job = %job_key, "cleanup panicked");
        }
        drop(job);

        self.unregister_execution(ctx.fire_instance_id());

        self.store.triggered_job_complete(&trigger_key, &job_key);
        self.listeners.notify_job_was_executed(&ctx, code);
        self.listeners.notify_trigger_complete(&bundle.trigger, &ctx, code);
        self.signaler.signal_scheduling_change();
        debug!(job = %job_key, code = ?code, "job finished");
    }

    pub(crate) fn register_execution(&self, entry: ExecutingJob) {
        let mut executing = self.executing.lock().unwrap_or_else(|e| e.into_inner());
        executing.push(entry);
    }

    pub(crate) fn unregister_execution(&self, fire_instance_id: &str) {
        let mut executing = self.executing.lock().unwrap_or_else(|e| e.into_inner());
        executing.retain(|e| e.fire_instance_id != fire_instance_id);
    }
}
