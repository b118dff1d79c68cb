#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Loading declarative schedule documents from files and strings.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    gnomon_scheduler::{
        DescriptorFormat, Job, JobContext, JobError, JobKey, LoadSummary, Scheduler,
        SchedulerConfig, TriggerKey,
    },
};

struct CountingJob {
    counter: Arc<AtomicUsize>,
}

#[async_trait]
impl Job for CountingJob {
    async fn run(&mut self, ctx: &JobContext) -> Result<(), JobError> {
        // Descriptor-provided data travels into the context.
        let _ = ctx.get_str("SOURCE");
        self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn scheduler_with_counter() -> (Arc<Scheduler>, Arc<AtomicUsize>) {
    let scheduler = Scheduler::new(SchedulerConfig {
        worker_threads: 2,
        idle_wait: Duration::from_millis(200),
        ..SchedulerConfig::default()
    });
    let counter = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&counter);
    scheduler
        .registry()
        .register_producer("counting", move || CountingJob {
            counter: Arc::clone(&c),
        });
    (scheduler, counter)
}

async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(timeout, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn loads_file_and_fires() {
    let (scheduler, counter) = scheduler_with_counter();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.json");
    std::fs::write(
        &path,
        r#"{
            "schedule": {
                "jobs": [
                    {
                        "name": "ingest",
                        "job-class": "counting",
                        "data-map": [ { "key": "SOURCE", "value": "descriptor" } ]
                    }
                ],
                "triggers": [
                    {
                        "variant": "simple",
                        "name": "ingest-now",
                        "job-name": "ingest",
                        "repeat-count": 0,
                        "repeat-interval": 0
                    }
                ]
            }
        }"#,
    )
    .unwrap();

    let summary = scheduler.load_descriptor(&path, true).unwrap();
    assert_eq!(summary, LoadSummary { jobs: 1, triggers: 1 });

    scheduler.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            counter.load(Ordering::SeqCst) == 1
        })
        .await,
        "descriptor trigger should fire once"
    );
    scheduler.shutdown(true).await;
}

#[tokio::test]
async fn missing_file_is_tolerated_unless_strict() {
    let (scheduler, _) = scheduler_with_counter();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");

    let summary = scheduler.load_descriptor(&path, false).unwrap();
    assert_eq!(summary, LoadSummary::default());

    assert!(scheduler.load_descriptor(&path, true).is_err());
}

#[tokio::test]
async fn durable_job_then_trigger_in_second_load() {
    let (scheduler, counter) = scheduler_with_counter();

    // First document: a durable job with no triggers.
    let jobs_only = r#"{
        "schedule": {
            "jobs": [
                { "name": "archiver", "job-class": "counting", "durability": true }
            ]
        }
    }"#;
    scheduler
        .load_descriptor_str(jobs_only, DescriptorFormat::Json)
        .unwrap();
    assert!(scheduler.store().contains_job(&JobKey::new("archiver")));

    // Second document adds a trigger for it.
    let trigger_only = r#"{
        "schedule": {
            "triggers": [
                {
                    "variant": "simple",
                    "name": "archiver-once",
                    "job-name": "archiver",
                    "repeat-count": 0,
                    "repeat-interval": 0
                }
            ]
        }
    }"#;
    scheduler
        .load_descriptor_str(trigger_only, DescriptorFormat::Json)
        .unwrap();

    scheduler.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            counter.load(Ordering::SeqCst) == 1
        })
        .await
    );

    // The one-shot trigger retires; the durable job stays.
    assert!(
        wait_until(Duration::from_secs(2), || {
            scheduler
                .store()
                .trigger(&TriggerKey::new("archiver-once"))
                .is_none()
        })
        .await
    );
    assert!(scheduler.store().contains_job(&JobKey::new("archiver")));
    scheduler.shutdown(true).await;
}

#[tokio::test]
async fn reloading_reschedules_instead_of_duplicating() {
    let (scheduler, _) = scheduler_with_counter();
    let doc = r#"{
        "schedule": {
            "jobs": [
                { "name": "roller", "job-class": "counting", "durability": true }
            ],
            "triggers": [
                {
                    "variant": "cron",
                    "name": "roller-daily",
                    "job-name": "roller",
                    "cron-expression": "0 0 4 * * ?"
                }
            ]
        }
    }"#;
    scheduler
        .load_descriptor_str(doc, DescriptorFormat::Json)
        .unwrap();
    scheduler
        .load_descriptor_str(doc, DescriptorFormat::Json)
        .unwrap();

    assert_eq!(scheduler.store().job_count(), 1);
    assert_eq!(scheduler.store().trigger_count(), 1);
}

#[tokio::test]
async fn toml_descriptor_loads() {
    let (scheduler, _) = scheduler_with_counter();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.toml");
    std::fs::write(
        &path,
        r#"
[schedule]
[[schedule.jobs]]
name = "tomljob"
job-class = "counting"
durability = true

[[schedule.triggers]]
variant = "cron"
name = "tomljob-weekly"
job-name = "tomljob"
cron-expression = "0 0 6 ? * MON"
"#,
    )
    .unwrap();

    let summary = scheduler.load_descriptor(&path, true).unwrap();
    assert_eq!(summary, LoadSummary { jobs: 1, triggers: 1 });
}
