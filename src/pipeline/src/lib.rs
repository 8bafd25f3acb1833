//! The [`Pipeline`] is the orchestrator: it owns the database, the
//! processor registry, the file watcher, and the background poll loop
//! that drives pending jobs to completion, fanning out lifecycle
//! [`Event`]s to whichever external surface (CLI, HTTP/WS server, test
//! harness) cares to subscribe.
//!
//! Grounded on `automaat-server`'s `Worker` (a blocking, single-job
//! poll-and-sleep loop): generalized here to N concurrent job-driving
//! tasks under a concurrency cap, scheduled on a `tokio` runtime instead
//! of a dedicated OS thread.

#![deny(
    clippy::all,
    rust_2018_idioms,
    future_incompatible,
    missing_docs,
    nonstandard_style
)]
#![allow(clippy::multiple_crate_versions)]

mod error;
mod event;
mod loader;

pub use error::PipelineError;
pub use event::Event;
pub use loader::{discover_plugins, load_registry, PluginManifest, ProcessorFactory};

use chrono::Utc;
use event::EventBus;
use flowline_core::{Id, Job, JobConfig, JobStatus, SourceType, StepResult, StepStatus};
use flowline_executor::{Executor, ExecutorHooks};
use flowline_registry::Registry;
use flowline_storage::{Database, DatabasePool, JobStore};
use flowline_watcher::{WatchConfig, WatchEvent, Watcher, WatcherHandle};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const BACKOFF_INTERVAL: Duration = Duration::from_secs(5);

/// Everything [`Pipeline::start`] needs to bring the system up.
pub struct PipelineConfig {
    /// SQLite database path, or `:memory:`.
    pub database_url: String,
    /// Directory `load_registry` enumerates for plugin manifests.
    pub plugin_dir: PathBuf,
    /// The compiled-in processor factories manifests resolve against.
    pub factories: HashMap<String, ProcessorFactory>,
    /// Directories the file watcher should monitor.
    pub watches: Vec<WatchConfig>,
    /// Maximum number of jobs driven concurrently.
    pub max_concurrent: usize,
}

impl PipelineConfig {
    /// A config with no plugins, no watches, and a concurrency cap of 4.
    #[must_use]
    pub fn new(database_url: impl Into<String>, plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            database_url: database_url.into(),
            plugin_dir: plugin_dir.into(),
            factories: HashMap::new(),
            watches: Vec::new(),
            max_concurrent: 4,
        }
    }

    /// Register a compiled-in processor factory under `name`.
    #[must_use]
    pub fn with_factory(mut self, name: impl Into<String>, factory: ProcessorFactory) -> Self {
        self.factories.insert(name.into(), factory);
        self
    }

    /// Add a directory for the file watcher to monitor.
    #[must_use]
    pub fn with_watch(mut self, watch: WatchConfig) -> Self {
        self.watches.push(watch);
        self
    }
}

/// Owns the database, registry, watcher and poll loop, and exposes the
/// job commands an external surface drives the pipeline through.
pub struct Pipeline {
    pool: DatabasePool,
    registry: Arc<Registry>,
    events: EventBus,
    active: Arc<Mutex<HashSet<Id>>>,
    max_concurrent: usize,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    watcher_handle: Option<WatcherHandle>,
}

impl Pipeline {
    /// Connect the database, load plugins, register the watcher, and
    /// spawn the background poll loop.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the database cannot be reached, a
    /// plugin manifest is malformed or names an unknown factory, or the
    /// file watcher cannot be started.
    pub async fn start(config: PipelineConfig) -> Result<Self, PipelineError> {
        let pool = Database::connect(&config.database_url)?;

        let registry = load_registry(&config.plugin_dir, &config.factories)?;
        if let Err(err) = registry.validate_dependencies() {
            tracing::warn!(error = %err, "processor registry has an unsatisfied dependency");
        }
        let registry = Arc::new(registry);

        let events = EventBus::new();
        let active = Arc::new(Mutex::new(HashSet::new()));
        let running = Arc::new(AtomicBool::new(true));

        let watcher_handle = if config.watches.is_empty() {
            None
        } else {
            let mut watcher = Watcher::new(config.watches)?;
            for watch_event in watcher.scan_existing(None) {
                handle_watch_event(&pool, &events, watch_event);
            }

            let pool = pool.clone();
            let events = events.clone();
            Some(watcher.start(move |watch_event| handle_watch_event(&pool, &events, watch_event)))
        };

        let worker = spawn_poll_loop(
            pool.clone(),
            registry.clone(),
            events.clone(),
            active.clone(),
            running.clone(),
            config.max_concurrent,
        );

        Ok(Self {
            pool,
            registry,
            events,
            active,
            max_concurrent: config.max_concurrent,
            running,
            worker: Some(worker),
            watcher_handle,
        })
    }

    /// Register a subscriber to every lifecycle [`Event`] the pipeline
    /// emits. A panicking subscriber is caught and logged, never blocking
    /// delivery to the others.
    pub fn subscribe(&self, f: impl Fn(&Event) + Send + Sync + 'static) {
        self.events.subscribe(f);
    }

    /// Create a new, `pending` job, persisted immediately and visible to
    /// the next poll.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] on a storage failure.
    pub fn create_job(
        &self,
        name: impl Into<String>,
        source_type: SourceType,
        tags: Vec<String>,
        priority: i32,
        config: JobConfig,
    ) -> Result<Job, PipelineError> {
        let mut job = Job::new(name, source_type, Utc::now());
        job.tags = tags;
        job.priority = priority;
        job.config = config;

        let conn = Database::from_pool(&self.pool)?;
        JobStore::new(&conn).save(&job)?;
        self.events.publish(Event::JobCreated { job_id: job.id.clone() });

        Ok(job)
    }

    /// Fetch a job by id.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] on a storage failure.
    pub fn get_job(&self, id: &Id) -> Result<Option<Job>, PipelineError> {
        let conn = Database::from_pool(&self.pool)?;
        Ok(JobStore::new(&conn).get(id)?)
    }

    /// List jobs, optionally filtered by status and/or tag, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] on a storage failure.
    pub fn list_jobs(
        &self,
        status: Option<JobStatus>,
        tag: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Job>, PipelineError> {
        let conn = Database::from_pool(&self.pool)?;
        Ok(JobStore::new(&conn).list(status, tag, limit, offset)?)
    }

    /// Delete a job. With `revert_first`, every reversible step is undone
    /// before the row (and, via the foreign key cascade, its history and
    /// artifacts) is removed.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::JobNotFound`] if `id` doesn't exist, or a
    /// storage/executor error.
    pub async fn delete_job(&self, id: &Id, revert_first: bool) -> Result<(), PipelineError> {
        let mut job = self.require_job(id)?;

        if revert_first {
            let conn = Database::from_pool(&self.pool)?;
            Executor::new(&self.registry, &conn).revert_all(&mut job).await?;
        }

        let conn = Database::from_pool(&self.pool)?;
        JobStore::new(&conn).delete(id)?;
        Ok(())
    }

    /// Drive `id` to its next suspension point (`awaiting_input`,
    /// `failed`, or completion), synchronously, outside the poll loop.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::JobNotFound`] if `id` doesn't exist, or an
    /// executor/storage error.
    pub async fn process_job(&self, id: &Id) -> Result<Job, PipelineError> {
        let mut job = self.require_job(id)?;
        let hooks = PipelineHooks { events: self.events.clone() };
        run_job_to_suspension(&self.pool, &self.registry, &hooks, &mut job).await?;
        Ok(job)
    }

    /// Resume a job suspended on `job.current_step`, then drive it to its
    /// next suspension point.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::JobNotFound`] if `id` doesn't exist, or an
    /// executor/storage error (e.g. the job isn't actually suspended).
    pub async fn resume_job(&self, id: &Id, input: Value) -> Result<Job, PipelineError> {
        let mut job = self.require_job(id)?;
        let step_name = job.current_step.clone().ok_or_else(|| {
            PipelineError::JobNotFound(format!("{} is not awaiting input", id))
        })?;

        let conn = Database::from_pool(&self.pool)?;
        Executor::new(&self.registry, &conn).resume_step(&mut job, &step_name, input).await?;
        drop(conn);

        let hooks = PipelineHooks { events: self.events.clone() };
        run_job_to_suspension(&self.pool, &self.registry, &hooks, &mut job).await?;
        Ok(job)
    }

    /// Cancel a job. No further steps run; already-committed artifacts are
    /// left in place (use [`Pipeline::revert_job`] first to undo them).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::JobNotFound`] if `id` doesn't exist.
    pub fn cancel_job(&self, id: &Id) -> Result<Job, PipelineError> {
        let mut job = self.require_job(id)?;
        job.transition_to_cancelled(Utc::now());

        let conn = Database::from_pool(&self.pool)?;
        JobStore::new(&conn).save(&job)?;
        Ok(job)
    }

    /// Revert a job: every completed step if `to_step` is `None`, or every
    /// completed step after (not including) `to_step`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::JobNotFound`] if `id` doesn't exist, or an
    /// executor error.
    pub async fn revert_job(&self, id: &Id, to_step: Option<&str>) -> Result<Job, PipelineError> {
        let mut job = self.require_job(id)?;
        let conn = Database::from_pool(&self.pool)?;
        let executor = Executor::new(&self.registry, &conn);

        match to_step {
            Some(step) => executor.revert_to_step(&mut job, step).await?,
            None => executor.revert_all(&mut job).await?,
        }

        Ok(job)
    }

    /// Stop the poll loop and the file watcher, call every processor's
    /// `on_unload` hook, and let the database pool close as it drops.
    ///
    /// # Errors
    ///
    /// Returns a [`tokio::task::JoinError`]-carrying error if the poll
    /// loop task panicked.
    pub async fn stop(mut self) -> Result<(), PipelineError> {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.watcher_handle.take() {
            if let Err(err) = handle.stop().await {
                tracing::warn!(error = %err, "file watcher task panicked while stopping");
            }
        }

        if let Some(worker) = self.worker.take() {
            worker.abort();
            let _ = worker.await;
        }

        for processor in self.registry.iter() {
            processor.on_unload();
        }

        Ok(())
    }

    fn require_job(&self, id: &Id) -> Result<Job, PipelineError> {
        self.get_job(id)?.ok_or_else(|| PipelineError::JobNotFound(id.to_string()))
    }
}

/// Re-emits [`flowline_executor::Executor`]'s per-step hooks as pipeline
/// [`Event`]s.
struct PipelineHooks {
    events: EventBus,
}

impl ExecutorHooks for PipelineHooks {
    fn step_completed(&self, job: &Job, result: &StepResult) {
        self.events.publish(Event::StepCompleted {
            job_id: job.id.clone(),
            step_name: result.step_name.clone(),
            status: step_status_str(result.status).to_owned(),
        });
    }

    fn step_awaiting_input(&self, job: &Job, result: &StepResult) {
        self.events.publish(Event::StepAwaitingInput {
            job_id: job.id.clone(),
            step_name: result.step_name.clone(),
        });
    }
}

fn step_status_str(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Pending => "pending",
        StepStatus::Running => "running",
        StepStatus::AwaitingInput => "awaiting_input",
        StepStatus::Completed => "completed",
        StepStatus::Failed => "failed",
        StepStatus::Skipped => "skipped",
        StepStatus::Reverted => "reverted",
    }
}

/// Repeatedly call `execute_next_step` while `job` is still runnable,
/// stopping on `awaiting_input`, `failed`, or completion (`None`).
async fn run_job_to_suspension(
    pool: &DatabasePool,
    registry: &Registry,
    hooks: &dyn ExecutorHooks,
    job: &mut Job,
) -> Result<(), PipelineError> {
    loop {
        if !matches!(job.status, JobStatus::Pending | JobStatus::Processing) {
            break;
        }
        let conn = Database::from_pool(pool)?;
        let executor = Executor::with_hooks(registry, &conn, hooks);
        if executor.execute_next_step(job).await?.is_none() {
            break;
        }
    }
    Ok(())
}

fn spawn_poll_loop(
    pool: DatabasePool,
    registry: Arc<Registry>,
    events: EventBus,
    active: Arc<Mutex<HashSet<Id>>>,
    running: Arc<AtomicBool>,
    max_concurrent: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while running.load(Ordering::SeqCst) {
            match poll_once(&pool, &registry, &events, &active, max_concurrent).await {
                Ok(()) => tokio::time::sleep(POLL_INTERVAL).await,
                Err(err) => {
                    tracing::error!(error = %err, "poll loop iteration failed, backing off");
                    tokio::time::sleep(BACKOFF_INTERVAL).await;
                }
            }
        }
    })
}

async fn poll_once(
    pool: &DatabasePool,
    registry: &Arc<Registry>,
    events: &EventBus,
    active: &Arc<Mutex<HashSet<Id>>>,
    max_concurrent: usize,
) -> Result<(), PipelineError> {
    let capacity = max_concurrent.saturating_sub(active.lock().unwrap().len());
    if capacity == 0 {
        return Ok(());
    }

    let conn = Database::from_pool(pool)?;
    let pending = JobStore::new(&conn).list_pending_for_pickup(capacity as i64)?;
    drop(conn);

    for job in pending {
        let mut guard = active.lock().unwrap();
        if !guard.insert(job.id.clone()) {
            continue;
        }
        drop(guard);

        let pool = pool.clone();
        let registry = registry.clone();
        let events = events.clone();
        let active = active.clone();
        tokio::spawn(drive_job(pool, registry, events, active, job));
    }

    Ok(())
}

async fn drive_job(
    pool: DatabasePool,
    registry: Arc<Registry>,
    events: EventBus,
    active: Arc<Mutex<HashSet<Id>>>,
    mut job: Job,
) {
    events.publish(Event::JobStarted { job_id: job.id.clone() });

    let hooks = PipelineHooks { events: events.clone() };
    let outcome = run_job_to_suspension(&pool, &registry, &hooks, &mut job).await;

    active.lock().unwrap().remove(&job.id);

    match outcome {
        Ok(()) => match job.status {
            JobStatus::Completed => events.publish(Event::JobCompleted { job_id: job.id.clone() }),
            JobStatus::Failed => events.publish(Event::JobFailed {
                job_id: job.id.clone(),
                error: job.error_message.clone().unwrap_or_default(),
            }),
            _ => {}
        },
        Err(err) => {
            tracing::error!(job_id = %job.id, error = %err, "job driver task failed");
        }
    }
}

fn handle_watch_event(pool: &DatabasePool, events: &EventBus, watch_event: WatchEvent) {
    events.publish(Event::FileDetected {
        path: watch_event.path.display().to_string(),
        watch_name: watch_event.watch_name.clone(),
        event_type: watch_event.change.to_string(),
    });

    let conn = match Database::from_pool(pool) {
        Ok(conn) => conn,
        Err(err) => {
            tracing::error!(error = %err, "could not check out a connection for a watch-triggered job");
            return;
        }
    };

    let mut job = Job::new(
        format!("{}: {}", watch_event.watch_name, watch_event.path.display()),
        SourceType::File,
        Utc::now(),
    );
    job.source_path = Some(watch_event.path.display().to_string());
    job.tags = watch_event.tags;
    job.priority = watch_event.priority;
    job.config = watch_event.metadata;
    if let Some(processor) = watch_event.initial_processor {
        job.config.insert("initial_processor".to_owned(), Value::String(processor));
    }

    if let Err(err) = JobStore::new(&conn).save(&job) {
        tracing::error!(error = %err, "could not save job created from a watch event");
        return;
    }

    events.publish(Event::JobCreated { job_id: job.id.clone() });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flowline_core::{Context, Processor, ProcessorError};
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl Processor for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn should_process(&self, _job: &Job) -> bool {
            true
        }

        async fn process(&self, _job: &Job, _ctx: &mut Context) -> Result<StepResult, ProcessorError> {
            let mut result = StepResult::new("echo", Utc::now());
            result.mark_completed(flowline_core::DataBag::new(), Utc::now());
            Ok(result)
        }

        async fn revert(&self, _job: &Job, _result: &StepResult, _ctx: &mut Context) -> bool {
            true
        }
    }

    fn echo_factory() -> Box<dyn Processor> {
        Box::new(Echo)
    }

    async fn pipeline_with_echo(dir: &std::path::Path) -> Pipeline {
        std::fs::create_dir(dir.join("echo")).unwrap();
        let config = PipelineConfig::new(":memory:", dir)
            .with_factory("echo", echo_factory as ProcessorFactory);
        Pipeline::start(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_and_process_job_completes() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline_with_echo(dir.path()).await;

        let job = pipeline
            .create_job("test", SourceType::Manual, vec![], 0, JobConfig::new())
            .unwrap();

        let finished = pipeline.process_job(&job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);

        pipeline.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_list_jobs_filters_by_status() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline_with_echo(dir.path()).await;

        let job = pipeline
            .create_job("test", SourceType::Manual, vec![], 0, JobConfig::new())
            .unwrap();
        pipeline.process_job(&job.id).await.unwrap();

        let completed = pipeline.list_jobs(Some(JobStatus::Completed), None, 10, 0).unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, job.id);

        pipeline.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_job_marks_cancelled() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline_with_echo(dir.path()).await;

        let job = pipeline
            .create_job("test", SourceType::Manual, vec![], 0, JobConfig::new())
            .unwrap();
        let cancelled = pipeline.cancel_job(&job.id).unwrap();

        assert_eq!(cancelled.status, JobStatus::Cancelled);
        pipeline.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_events_fan_out_to_multiple_subscribers() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline_with_echo(dir.path()).await;

        let seen_a: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let seen_b = seen_a.clone();
        pipeline.subscribe(move |event| {
            if let Event::JobCreated { job_id } = event {
                seen_a.lock().unwrap().push(job_id.to_string());
            }
        });
        pipeline.subscribe(move |event| {
            if let Event::JobCreated { job_id } = event {
                seen_b.lock().unwrap().push(job_id.to_string());
            }
        });

        let job = pipeline
            .create_job("test", SourceType::Manual, vec![], 0, JobConfig::new())
            .unwrap();

        assert_eq!(seen_a.lock().unwrap().len() + seen_b.lock().unwrap().len(), 2);
        let _ = job;
        pipeline.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_poll_loop_picks_up_pending_job_without_explicit_process_call() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline_with_echo(dir.path()).await;

        let job = pipeline
            .create_job("test", SourceType::Manual, vec![], 0, JobConfig::new())
            .unwrap();

        for _ in 0..30 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let current = pipeline.get_job(&job.id).unwrap().unwrap();
            if current.status == JobStatus::Completed {
                break;
            }
        }

        let finished = pipeline.get_job(&job.id).unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        pipeline.stop().await.unwrap();
    }
}
