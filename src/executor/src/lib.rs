//! The [`Executor`] drives a single step of a single job at a time: it asks
//! the [`flowline_router::Router`] what to run, opens a [`Context`] for it,
//! calls the processor, and records the outcome -- committing artifacts on
//! success, rolling them back on failure, and persisting the job and its
//! history either way.
//!
//! Reverting a step or a whole job is the mirror image: artifacts are
//! replayed in reverse through [`flowline_core::revert_artifact`], and the
//! processor's own [`Processor::revert`] hook runs for anything the context
//! can't undo on its own.

#![deny(
    clippy::all,
    rust_2018_idioms,
    future_incompatible,
    missing_docs,
    nonstandard_style
)]
#![allow(clippy::multiple_crate_versions)]

mod error;

pub use error::ExecutorError;

use chrono::Utc;
use flowline_core::{
    revert_artifact, Context, Job, JobStatus, RevertOutcome, RequiresInput, StepResult, StepStatus,
};
use flowline_registry::Registry;
use flowline_router::Router;
use flowline_storage::{ArtifactStore, Database, JobStore};
use serde_json::Value;

/// Lifecycle hooks the executor invokes after each step, so a caller (the
/// pipeline orchestrator) can re-emit them as external events. Both methods
/// default to a no-op, so tests and simple embedders can ignore them
/// entirely.
pub trait ExecutorHooks: Send + Sync {
    /// Called once a step reaches a terminal-for-now state (`completed`,
    /// `failed` or `skipped`).
    fn step_completed(&self, _job: &Job, _result: &StepResult) {}

    /// Called when a step suspends the job for human input.
    fn step_awaiting_input(&self, _job: &Job, _result: &StepResult) {}
}

/// The default, silent set of hooks.
impl ExecutorHooks for () {}

/// Drives one step per invocation against one job, on top of a [`Registry`]
/// and a single database connection.
pub struct Executor<'a> {
    registry: &'a Registry,
    database: &'a Database,
    hooks: &'a dyn ExecutorHooks,
}

impl<'a> Executor<'a> {
    /// Build an executor over a registry and a checked-out connection, with
    /// no event hooks.
    #[must_use]
    pub fn new(registry: &'a Registry, database: &'a Database) -> Self {
        Self::with_hooks(registry, database, &())
    }

    /// Build an executor with explicit lifecycle hooks.
    #[must_use]
    pub fn with_hooks(registry: &'a Registry, database: &'a Database, hooks: &'a dyn ExecutorHooks) -> Self {
        Self {
            registry,
            database,
            hooks,
        }
    }

    /// Ask the router for the next step and run it. If no step applies, the
    /// job is marked `completed` and `None` is returned.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError`] on a storage failure.
    pub async fn execute_next_step(&self, job: &mut Job) -> Result<Option<StepResult>, ExecutorError> {
        let router = Router::new(self.registry);
        match router.get_next_step(job).await {
            Some(name) => self.execute_step(job, &name).await.map(Some),
            None => {
                job.transition_to_completed(Utc::now());
                self.save_job(job)?;
                Ok(None)
            }
        }
    }

    /// Run a single named step against `job`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::UnknownProcessor`] if `name` is not
    /// registered, or [`ExecutorError::Storage`] on a persistence failure.
    /// A processor failure is not an error from this method's perspective --
    /// it is recorded on the returned [`StepResult`] and on `job`.
    pub async fn execute_step(&self, job: &mut Job, name: &str) -> Result<StepResult, ExecutorError> {
        let processor = self
            .registry
            .get(name)
            .ok_or_else(|| ExecutorError::UnknownProcessor(name.to_owned()))?;

        let router = Router::new(self.registry);
        let (can_run, reason) = router.can_run_step(job, name);
        if !can_run {
            let now = Utc::now();
            let mut result = StepResult::new(name, now);
            result.job_id = Some(job.id.clone());
            result.mark_skipped(reason.unwrap_or_default(), now);
            job.push_history(result.clone());
            self.save_job(job)?;
            return Ok(result);
        }

        let now = Utc::now();
        let mut result = StepResult::new(name, now);
        result.job_id = Some(job.id.clone());
        result.mark_running(now);
        job.transition_to_processing(name, now);
        self.save_job(job)?;

        let suspends = match processor.requires_input() {
            RequiresInput::Never => false,
            RequiresInput::Always => true,
            RequiresInput::Conditional => processor.requires_user_input(job).await,
        };

        if suspends {
            return self.suspend_for_input(job, result, now);
        }

        self.run(job, result, |job, result| job.push_history(result)).await
    }

    /// Resume a step previously suspended with [`Executor::execute_step`].
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::UnknownProcessor`] if `name` is not
    /// registered, [`ExecutorError::StepNotAwaitingInput`] if its most
    /// recent history entry isn't suspended, or
    /// [`ExecutorError::InvalidInput`] if the processor rejects `input`.
    pub async fn resume_step(
        &self,
        job: &mut Job,
        name: &str,
        input: Value,
    ) -> Result<StepResult, ExecutorError> {
        let processor = self
            .registry
            .get(name)
            .ok_or_else(|| ExecutorError::UnknownProcessor(name.to_owned()))?;

        let index = job
            .history
            .iter()
            .rposition(|r| r.step_name == name && r.status == StepStatus::AwaitingInput)
            .ok_or_else(|| ExecutorError::StepNotAwaitingInput(name.to_owned()))?;

        let (ok, reason) = processor.validate_input(job, &input).await;
        if !ok {
            return Err(ExecutorError::InvalidInput(
                reason.unwrap_or_else(|| "input rejected".to_owned()),
            ));
        }

        let now = Utc::now();
        job.history[index].user_input = Some(input.clone());
        job.data.set("user_input", input);
        job.transition_to_processing(name, now);
        self.save_job(job)?;

        let mut result = job.history[index].clone();
        result.mark_running(now);

        self.run(job, result, move |job, result| {
            if result.status == StepStatus::Completed {
                job.data.merge(result.output_data.clone());
            }
            job.history[index] = result;
        })
        .await
    }

    /// Revert one step, replaying its artifacts in reverse and invoking the
    /// processor's own [`Processor::revert`] hook.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::UnknownProcessor`] if `name` is not
    /// registered, or [`ExecutorError::StepNotRevertable`] if its most
    /// recent history entry never ran, didn't complete, or has an
    /// irreversible artifact.
    pub async fn revert_step(&self, job: &mut Job, name: &str) -> Result<StepResult, ExecutorError> {
        let processor = self
            .registry
            .get(name)
            .ok_or_else(|| ExecutorError::UnknownProcessor(name.to_owned()))?;

        let index = job
            .history
            .iter()
            .rposition(|r| r.step_name == name)
            .ok_or_else(|| ExecutorError::StepNotRevertable(name.to_owned()))?;

        let artifact_store = ArtifactStore::new(self.database);
        let artifacts = artifact_store.list_for_step_result(&job.history[index].id)?;

        if !job.history[index].can_revert(&artifacts) {
            return Err(ExecutorError::StepNotRevertable(name.to_owned()));
        }

        let mut ctx = Context::new(job.id.clone(), job.history[index].id.clone());
        let mut errors: Vec<String> = Vec::new();

        for artifact in artifacts.iter().rev() {
            let now = Utc::now();
            match revert_artifact(artifact) {
                RevertOutcome::Reverted => artifact_store.mark_reverted(&artifact.id, now)?,
                RevertOutcome::Orphaned(msg) => {
                    tracing::warn!(target = %artifact.target, reason = %msg, "artifact target already gone; marking reverted");
                    artifact_store.mark_orphaned(&artifact.id, now)?;
                }
                RevertOutcome::Conflict(msg) => {
                    artifact_store.mark_failed(&artifact.id, &msg, now)?;
                    errors.push(format!("{}: {}", artifact.target, msg));
                }
                RevertOutcome::NotApplicable => {}
            }
        }

        let result_snapshot = job.history[index].clone();
        if !processor.revert(job, &result_snapshot, &mut ctx).await {
            errors.push(format!("processor `{}` custom revert failed", name));
        }

        let committed = ctx.commit();
        if !committed.is_empty() {
            artifact_store.save_all(&committed)?;
        }

        let now = Utc::now();
        if errors.is_empty() {
            job.history[index].mark_reverted(now);
        } else {
            job.history[index].revert_error = Some(errors.join("; "));
        }

        self.save_job(job)?;
        Ok(job.history[index].clone())
    }

    /// Revert every step after (and not including) `target`, then re-plan
    /// the job from `target` by transitioning it back to `pending` with no
    /// current step. Stops at the first step that fails to revert, leaving
    /// the job `failed`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::StepNotRevertable`] if `target` never ran.
    pub async fn revert_to_step(&self, job: &mut Job, target: &str) -> Result<(), ExecutorError> {
        let target_index = job
            .history
            .iter()
            .position(|r| r.step_name == target)
            .ok_or_else(|| ExecutorError::StepNotRevertable(target.to_owned()))?;

        let names: Vec<String> = job.history[(target_index + 1)..]
            .iter()
            .filter(|r| r.status == StepStatus::Completed)
            .map(|r| r.step_name.clone())
            .collect();

        job.transition_to_reverting(Utc::now());
        self.save_job(job)?;

        for name in names.into_iter().rev() {
            let result = self.revert_step(job, &name).await?;
            if result.status != StepStatus::Reverted {
                job.transition_to_failed(
                    format!(
                        "revert of step `{}` failed: {}",
                        name,
                        result.revert_error.as_deref().unwrap_or("unknown error")
                    ),
                    Utc::now(),
                );
                self.save_job(job)?;
                return Ok(());
            }
        }

        job.transition_to_pending(Utc::now());
        self.save_job(job)?;
        Ok(())
    }

    /// Revert every reversible step in the job's history, in reverse order,
    /// then finalize the job as `reverted`. Continues past individual step
    /// revert failures; errors accumulate on each step's `revert_error`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError`] on a storage failure.
    pub async fn revert_all(&self, job: &mut Job) -> Result<(), ExecutorError> {
        job.transition_to_reverting(Utc::now());
        self.save_job(job)?;

        let names: Vec<String> = job
            .history
            .iter()
            .rev()
            .filter(|r| r.status == StepStatus::Completed)
            .map(|r| r.step_name.clone())
            .collect();

        for name in names {
            let _ = self.revert_step(job, &name).await?;
        }

        job.transition_to_reverted(Utc::now());
        self.save_job(job)?;
        Ok(())
    }

    fn suspend_for_input(
        &self,
        job: &mut Job,
        mut result: StepResult,
        now: chrono::DateTime<Utc>,
    ) -> Result<StepResult, ExecutorError> {
        result.mark_awaiting_input(now);
        job.transition_to_awaiting_input(&result.step_name, now);
        job.push_history(result.clone());
        self.save_job(job)?;
        self.hooks.step_awaiting_input(job, &result);
        Ok(result)
    }

    /// Open a context, call the processor, and record the outcome. `record`
    /// decides how the finished [`StepResult`] lands in `job.history` --
    /// appended for a fresh run, or overwritten in place for a resume.
    async fn run(
        &self,
        job: &mut Job,
        mut result: StepResult,
        record: impl FnOnce(&mut Job, StepResult),
    ) -> Result<StepResult, ExecutorError> {
        let name = result.step_name.clone();
        let processor = self
            .registry
            .get(&name)
            .ok_or_else(|| ExecutorError::UnknownProcessor(name.clone()))?;

        let mut ctx = Context::new(job.id.clone(), result.id.clone());
        let outcome = processor.process(job, &mut ctx).await;
        let now = Utc::now();

        let mut committed = Vec::new();

        match outcome {
            Ok(step_result) if step_result.status == StepStatus::AwaitingInput => {
                log_rollback_problems(&ctx.rollback());
                return self.suspend_for_input(job, result, now);
            }
            Ok(step_result) if step_result.status == StepStatus::Completed => {
                committed = ctx.commit();
                result.artifacts = committed.iter().map(|a| a.id.clone()).collect();
                result.mark_completed(step_result.output_data, now);
            }
            Ok(_) => {
                let outcomes = ctx.rollback();
                log_rollback_problems(&outcomes);
                result.mark_failed(
                    "processor returned a step result in an unsupported status",
                    None,
                    now,
                );
                job.transition_to_failed(
                    "processor returned a step result in an unsupported status",
                    now,
                );
            }
            Err(err) => {
                if processor.auto_revert_on_error() {
                    let outcomes = ctx.rollback();
                    log_rollback_problems(&outcomes);
                }
                result.mark_failed(err.to_string(), Some(format!("{:?}", err)), now);
                job.transition_to_failed(err.to_string(), now);
            }
        }

        // The step_result row must exist before any artifact referencing it
        // via a foreign key can be saved, so persist the job and its history
        // first and only then save the artifacts committed above.
        record(job, result.clone());
        self.save_job(job)?;

        if !committed.is_empty() {
            ArtifactStore::new(self.database).save_all(&committed)?;
        }

        self.hooks.step_completed(job, &result);
        Ok(result)
    }

    fn save_job(&self, job: &Job) -> Result<(), ExecutorError> {
        JobStore::new(self.database).save(job)?;
        Ok(())
    }
}

fn log_rollback_problems(outcomes: &[(flowline_core::Artifact, RevertOutcome)]) {
    for (artifact, outcome) in outcomes {
        if let RevertOutcome::Conflict(msg) = outcome {
            tracing::warn!(target = %artifact.target, reason = %msg, "rollback could not fully undo artifact");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flowline_core::{
        ApiCallKind, DataBag, Encoding, Processor, ProcessorError, SourceType,
    };
    use flowline_storage::Database as Db;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Debug)]
    struct CreateFile {
        name: &'static str,
        requires: Vec<String>,
        path: std::path::PathBuf,
    }

    #[async_trait]
    impl Processor for CreateFile {
        fn name(&self) -> &str {
            self.name
        }

        fn requires(&self) -> &[String] {
            &self.requires
        }

        async fn should_process(&self, _job: &Job) -> bool {
            true
        }

        async fn process(&self, _job: &Job, ctx: &mut Context) -> Result<StepResult, ProcessorError> {
            ctx.create_file(&self.path, b"content", Encoding::Utf8)?;
            let mut result = StepResult::new(self.name, Utc::now());
            result.mark_completed(DataBag::new(), Utc::now());
            Ok(result)
        }

        async fn revert(&self, _job: &Job, _result: &StepResult, _ctx: &mut Context) -> bool {
            true
        }
    }

    #[derive(Debug)]
    struct AlwaysFails {
        name: &'static str,
        path: std::path::PathBuf,
    }

    #[async_trait]
    impl Processor for AlwaysFails {
        fn name(&self) -> &str {
            self.name
        }

        async fn should_process(&self, _job: &Job) -> bool {
            true
        }

        async fn process(&self, _job: &Job, ctx: &mut Context) -> Result<StepResult, ProcessorError> {
            ctx.create_file(&self.path, b"content", Encoding::Utf8)?;
            Err(ProcessorError::Failed("boom".to_owned()))
        }

        async fn revert(&self, _job: &Job, _result: &StepResult, _ctx: &mut Context) -> bool {
            true
        }
    }

    #[derive(Debug)]
    struct HumanGate {
        name: &'static str,
        requires_input: RequiresInput,
    }

    #[async_trait]
    impl Processor for HumanGate {
        fn name(&self) -> &str {
            self.name
        }

        fn requires_input(&self) -> RequiresInput {
            self.requires_input
        }

        async fn should_process(&self, _job: &Job) -> bool {
            true
        }

        async fn process(&self, _job: &Job, _ctx: &mut Context) -> Result<StepResult, ProcessorError> {
            let mut result = StepResult::new(self.name, Utc::now());
            result.mark_completed(DataBag::new(), Utc::now());
            Ok(result)
        }

        async fn revert(&self, _job: &Job, _result: &StepResult, _ctx: &mut Context) -> bool {
            true
        }

        async fn validate_input(&self, _job: &Job, input: &Value) -> (bool, Option<String>) {
            match input.get("choice") {
                Some(_) => (true, None),
                None => (false, Some("missing `choice`".to_owned())),
            }
        }
    }

    #[derive(Debug)]
    struct ApiCaller {
        name: &'static str,
    }

    #[async_trait]
    impl Processor for ApiCaller {
        fn name(&self) -> &str {
            self.name
        }

        async fn should_process(&self, _job: &Job) -> bool {
            true
        }

        async fn process(&self, _job: &Job, ctx: &mut Context) -> Result<StepResult, ProcessorError> {
            ctx.record_api_call(
                "github",
                "create_issue",
                ApiCallKind::Create,
                json!({"title": "bug"}),
                json!({"id": 42}),
                false,
                None,
            );
            let mut result = StepResult::new(self.name, Utc::now());
            result.mark_completed(DataBag::new(), Utc::now());
            Ok(result)
        }

        async fn revert(&self, _job: &Job, _result: &StepResult, _ctx: &mut Context) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct RecordingHooks {
        completed: Mutex<Vec<String>>,
        awaiting: Mutex<Vec<String>>,
    }

    impl ExecutorHooks for RecordingHooks {
        fn step_completed(&self, _job: &Job, result: &StepResult) {
            self.completed.lock().unwrap().push(result.step_name.clone());
        }

        fn step_awaiting_input(&self, _job: &Job, result: &StepResult) {
            self.awaiting.lock().unwrap().push(result.step_name.clone());
        }
    }

    fn memory_db() -> flowline_storage::DatabasePool {
        Db::connect(":memory:").unwrap()
    }

    #[tokio::test]
    async fn test_linear_two_step_pipeline_completes() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::new();
        registry
            .register(Box::new(CreateFile {
                name: "a",
                requires: vec![],
                path: dir.path().join("a.txt"),
            }))
            .unwrap();
        registry
            .register(Box::new(CreateFile {
                name: "b",
                requires: vec!["a".to_owned()],
                path: dir.path().join("b.txt"),
            }))
            .unwrap();

        let pool = memory_db();
        let conn = Db::from_pool(&pool).unwrap();
        let executor = Executor::new(&registry, &conn);

        let mut job = Job::new("test", SourceType::Manual, Utc::now());
        while executor.execute_next_step(&mut job).await.unwrap().is_some() {}

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.history.len(), 2);
        assert!(job.history.iter().all(|r| r.status == StepStatus::Completed));
        assert!(job.completed_at.unwrap() > job.started_at.unwrap());
    }

    #[tokio::test]
    async fn test_auto_rollback_on_failure_leaves_no_trace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f1.txt");

        let mut registry = Registry::new();
        registry
            .register(Box::new(AlwaysFails {
                name: "x",
                path: path.clone(),
            }))
            .unwrap();

        let pool = memory_db();
        let conn = Db::from_pool(&pool).unwrap();
        let executor = Executor::new(&registry, &conn);

        let mut job = Job::new("test", SourceType::Manual, Utc::now());
        executor.execute_step(&mut job, "x").await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert!(!path.exists());

        let artifacts = ArtifactStore::new(&conn).list_for_job(&job.id).unwrap();
        assert!(artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_human_in_the_loop_suspends_then_resumes() {
        let mut registry = Registry::new();
        registry
            .register(Box::new(HumanGate {
                name: "h",
                requires_input: RequiresInput::Always,
            }))
            .unwrap();

        let pool = memory_db();
        let conn = Db::from_pool(&pool).unwrap();
        let hooks = RecordingHooks::default();
        let executor = Executor::with_hooks(&registry, &conn, &hooks);

        let mut job = Job::new("test", SourceType::Manual, Utc::now());
        executor.execute_step(&mut job, "h").await.unwrap();

        assert_eq!(job.status, JobStatus::AwaitingInput);
        assert_eq!(job.current_step.as_deref(), Some("h"));
        assert_eq!(*hooks.awaiting.lock().unwrap(), vec!["h".to_owned()]);

        let bad_input = executor.resume_step(&mut job, "h", json!({})).await;
        assert!(matches!(bad_input, Err(ExecutorError::InvalidInput(_))));

        executor
            .resume_step(&mut job, "h", json!({"choice": "a"}))
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.history.len(), 1);
        assert_eq!(job.history[0].user_input, Some(json!({"choice": "a"})));
        assert_eq!(*hooks.completed.lock().unwrap(), vec!["h".to_owned()]);
    }

    #[tokio::test]
    async fn test_revert_to_step_undoes_later_steps_only() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::new();
        for name in ["a", "b", "c"] {
            registry
                .register(Box::new(CreateFile {
                    name,
                    requires: vec![],
                    path: dir.path().join(format!("{}.txt", name)),
                }))
                .unwrap();
        }

        let pool = memory_db();
        let conn = Db::from_pool(&pool).unwrap();
        let executor = Executor::new(&registry, &conn);

        let mut job = Job::new("test", SourceType::Manual, Utc::now());
        while executor.execute_next_step(&mut job).await.unwrap().is_some() {}

        assert!(dir.path().join("a.txt").exists());
        assert!(dir.path().join("b.txt").exists());
        assert!(dir.path().join("c.txt").exists());

        executor.revert_to_step(&mut job, "a").await.unwrap();

        assert!(dir.path().join("a.txt").exists());
        assert!(!dir.path().join("b.txt").exists());
        assert!(!dir.path().join("c.txt").exists());
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.current_step.is_none());

        while executor.execute_next_step(&mut job).await.unwrap().is_some() {}
        assert_eq!(job.status, JobStatus::Completed);
        assert!(dir.path().join("b.txt").exists());
        assert!(dir.path().join("c.txt").exists());
    }

    #[tokio::test]
    async fn test_revert_all_finalizes_job_reverted() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::new();
        registry
            .register(Box::new(CreateFile {
                name: "a",
                requires: vec![],
                path: dir.path().join("a.txt"),
            }))
            .unwrap();

        let pool = memory_db();
        let conn = Db::from_pool(&pool).unwrap();
        let executor = Executor::new(&registry, &conn);

        let mut job = Job::new("test", SourceType::Manual, Utc::now());
        executor.execute_next_step(&mut job).await.unwrap();

        executor.revert_all(&mut job).await.unwrap();

        assert_eq!(job.status, JobStatus::Reverted);
        assert!(!dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_revert_step_marks_irreversible_artifact_unrevertable() {
        let mut registry = Registry::new();
        registry
            .register(Box::new(ApiCaller { name: "notify" }))
            .unwrap();

        let pool = memory_db();
        let conn = Db::from_pool(&pool).unwrap();
        let executor = Executor::new(&registry, &conn);

        let mut job = Job::new("test", SourceType::Manual, Utc::now());
        executor.execute_step(&mut job, "notify").await.unwrap();

        let err = executor.revert_step(&mut job, "notify").await.unwrap_err();
        assert!(matches!(err, ExecutorError::StepNotRevertable(_)));
    }

    #[tokio::test]
    async fn test_execute_step_unknown_processor() {
        let registry = Registry::new();
        let pool = memory_db();
        let conn = Db::from_pool(&pool).unwrap();
        let executor = Executor::new(&registry, &conn);

        let mut job = Job::new("test", SourceType::Manual, Utc::now());
        let err = executor.execute_step(&mut job, "missing").await.unwrap_err();

        assert!(matches!(err, ExecutorError::UnknownProcessor(name) if name == "missing"));
    }
}
