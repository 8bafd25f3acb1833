//! A [`Job`] is a unit of work flowing through the pipeline.
//!
//! A job is created from an ingest event (a file-system change, a URL, or a
//! manual submission), and flows through an ordered sequence of processors,
//! each execution recorded as a [`crate::StepResult`] in the job's history.

use crate::{DataBag, Id, StepResult, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Where a job originated from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Created by the file watcher.
    File,
    /// Created from a URL ingest.
    Url,
    /// Created through the HTTP API.
    Api,
    /// Created by a direct, manual call.
    Manual,
}

/// The job status state machine.
///
/// ```text
///  pending ──► processing ──► completed
///     ▲   │        │  │
///     │   │        │  └─► awaiting_input ──► processing (on resume)
///     │   │        └─► failed
///     │   └─► cancelled
///     └── reverting ──► reverted | pending (when reverting to a step)
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Scheduled but not yet picked up by the poll loop.
    Pending,
    /// A step is currently running.
    Processing,
    /// A step is waiting on human input.
    AwaitingInput,
    /// All steps completed.
    Completed,
    /// A step failed and the job could not continue.
    Failed,
    /// The job was cancelled before it could complete.
    Cancelled,
    /// A revert operation is currently undoing steps.
    Reverting,
    /// The job (or a suffix of its steps) has been fully reverted.
    Reverted,
}

impl Status {
    /// True for any status a job cannot leave on its own.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Reverted
        )
    }
}

/// Per-job configuration overrides, opaque to the core data model.
pub type JobConfig = serde_json::Map<String, Value>;

/// A unit of work flowing through the pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    /// Stable identifier.
    pub id: Id,
    /// Where the job originated from.
    pub source_type: SourceType,
    /// The file path that triggered this job, if any.
    pub source_path: Option<String>,
    /// The URL that triggered this job, if any.
    pub source_url: Option<String>,
    /// A human-readable name.
    pub name: String,
    /// Current lifecycle status.
    pub status: Status,
    /// The name of the step currently running or awaiting input, if any.
    pub current_step: Option<String>,
    /// The mutable data bag shared between steps.
    pub data: DataBag,
    /// The ordered history of step executions.
    pub history: Vec<StepResult>,
    /// Per-job configuration overrides.
    pub config: JobConfig,
    /// Free-form tags, used for filtering `list_jobs`.
    pub tags: Vec<String>,
    /// Scheduling priority; higher runs first.
    pub priority: i32,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job first left `pending`, set exactly once.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job entered a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the job was last mutated.
    pub updated_at: DateTime<Utc>,
    /// The most recent error message, if the job failed.
    pub error_message: Option<String>,
}

impl Job {
    /// Create a new, `pending` job.
    #[must_use]
    pub fn new(name: impl Into<String>, source_type: SourceType, now: DateTime<Utc>) -> Self {
        Self {
            id: Id::new(),
            source_type,
            source_path: None,
            source_url: None,
            name: name.into(),
            status: Status::Pending,
            current_step: None,
            data: DataBag::new(),
            history: Vec::new(),
            config: JobConfig::new(),
            tags: Vec::new(),
            priority: 0,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            error_message: None,
        }
    }

    /// The set of step names that have a `completed` entry in history.
    ///
    /// A step that was reverted and re-run is not a member: once reverted,
    /// its `StepResult::status` is no longer `Completed`.
    #[must_use]
    pub fn completed_steps(&self) -> HashSet<&str> {
        self.history
            .iter()
            .filter(|r| r.status == StepStatus::Completed)
            .map(|r| r.step_name.as_str())
            .collect()
    }

    /// Transition into `processing`, recording `started_at` the first time
    /// the job leaves `pending`.
    pub fn transition_to_processing(&mut self, step_name: impl Into<String>, now: DateTime<Utc>) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.status = Status::Processing;
        self.current_step = Some(step_name.into());
        self.updated_at = now;
    }

    /// Transition into `awaiting_input`.
    pub fn transition_to_awaiting_input(
        &mut self,
        step_name: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.status = Status::AwaitingInput;
        self.current_step = Some(step_name.into());
        self.updated_at = now;
    }

    /// Transition into `completed`.
    pub fn transition_to_completed(&mut self, now: DateTime<Utc>) {
        self.status = Status::Completed;
        self.current_step = None;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Transition into `failed`, recording the error message.
    pub fn transition_to_failed(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = Status::Failed;
        self.current_step = None;
        self.completed_at = Some(now);
        self.error_message = Some(message.into());
        self.updated_at = now;
    }

    /// Transition into `cancelled`.
    pub fn transition_to_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = Status::Cancelled;
        self.current_step = None;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Transition into `reverting`.
    pub fn transition_to_reverting(&mut self, now: DateTime<Utc>) {
        self.status = Status::Reverting;
        self.updated_at = now;
    }

    /// Transition into `reverted`, a terminal state.
    pub fn transition_to_reverted(&mut self, now: DateTime<Utc>) {
        self.status = Status::Reverted;
        self.current_step = None;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Transition back into `pending` with no current step, so the router
    /// re-plans from the earliest undone step. Used by `revert_to_step`.
    pub fn transition_to_pending(&mut self, now: DateTime<Utc>) {
        self.status = Status::Pending;
        self.current_step = None;
        self.updated_at = now;
    }

    /// Append a step result to the history and merge its `output_data` into
    /// the job's data bag if it completed successfully.
    pub fn push_history(&mut self, result: StepResult) {
        if result.status == StepStatus::Completed {
            self.data.merge(result.output_data.clone());
        }
        self.history.push(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StepResult;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = Job::new("test", SourceType::Manual, now());

        assert_eq!(job.status, Status::Pending);
        assert!(job.current_step.is_none());
        assert!(job.started_at.is_none());
    }

    #[test]
    fn test_started_at_set_exactly_once() {
        let mut job = Job::new("test", SourceType::Manual, now());
        let t1 = now();
        job.transition_to_processing("a", t1);

        assert_eq!(job.started_at, Some(t1));

        let t2 = now();
        job.transition_to_awaiting_input("b", t2);

        assert_eq!(job.started_at, Some(t1));
    }

    #[test]
    fn test_completed_at_set_on_terminal_transition() {
        let mut job = Job::new("test", SourceType::Manual, now());
        job.transition_to_processing("a", now());
        assert!(job.completed_at.is_none());

        job.transition_to_completed(now());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_current_step_cleared_on_terminal_transition() {
        let mut job = Job::new("test", SourceType::Manual, now());
        job.transition_to_processing("a", now());
        job.transition_to_failed("boom", now());

        assert!(job.current_step.is_none());
        assert_eq!(job.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_completed_steps_excludes_reverted() {
        let mut job = Job::new("test", SourceType::Manual, now());
        let mut a = StepResult::new("a", now());
        a.status = StepStatus::Completed;
        job.push_history(a);

        assert!(job.completed_steps().contains("a"));

        job.history[0].status = StepStatus::Reverted;
        assert!(!job.completed_steps().contains("a"));
    }
}
