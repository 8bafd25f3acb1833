//! A [`StepResult`] records one execution of one processor against one job.

use crate::{Artifact, DataBag, Id};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The lifecycle of a single step execution.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Created, not yet started.
    Pending,
    /// Currently executing.
    Running,
    /// Suspended, waiting on human input.
    AwaitingInput,
    /// Ran to completion successfully.
    Completed,
    /// Ran and failed.
    Failed,
    /// Not applicable to this job; never ran.
    Skipped,
    /// Completed, then later undone by a revert.
    Reverted,
}

/// One execution of one processor against one job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepResult {
    /// Stable identifier.
    pub id: Id,
    /// The job this result belongs to.
    pub job_id: Option<Id>,
    /// The processor name this result was produced by.
    pub step_name: String,
    /// Current status of this execution.
    pub status: Status,
    /// When the step started running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the step stopped running (success, failure, or skip).
    pub ended_at: Option<DateTime<Utc>>,
    /// Data merged into the job's data bag on success.
    pub output_data: DataBag,
    /// The error message, if the step failed.
    pub error_message: Option<String>,
    /// The error traceback/backtrace, if the step failed.
    pub error_traceback: Option<String>,
    /// When the step entered `awaiting_input`.
    pub awaiting_input_since: Option<DateTime<Utc>>,
    /// The user input captured on resume, if any.
    pub user_input: Option<Value>,
    /// When the step was reverted, if it was.
    pub reverted_at: Option<DateTime<Utc>>,
    /// The artifacts produced by this step, in creation order.
    pub artifacts: Vec<Id>,
    /// Why a revert attempt on this step failed, if it did.
    pub revert_error: Option<String>,
}

impl StepResult {
    /// Create a new, `pending` step result.
    #[must_use]
    pub fn new(step_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Id::new(),
            job_id: None,
            step_name: step_name.into(),
            status: Status::Pending,
            started_at: None,
            ended_at: None,
            output_data: DataBag::new(),
            error_message: None,
            error_traceback: None,
            awaiting_input_since: None,
            user_input: None,
            reverted_at: None,
            artifacts: Vec::new(),
            revert_error: None,
        }
    }

    /// Mark the result as running.
    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = Status::Running;
        self.started_at = Some(now);
    }

    /// Mark the result as awaiting input.
    pub fn mark_awaiting_input(&mut self, now: DateTime<Utc>) {
        self.status = Status::AwaitingInput;
        self.awaiting_input_since = Some(now);
    }

    /// Mark the result as completed, attaching its output data.
    pub fn mark_completed(&mut self, output_data: DataBag, now: DateTime<Utc>) {
        self.status = Status::Completed;
        self.output_data = output_data;
        self.ended_at = Some(now);
    }

    /// Mark the result as failed.
    pub fn mark_failed(
        &mut self,
        message: impl Into<String>,
        traceback: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.status = Status::Failed;
        self.error_message = Some(message.into());
        self.error_traceback = traceback;
        self.ended_at = Some(now);
    }

    /// Mark the result as skipped, recording the reason as the error message.
    pub fn mark_skipped(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = Status::Skipped;
        self.error_message = Some(reason.into());
        self.ended_at = Some(now);
    }

    /// Mark the result as reverted.
    pub fn mark_reverted(&mut self, now: DateTime<Utc>) {
        self.status = Status::Reverted;
        self.reverted_at = Some(now);
    }

    /// A step may only be reverted if it completed and every artifact it
    /// produced is itself reversible.
    #[must_use]
    pub fn can_revert(&self, artifacts: &[Artifact]) -> bool {
        self.status == Status::Completed
            && self
                .artifacts
                .iter()
                .all(|id| artifacts.iter().any(|a| &a.id == id && a.is_reversible()))
    }

    /// Elapsed duration between start and end, if both are known.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
