//! An [`Artifact`] records one tracked side effect of a step, carrying
//! enough before/after state to undo it.

use crate::Id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The kind of side effect an artifact tracks.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    /// A file was created.
    FileCreate,
    /// A file was overwritten.
    FileModify,
    /// A file was removed.
    FileDelete,
    /// A file was renamed/moved.
    FileMove,
    /// A frontmatter block in a file was shallow-merged.
    FrontmatterUpdate,
    /// An external resource was created via an API call.
    ExternalApiCreate,
    /// An external resource was modified via an API call.
    ExternalApiModify,
    /// Purely informational; no undoable side effect.
    Metadata,
}

/// The current lifecycle state of an artifact.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    /// Buffered in an execution context, not yet committed.
    Pending,
    /// Committed to storage; the side effect took place.
    Created,
    /// Successfully undone.
    Reverted,
    /// A revert attempt on this artifact failed.
    Failed,
    /// The artifact's target disappeared outside of flowline's control.
    Orphaned,
    /// This artifact can never be undone.
    Irreversible,
}

/// How much of an artifact's effect can be undone.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reversibility {
    /// The effect can be fully undone.
    Fully,
    /// Only part of the effect can be undone.
    Partially,
    /// The effect cannot be undone at all.
    Irreversible,
    /// Undoing the effect requires a person to act.
    Manual,
}

/// One recorded side effect of a step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Artifact {
    /// Stable identifier.
    pub id: Id,
    /// The job this artifact belongs to.
    pub job_id: Option<Id>,
    /// The step result this artifact belongs to.
    pub step_result_id: Option<Id>,
    /// The kind of side effect recorded.
    pub artifact_type: ArtifactType,
    /// The file path, or `"service:action"` for external calls.
    pub target: String,
    /// Opaque payload describing the state before the effect, if needed to
    /// undo it.
    pub before_state: Option<Value>,
    /// Opaque payload describing the state after the effect.
    pub after_state: Option<Value>,
    /// Free-form metadata attached to the artifact.
    pub metadata: Map<String, Value>,
    /// Current lifecycle status.
    pub status: ArtifactStatus,
    /// How much of the effect can be undone.
    pub reversibility: Reversibility,
    /// When the artifact was created.
    pub created_at: DateTime<Utc>,
    /// When the artifact was last mutated.
    pub updated_at: DateTime<Utc>,
    /// The error message from a failed revert attempt, if any.
    pub error_message: Option<String>,
}

impl Artifact {
    /// Create a new, `pending` artifact.
    #[must_use]
    pub fn new(
        id: Id,
        job_id: Option<Id>,
        artifact_type: ArtifactType,
        target: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            job_id,
            step_result_id: None,
            artifact_type,
            target: target.into(),
            before_state: None,
            after_state: None,
            metadata: Map::new(),
            status: ArtifactStatus::Pending,
            reversibility: Reversibility::Fully,
            created_at: now,
            updated_at: now,
            error_message: None,
        }
    }

    /// An artifact is reversible iff it has been committed and is not marked
    /// irreversible.
    #[must_use]
    pub fn is_reversible(&self) -> bool {
        self.status == ArtifactStatus::Created && self.reversibility != Reversibility::Irreversible
    }

    /// Mark the artifact committed.
    pub fn mark_created(&mut self, now: DateTime<Utc>) {
        self.status = ArtifactStatus::Created;
        self.updated_at = now;
    }

    /// Mark the artifact reverted.
    pub fn mark_reverted(&mut self, now: DateTime<Utc>) {
        self.status = ArtifactStatus::Reverted;
        self.updated_at = now;
    }

    /// Mark the artifact's revert as failed, recording why.
    pub fn mark_failed(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = ArtifactStatus::Failed;
        self.error_message = Some(message.into());
        self.updated_at = now;
    }

    /// Mark the artifact orphaned: its target vanished outside of our
    /// control, so the revert is treated as a (warned) no-op success.
    pub fn mark_orphaned(&mut self, now: DateTime<Utc>) {
        self.status = ArtifactStatus::Orphaned;
        self.updated_at = now;
    }
}
