//! Row representations of the core domain types, and the plain-string
//! encodings used for enum columns (SQLite has no native enum type, unlike
//! the Postgres-backed enums this crate's ancestor used).

use crate::schema::{artifacts, jobs, step_results};
use crate::StorageError;
use chrono::{DateTime, NaiveDateTime, Utc};
use flowline_core::{
    Artifact, ArtifactStatus, ArtifactType, DataBag, Id, Job, JobConfig, JobStatus, Reversibility,
    SourceType, StepResult, StepStatus,
};
use serde_json::{Map, Value};

fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
    dt.naive_utc()
}

fn from_naive(naive: NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_utc(naive, Utc)
}

fn source_type_to_str(v: SourceType) -> &'static str {
    match v {
        SourceType::File => "file",
        SourceType::Url => "url",
        SourceType::Api => "api",
        SourceType::Manual => "manual",
    }
}

fn source_type_from_str(s: &str) -> Result<SourceType, StorageError> {
    match s {
        "file" => Ok(SourceType::File),
        "url" => Ok(SourceType::Url),
        "api" => Ok(SourceType::Api),
        "manual" => Ok(SourceType::Manual),
        other => Err(StorageError::Corrupt(format!("unknown source_type `{}`", other))),
    }
}

pub(crate) fn job_status_to_str(v: JobStatus) -> &'static str {
    match v {
        JobStatus::Pending => "pending",
        JobStatus::Processing => "processing",
        JobStatus::AwaitingInput => "awaiting_input",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
        JobStatus::Reverting => "reverting",
        JobStatus::Reverted => "reverted",
    }
}

fn job_status_from_str(s: &str) -> Result<JobStatus, StorageError> {
    match s {
        "pending" => Ok(JobStatus::Pending),
        "processing" => Ok(JobStatus::Processing),
        "awaiting_input" => Ok(JobStatus::AwaitingInput),
        "completed" => Ok(JobStatus::Completed),
        "failed" => Ok(JobStatus::Failed),
        "cancelled" => Ok(JobStatus::Cancelled),
        "reverting" => Ok(JobStatus::Reverting),
        "reverted" => Ok(JobStatus::Reverted),
        other => Err(StorageError::Corrupt(format!("unknown job status `{}`", other))),
    }
}

fn step_status_to_str(v: StepStatus) -> &'static str {
    match v {
        StepStatus::Pending => "pending",
        StepStatus::Running => "running",
        StepStatus::AwaitingInput => "awaiting_input",
        StepStatus::Completed => "completed",
        StepStatus::Failed => "failed",
        StepStatus::Skipped => "skipped",
        StepStatus::Reverted => "reverted",
    }
}

fn step_status_from_str(s: &str) -> Result<StepStatus, StorageError> {
    match s {
        "pending" => Ok(StepStatus::Pending),
        "running" => Ok(StepStatus::Running),
        "awaiting_input" => Ok(StepStatus::AwaitingInput),
        "completed" => Ok(StepStatus::Completed),
        "failed" => Ok(StepStatus::Failed),
        "skipped" => Ok(StepStatus::Skipped),
        "reverted" => Ok(StepStatus::Reverted),
        other => Err(StorageError::Corrupt(format!("unknown step status `{}`", other))),
    }
}

fn artifact_type_to_str(v: ArtifactType) -> &'static str {
    match v {
        ArtifactType::FileCreate => "file_create",
        ArtifactType::FileModify => "file_modify",
        ArtifactType::FileDelete => "file_delete",
        ArtifactType::FileMove => "file_move",
        ArtifactType::FrontmatterUpdate => "frontmatter_update",
        ArtifactType::ExternalApiCreate => "external_api_create",
        ArtifactType::ExternalApiModify => "external_api_modify",
        ArtifactType::Metadata => "metadata",
    }
}

fn artifact_type_from_str(s: &str) -> Result<ArtifactType, StorageError> {
    match s {
        "file_create" => Ok(ArtifactType::FileCreate),
        "file_modify" => Ok(ArtifactType::FileModify),
        "file_delete" => Ok(ArtifactType::FileDelete),
        "file_move" => Ok(ArtifactType::FileMove),
        "frontmatter_update" => Ok(ArtifactType::FrontmatterUpdate),
        "external_api_create" => Ok(ArtifactType::ExternalApiCreate),
        "external_api_modify" => Ok(ArtifactType::ExternalApiModify),
        "metadata" => Ok(ArtifactType::Metadata),
        other => Err(StorageError::Corrupt(format!("unknown artifact_type `{}`", other))),
    }
}

pub(crate) fn artifact_status_to_str(v: ArtifactStatus) -> &'static str {
    match v {
        ArtifactStatus::Pending => "pending",
        ArtifactStatus::Created => "created",
        ArtifactStatus::Reverted => "reverted",
        ArtifactStatus::Failed => "failed",
        ArtifactStatus::Orphaned => "orphaned",
        ArtifactStatus::Irreversible => "irreversible",
    }
}

fn artifact_status_from_str(s: &str) -> Result<ArtifactStatus, StorageError> {
    match s {
        "pending" => Ok(ArtifactStatus::Pending),
        "created" => Ok(ArtifactStatus::Created),
        "reverted" => Ok(ArtifactStatus::Reverted),
        "failed" => Ok(ArtifactStatus::Failed),
        "orphaned" => Ok(ArtifactStatus::Orphaned),
        "irreversible" => Ok(ArtifactStatus::Irreversible),
        other => Err(StorageError::Corrupt(format!("unknown artifact status `{}`", other))),
    }
}

pub(crate) fn reversibility_to_str(v: Reversibility) -> &'static str {
    match v {
        Reversibility::Fully => "fully",
        Reversibility::Partially => "partially",
        Reversibility::Irreversible => "irreversible",
        Reversibility::Manual => "manual",
    }
}

fn reversibility_from_str(s: &str) -> Result<Reversibility, StorageError> {
    match s {
        "fully" => Ok(Reversibility::Fully),
        "partially" => Ok(Reversibility::Partially),
        "irreversible" => Ok(Reversibility::Irreversible),
        "manual" => Ok(Reversibility::Manual),
        other => Err(StorageError::Corrupt(format!("unknown reversibility `{}`", other))),
    }
}

#[derive(Queryable, Debug, Clone)]
pub(crate) struct JobRow {
    pub id: String,
    pub source_type: String,
    pub source_path: Option<String>,
    pub source_url: Option<String>,
    pub name: String,
    pub status: String,
    pub current_step: Option<String>,
    pub data: String,
    pub config: String,
    pub tags: String,
    pub priority: i32,
    pub created_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub updated_at: NaiveDateTime,
    pub error_message: Option<String>,
}

#[derive(Insertable, AsChangeset, Debug)]
#[table_name = "jobs"]
pub(crate) struct NewJobRow {
    pub id: String,
    pub source_type: String,
    pub source_path: Option<String>,
    pub source_url: Option<String>,
    pub name: String,
    pub status: String,
    pub current_step: Option<String>,
    pub data: String,
    pub config: String,
    pub tags: String,
    pub priority: i32,
    pub created_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub updated_at: NaiveDateTime,
    pub error_message: Option<String>,
}

impl NewJobRow {
    pub(crate) fn from_job(job: &Job) -> Result<Self, StorageError> {
        Ok(Self {
            id: job.id.as_str().to_owned(),
            source_type: source_type_to_str(job.source_type).to_owned(),
            source_path: job.source_path.clone(),
            source_url: job.source_url.clone(),
            name: job.name.clone(),
            status: job_status_to_str(job.status).to_owned(),
            current_step: job.current_step.clone(),
            data: serde_json::to_string(&job.data)?,
            config: serde_json::to_string(&job.config)?,
            tags: serde_json::to_string(&job.tags)?,
            priority: job.priority,
            created_at: to_naive(job.created_at),
            started_at: job.started_at.map(to_naive),
            completed_at: job.completed_at.map(to_naive),
            updated_at: to_naive(job.updated_at),
            error_message: job.error_message.clone(),
        })
    }
}

impl JobRow {
    /// Reassemble a [`Job`], given its history loaded separately (jobs and
    /// step results are normalized into separate tables).
    pub(crate) fn into_job(self, history: Vec<StepResult>) -> Result<Job, StorageError> {
        let data: Map<String, Value> = serde_json::from_str(&self.data)?;
        let config: JobConfig = serde_json::from_str(&self.config)?;
        let tags: Vec<String> = serde_json::from_str(&self.tags)?;

        Ok(Job {
            id: Id::from_string(self.id),
            source_type: source_type_from_str(&self.source_type)?,
            source_path: self.source_path,
            source_url: self.source_url,
            name: self.name,
            status: job_status_from_str(&self.status)?,
            current_step: self.current_step,
            data: DataBag::from(data),
            history,
            config,
            tags,
            priority: self.priority,
            created_at: from_naive(self.created_at),
            started_at: self.started_at.map(from_naive),
            completed_at: self.completed_at.map(from_naive),
            updated_at: from_naive(self.updated_at),
            error_message: self.error_message,
        })
    }
}

#[derive(Queryable, Debug, Clone)]
pub(crate) struct StepResultRow {
    pub id: String,
    pub job_id: String,
    pub step_name: String,
    pub status: String,
    pub started_at: Option<NaiveDateTime>,
    pub ended_at: Option<NaiveDateTime>,
    pub output_data: String,
    pub error_message: Option<String>,
    pub error_traceback: Option<String>,
    pub awaiting_input_since: Option<NaiveDateTime>,
    pub user_input: Option<String>,
    pub reverted_at: Option<NaiveDateTime>,
    pub artifacts: String,
    pub revert_error: Option<String>,
    pub position: i32,
}

#[derive(Insertable, AsChangeset, Debug)]
#[table_name = "step_results"]
pub(crate) struct NewStepResultRow {
    pub id: String,
    pub job_id: String,
    pub step_name: String,
    pub status: String,
    pub started_at: Option<NaiveDateTime>,
    pub ended_at: Option<NaiveDateTime>,
    pub output_data: String,
    pub error_message: Option<String>,
    pub error_traceback: Option<String>,
    pub awaiting_input_since: Option<NaiveDateTime>,
    pub user_input: Option<String>,
    pub reverted_at: Option<NaiveDateTime>,
    pub artifacts: String,
    pub revert_error: Option<String>,
    pub position: i32,
}

impl NewStepResultRow {
    pub(crate) fn from_step_result(
        job_id: &Id,
        position: usize,
        result: &StepResult,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            id: result.id.as_str().to_owned(),
            job_id: job_id.as_str().to_owned(),
            step_name: result.step_name.clone(),
            status: step_status_to_str(result.status).to_owned(),
            started_at: result.started_at.map(to_naive),
            ended_at: result.ended_at.map(to_naive),
            output_data: serde_json::to_string(&result.output_data)?,
            error_message: result.error_message.clone(),
            error_traceback: result.error_traceback.clone(),
            awaiting_input_since: result.awaiting_input_since.map(to_naive),
            user_input: result
                .user_input
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            reverted_at: result.reverted_at.map(to_naive),
            artifacts: serde_json::to_string(&result.artifacts)?,
            revert_error: result.revert_error.clone(),
            #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
            position: position as i32,
        })
    }
}

impl StepResultRow {
    pub(crate) fn into_step_result(self) -> Result<StepResult, StorageError> {
        let output_data: Map<String, Value> = serde_json::from_str(&self.output_data)?;
        let user_input: Option<Value> = self.user_input.map(|raw| serde_json::from_str(&raw)).transpose()?;
        let artifacts: Vec<Id> = serde_json::from_str(&self.artifacts)?;

        Ok(StepResult {
            id: Id::from_string(self.id),
            job_id: Some(Id::from_string(self.job_id)),
            step_name: self.step_name,
            status: step_status_from_str(&self.status)?,
            started_at: self.started_at.map(from_naive),
            ended_at: self.ended_at.map(from_naive),
            output_data: DataBag::from(output_data),
            error_message: self.error_message,
            error_traceback: self.error_traceback,
            awaiting_input_since: self.awaiting_input_since.map(from_naive),
            user_input,
            reverted_at: self.reverted_at.map(from_naive),
            artifacts,
            revert_error: self.revert_error,
        })
    }
}

#[derive(Queryable, Debug, Clone)]
pub(crate) struct ArtifactRow {
    pub id: String,
    pub job_id: Option<String>,
    pub step_result_id: Option<String>,
    pub artifact_type: String,
    pub target: String,
    pub before_state: Option<String>,
    pub after_state: Option<String>,
    pub metadata: String,
    pub status: String,
    pub reversibility: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub error_message: Option<String>,
}

#[derive(Insertable, AsChangeset, Debug)]
#[table_name = "artifacts"]
pub(crate) struct NewArtifactRow {
    pub id: String,
    pub job_id: Option<String>,
    pub step_result_id: Option<String>,
    pub artifact_type: String,
    pub target: String,
    pub before_state: Option<String>,
    pub after_state: Option<String>,
    pub metadata: String,
    pub status: String,
    pub reversibility: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub error_message: Option<String>,
}

impl NewArtifactRow {
    pub(crate) fn from_artifact(artifact: &Artifact) -> Result<Self, StorageError> {
        Ok(Self {
            id: artifact.id.as_str().to_owned(),
            job_id: artifact.job_id.as_ref().map(|id| id.as_str().to_owned()),
            step_result_id: artifact.step_result_id.as_ref().map(|id| id.as_str().to_owned()),
            artifact_type: artifact_type_to_str(artifact.artifact_type).to_owned(),
            target: artifact.target.clone(),
            before_state: artifact
                .before_state
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            after_state: artifact
                .after_state
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            metadata: serde_json::to_string(&artifact.metadata)?,
            status: artifact_status_to_str(artifact.status).to_owned(),
            reversibility: reversibility_to_str(artifact.reversibility).to_owned(),
            created_at: to_naive(artifact.created_at),
            updated_at: to_naive(artifact.updated_at),
            error_message: artifact.error_message.clone(),
        })
    }
}

impl ArtifactRow {
    pub(crate) fn into_artifact(self) -> Result<Artifact, StorageError> {
        let before_state: Option<Value> = self.before_state.map(|raw| serde_json::from_str(&raw)).transpose()?;
        let after_state: Option<Value> = self.after_state.map(|raw| serde_json::from_str(&raw)).transpose()?;
        let metadata: Map<String, Value> = serde_json::from_str(&self.metadata)?;

        Ok(Artifact {
            id: Id::from_string(self.id),
            job_id: self.job_id.map(Id::from_string),
            step_result_id: self.step_result_id.map(Id::from_string),
            artifact_type: artifact_type_from_str(&self.artifact_type)?,
            target: self.target,
            before_state,
            after_state,
            metadata,
            status: artifact_status_from_str(&self.status)?,
            reversibility: reversibility_from_str(&self.reversibility)?,
            created_at: from_naive(self.created_at),
            updated_at: from_naive(self.updated_at),
            error_message: self.error_message,
        })
    }
}
