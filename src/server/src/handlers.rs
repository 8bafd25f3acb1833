//! REST command shell: create, list, inspect and drive jobs.
//!
//! This is intentionally thin -- the pipeline is the one place job state
//! actually changes. Every handler here just validates its input, calls a
//! [`flowline_pipeline::Pipeline`] method, and serializes whatever comes
//! back.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use flowline_core::{Id, JobConfig, JobStatus, SourceType};
use flowline_pipeline::PipelineError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// See: <https://tools.ietf.org/html/draft-inadarei-api-health-check-03>
#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum Status {
    Pass,
}

pub(crate) async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": Status::Pass }))
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateJobRequest {
    name: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    config: JobConfig,
}

pub(crate) async fn create_job(
    pipeline: web::Data<AppState>,
    body: web::Json<CreateJobRequest>,
) -> HttpResponse {
    let body = body.into_inner();
    match pipeline.create_job(body.name, SourceType::Api, body.tags, body.priority, body.config) {
        Ok(job) => HttpResponse::Created().json(job),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListJobsQuery {
    status: Option<JobStatus>,
    tag: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    50
}

pub(crate) async fn list_jobs(pipeline: web::Data<AppState>, query: web::Query<ListJobsQuery>) -> HttpResponse {
    let query = query.into_inner();
    match pipeline.list_jobs(query.status, query.tag.as_deref(), query.limit, query.offset) {
        Ok(jobs) => HttpResponse::Ok().json(jobs),
        Err(err) => error_response(&err),
    }
}

pub(crate) async fn get_job(pipeline: web::Data<AppState>, id: web::Path<String>) -> HttpResponse {
    let id = Id::from_string(id.into_inner());
    match pipeline.get_job(&id) {
        Ok(Some(job)) => HttpResponse::Ok().json(job),
        Ok(None) => not_found(&id),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResumeJobRequest {
    input: Value,
}

pub(crate) async fn resume_job(
    pipeline: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<ResumeJobRequest>,
) -> HttpResponse {
    let id = Id::from_string(id.into_inner());
    match pipeline.resume_job(&id, body.into_inner().input).await {
        Ok(job) => HttpResponse::Ok().json(job),
        Err(err) => error_response(&err),
    }
}

pub(crate) async fn cancel_job(pipeline: web::Data<AppState>, id: web::Path<String>) -> HttpResponse {
    let id = Id::from_string(id.into_inner());
    match pipeline.cancel_job(&id) {
        Ok(job) => HttpResponse::Ok().json(job),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RevertJobRequest {
    to_step: Option<String>,
}

pub(crate) async fn revert_job(
    pipeline: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<RevertJobRequest>,
) -> HttpResponse {
    let id = Id::from_string(id.into_inner());
    match pipeline.revert_job(&id, body.to_step.as_deref()).await {
        Ok(job) => HttpResponse::Ok().json(job),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeleteJobQuery {
    #[serde(default)]
    revert_first: bool,
}

pub(crate) async fn delete_job(
    pipeline: web::Data<AppState>,
    id: web::Path<String>,
    query: web::Query<DeleteJobQuery>,
) -> HttpResponse {
    let id = Id::from_string(id.into_inner());
    match pipeline.delete_job(&id, query.revert_first).await {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(err) => error_response(&err),
    }
}

fn not_found(id: &Id) -> HttpResponse {
    HttpResponse::NotFound().json(json!({ "error": format!("job `{}` not found", id) }))
}

fn error_response(err: &PipelineError) -> HttpResponse {
    match err {
        PipelineError::JobNotFound(id) => HttpResponse::NotFound().json(json!({ "error": err.to_string(), "job_id": id })),
        _ => {
            tracing::error!(error = %err, "request failed");
            HttpResponse::InternalServerError().json(json!({ "error": err.to_string() }))
        }
    }
}
