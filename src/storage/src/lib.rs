//! Durable persistence for jobs, step results, and artifacts, backed by a
//! single shared SQLite connection (autocommit, WAL journal).
//!
//! The schema is normalized: a job's [`flowline_core::StepResult`] history
//! and the artifacts each step produced live in their own tables, joined by
//! foreign key, rather than embedded as nested JSON inside the job row. See
//! [`JobStore`], [`StepResultStore`] and [`ArtifactStore`].

#![deny(
    clippy::all,
    rust_2018_idioms,
    future_incompatible,
    missing_docs,
    nonstandard_style
)]
#![allow(clippy::multiple_crate_versions)]

#[macro_use]
extern crate diesel;
#[macro_use]
extern crate diesel_migrations;

mod artifact_store;
mod database;
mod error;
mod job_store;
mod models;
mod schema;
mod step_result_store;

pub use artifact_store::ArtifactStore;
pub use database::{Database, DatabasePool};
pub use error::StorageError;
pub use job_store::JobStore;
pub use step_result_store::StepResultStore;
