//! A processor that merges a fixed set of key/value pairs into a
//! document's YAML frontmatter block.
//!
//! Grounded on [`flowline_core::Context::update_frontmatter`], which does
//! the actual parsing, merging and re-serialization; this processor is
//! just the glue between a job and that operation, and reverting it is
//! handled entirely by the context's own artifact reversal -- there's no
//! processor-specific cleanup to do.
//!
//! # Examples
//!
//! ```rust
//! use flowline_core::{Job, SourceType, Processor};
//! use flowline_processor_frontmatter_update::FrontmatterUpdate;
//! use serde_json::{json, Map};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut updates = Map::new();
//! updates.insert("status".to_owned(), json!("published"));
//!
//! let processor = FrontmatterUpdate { path: None, updates };
//! let job = Job::new("demo", SourceType::Manual, chrono::Utc::now());
//! assert!(!processor.should_process(&job).await);
//! # }
//! ```
#![deny(
    clippy::all,
    rust_2018_idioms,
    future_incompatible,
    missing_docs,
    nonstandard_style
)]
#![allow(clippy::multiple_crate_versions)]

use async_trait::async_trait;
use flowline_core::{Context, DataBag, Job, Processor, ProcessorError, StepResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

/// Merges `updates` into the target document's frontmatter block.
///
/// If `path` is unset, the job's own `source_path` is used -- the common
/// case for a job created from a watched file.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FrontmatterUpdate {
    /// The file to update. Falls back to the job's `source_path`.
    pub path: Option<String>,
    /// The key/value pairs to merge into the frontmatter block.
    pub updates: Map<String, Value>,
}

impl FrontmatterUpdate {
    fn target(&self, job: &Job) -> Option<PathBuf> {
        self.path
            .as_deref()
            .or(job.source_path.as_deref())
            .map(PathBuf::from)
    }
}

#[async_trait]
impl Processor for FrontmatterUpdate {
    fn name(&self) -> &str {
        "frontmatter-update"
    }

    fn display_name(&self) -> &str {
        "Frontmatter Update"
    }

    fn description(&self) -> &str {
        "Merges configured key/value pairs into a document's frontmatter block"
    }

    async fn should_process(&self, job: &Job) -> bool {
        matches!(self.target(job), Some(path) if Path::new(&path).exists())
    }

    async fn process(&self, job: &Job, ctx: &mut Context) -> Result<StepResult, ProcessorError> {
        let now = chrono::Utc::now();
        let path = self
            .target(job)
            .ok_or_else(|| ProcessorError::Precondition("no path configured and job has no source_path".to_owned()))?;

        let artifact = ctx.update_frontmatter(&path, self.updates.clone())?;

        let mut data = DataBag::new();
        data.set("path", json!(path.to_string_lossy()));
        data.set("frontmatter", artifact.after_state.clone().unwrap_or(Value::Null));

        let mut result = StepResult::new(self.name(), now);
        result.mark_completed(data, chrono::Utc::now());
        Ok(result)
    }

    async fn revert(&self, _job: &Job, _result: &StepResult, _ctx: &mut Context) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_core::{Id, SourceType};
    use std::fs;
    use tempfile::tempdir;

    fn ctx_for(job: &Job) -> Context {
        Context::new(job.id.clone(), Id::new())
    }

    #[tokio::test]
    async fn test_should_process_false_without_resolvable_path() {
        let job = Job::new("demo", SourceType::Manual, chrono::Utc::now());
        let processor = FrontmatterUpdate {
            path: None,
            updates: Map::new(),
        };

        assert!(!processor.should_process(&job).await);
    }

    #[tokio::test]
    async fn test_process_merges_updates_and_reports_result_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("note.md");
        fs::write(&path, "---\ntitle: Draft\n---\nbody\n").unwrap();

        let mut job = Job::new("demo", SourceType::File, chrono::Utc::now());
        job.source_path = Some(path.to_string_lossy().into_owned());

        let mut updates = Map::new();
        updates.insert("status".to_owned(), json!("done"));
        let processor = FrontmatterUpdate { path: None, updates };

        assert!(processor.should_process(&job).await);

        let mut ctx = ctx_for(&job);
        let result = processor.process(&job, &mut ctx).await.unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("status: done"));
        assert!(written.contains("title: Draft"));

        assert_eq!(
            result.output_data.get("path").and_then(Value::as_str),
            Some(path.to_string_lossy().as_ref())
        );
    }

    #[tokio::test]
    async fn test_process_fails_without_path() {
        let job = Job::new("demo", SourceType::Manual, chrono::Utc::now());
        let processor = FrontmatterUpdate {
            path: None,
            updates: Map::new(),
        };

        let mut ctx = ctx_for(&job);
        let err = processor.process(&job, &mut ctx).await.unwrap_err();
        assert!(matches!(err, ProcessorError::Precondition(_)));
    }
}
