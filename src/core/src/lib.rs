//! # flowline
//!
//! flowline is a resumable, reversible document-processing pipeline. Ingest
//! events (file-system changes, URLs, manual submissions) create jobs; each
//! job flows through an ordered sequence of processors (plugins) whose side
//! effects (file writes, frontmatter edits, external API calls) are recorded
//! as artifacts so that any completed step -- or an entire job -- can be
//! undone.
//!
//! flowline consists of several crates:
//!
//! * `flowline-core` (this one) -- the data model, the [`Processor`]
//!   contract, and the [`Context`] used to record and undo side effects.
//! * `flowline-registry` -- registers processors and topologically orders
//!   them by dependency.
//! * `flowline-router` -- picks the next runnable step for a job.
//! * `flowline-executor` -- runs a single step inside an execution context.
//! * `flowline-pipeline` -- the orchestrator: lifecycle events, the poll
//!   loop, and the file-watcher bridge.
//! * `flowline-storage` -- durable persistence for jobs, step results and
//!   artifacts.
//! * `flowline-watcher` -- a debounced, multi-directory file watcher that
//!   synthesizes job-creation events.
//!
//! If you want to write your own processor, see the [`Processor`] trait.

#![deny(
    clippy::all,
    rust_2018_idioms,
    future_incompatible,
    missing_docs,
    nonstandard_style
)]
#![allow(clippy::multiple_crate_versions)]

mod artifact;
mod context;
mod databag;
mod id;
mod job;
mod processor;
mod step;

pub use artifact::{Artifact, ArtifactStatus, ArtifactType, Reversibility};
pub use context::{ApiCallKind, Context, ContextError, Encoding, RevertOutcome, revert_artifact};
pub use databag::DataBag;
pub use id::Id;
pub use job::{Job, JobConfig, SourceType, Status as JobStatus};
pub use processor::{Processor, ProcessorError, RequiresInput};
pub use step::{Status as StepStatus, StepResult};
