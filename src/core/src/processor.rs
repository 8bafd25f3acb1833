//! The [`Processor`] trait is the black-box boundary between the pipeline
//! and a plugin. Implementing it makes a processor runnable by
//! `flowline-executor` and orderable by `flowline-registry`.

use crate::{Context, Job, StepResult};
use async_trait::async_trait;
use serde_json::Value;
use std::{error, fmt};

/// When a processor needs to suspend a job for human input.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequiresInput {
    /// Never suspends for input.
    Never,
    /// Always suspends for input before running.
    Always,
    /// Suspends for input only if `requires_user_input` returns true.
    Conditional,
}

/// The main trait to implement when creating a new flowline processor.
///
/// A processor is a stateless, named unit of work. The pipeline looks up
/// processors by name, orders them by their declared `requires`, and
/// drives them one at a time via [`Processor::process`].
#[async_trait]
pub trait Processor: fmt::Debug + Send + Sync {
    /// The unique name used to register and reference this processor.
    fn name(&self) -> &str;

    /// A human-formatted name, for display purposes.
    fn display_name(&self) -> &str {
        self.name()
    }

    /// A short description of what the processor does.
    fn description(&self) -> &str {
        ""
    }

    /// The processor's semantic version.
    fn version(&self) -> &str {
        "0.1.0"
    }

    /// The names of processors that must complete before this one can run.
    fn requires(&self) -> &[String] {
        &[]
    }

    /// Whether this processor exposes a UI panel.
    fn has_ui(&self) -> bool {
        false
    }

    /// When this processor suspends a job for human input.
    fn requires_input(&self) -> RequiresInput {
        RequiresInput::Never
    }

    /// Whether a step for this processor may be marked `skipped` by the
    /// router/executor instead of running.
    fn can_skip(&self) -> bool {
        true
    }

    /// Whether the executor should automatically roll back this
    /// processor's artifacts when `process` fails.
    fn auto_revert_on_error(&self) -> bool {
        true
    }

    /// Advisory maximum number of jobs that may run this processor
    /// concurrently. Not enforced by this crate; see the project's design
    /// notes.
    fn max_concurrent(&self) -> Option<u32> {
        None
    }

    /// Whether this processor applies to the given job.
    async fn should_process(&self, job: &Job) -> bool;

    /// Run the processor against `job`, recording any side effects through
    /// `ctx`.
    ///
    /// # Errors
    ///
    /// Returns a [`ProcessorError`] if the processor could not complete. The
    /// executor marks the step `failed`, and -- if
    /// [`Processor::auto_revert_on_error`] is true -- rolls back any
    /// artifacts already recorded on `ctx`.
    async fn process(&self, job: &Job, ctx: &mut Context) -> Result<StepResult, ProcessorError>;

    /// Undo any processor-specific side effect not covered by `ctx`'s
    /// artifact reversal (e.g. closing out an external ticket). Returns
    /// `true` on success.
    async fn revert(&self, job: &Job, result: &StepResult, ctx: &mut Context) -> bool;

    /// Whether, given the current job state, a `conditional`
    /// `requires_input` processor should suspend for input. Only consulted
    /// when [`Processor::requires_input`] is [`RequiresInput::Conditional`].
    async fn requires_user_input(&self, _job: &Job) -> bool {
        false
    }

    /// Validate user-provided input before resuming a suspended step.
    ///
    /// Returns `(true, None)` if valid, or `(false, Some(reason))` if not.
    async fn validate_input(&self, _job: &Job, _input: &Value) -> (bool, Option<String>) {
        (true, None)
    }

    /// An optional JSON schema describing the input this processor expects.
    fn get_input_schema(&self, _job: &Job) -> Option<Value> {
        None
    }

    /// Called once, after the processor is registered.
    fn on_load(&self) {}

    /// Called once, before the processor is unregistered.
    fn on_unload(&self) {}
}

/// Errors a [`Processor::process`] implementation can return.
#[derive(Debug)]
pub enum ProcessorError {
    /// A precondition the processor depends on was not met (e.g. a required
    /// file missing).
    Precondition(String),
    /// The processor's own logic failed.
    Failed(String),
    /// An I/O error occurred.
    Io(std::io::Error),
    /// The execution context reported an error recording an artifact.
    Context(crate::ContextError),

    #[doc(hidden)]
    __Unknown,
}

impl fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Precondition(msg) => write!(f, "precondition violation: {}", msg),
            Self::Failed(msg) => write!(f, "processor failed: {}", msg),
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Context(err) => write!(f, "execution context error: {}", err),
            Self::__Unknown => unreachable!(),
        }
    }
}

impl error::Error for ProcessorError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Context(err) => Some(err),
            Self::Precondition(_) | Self::Failed(_) => None,
            Self::__Unknown => unreachable!(),
        }
    }
}

impl From<std::io::Error> for ProcessorError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<crate::ContextError> for ProcessorError {
    fn from(err: crate::ContextError) -> Self {
        Self::Context(err)
    }
}
