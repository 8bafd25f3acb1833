//! Errors an executor operation can fail with.

use flowline_storage::StorageError;
use std::{error, fmt};

/// Errors [`crate::Executor`] operations can fail with.
#[derive(Debug)]
pub enum ExecutorError {
    /// `execute_step`/`resume_step` named a processor the registry doesn't
    /// have.
    UnknownProcessor(String),
    /// `resume_step` was called for a step whose most recent result is not
    /// `awaiting_input`.
    StepNotAwaitingInput(String),
    /// The processor rejected the input given to `resume_step`.
    InvalidInput(String),
    /// `revert_step` was asked to undo a step that either never ran,
    /// didn't complete, or has an irreversible artifact.
    StepNotRevertable(String),
    /// A storage operation failed.
    Storage(StorageError),

    #[doc(hidden)]
    __Unknown,
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownProcessor(name) => write!(f, "processor `{}` is not registered", name),
            Self::StepNotAwaitingInput(name) => {
                write!(f, "step `{}` is not awaiting input", name)
            }
            Self::InvalidInput(reason) => write!(f, "invalid input: {}", reason),
            Self::StepNotRevertable(name) => write!(f, "step `{}` cannot be reverted", name),
            Self::Storage(err) => write!(f, "storage error: {}", err),
            Self::__Unknown => unreachable!(),
        }
    }
}

impl error::Error for ExecutorError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            Self::UnknownProcessor(_)
            | Self::StepNotAwaitingInput(_)
            | Self::InvalidInput(_)
            | Self::StepNotRevertable(_) => None,
            Self::__Unknown => unreachable!(),
        }
    }
}

impl From<StorageError> for ExecutorError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}
