//! Errors a pipeline operation can fail with.

use flowline_executor::ExecutorError;
use flowline_registry::RegistryError;
use flowline_storage::StorageError;
use flowline_watcher::WatcherError;
use std::{error, fmt, io};

/// Errors [`crate::Pipeline`] operations can fail with.
#[derive(Debug)]
pub enum PipelineError {
    /// A storage operation failed.
    Storage(StorageError),
    /// An executor operation failed.
    Executor(ExecutorError),
    /// Registering a loaded processor failed.
    Registry(RegistryError),
    /// The file watcher could not be started.
    Watcher(WatcherError),
    /// A plugin manifest could not be read.
    Io(io::Error),
    /// A plugin manifest could not be parsed.
    Manifest(serde_json::Error),
    /// A plugin directory named a processor class no compiled-in factory
    /// provides.
    UnknownProcessorClass(String),
    /// A command named a job id the store has no record of.
    JobNotFound(String),

    #[doc(hidden)]
    __Unknown,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(err) => write!(f, "storage error: {}", err),
            Self::Executor(err) => write!(f, "executor error: {}", err),
            Self::Registry(err) => write!(f, "registry error: {}", err),
            Self::Watcher(err) => write!(f, "watcher error: {}", err),
            Self::Io(err) => write!(f, "could not read plugin manifest: {}", err),
            Self::Manifest(err) => write!(f, "could not parse plugin manifest: {}", err),
            Self::UnknownProcessorClass(name) => {
                write!(f, "no compiled-in factory for processor class `{}`", name)
            }
            Self::JobNotFound(id) => write!(f, "job `{}` not found", id),
            Self::__Unknown => unreachable!(),
        }
    }
}

impl error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            Self::Executor(err) => Some(err),
            Self::Registry(err) => Some(err),
            Self::Watcher(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Manifest(err) => Some(err),
            Self::UnknownProcessorClass(_) | Self::JobNotFound(_) => None,
            Self::__Unknown => unreachable!(),
        }
    }
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl From<ExecutorError> for PipelineError {
    fn from(err: ExecutorError) -> Self {
        Self::Executor(err)
    }
}

impl From<RegistryError> for PipelineError {
    fn from(err: RegistryError) -> Self {
        Self::Registry(err)
    }
}

impl From<WatcherError> for PipelineError {
    fn from(err: WatcherError) -> Self {
        Self::Watcher(err)
    }
}

impl From<io::Error> for PipelineError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Manifest(err)
    }
}
