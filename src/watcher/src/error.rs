//! Errors a watcher operation can fail with.

use std::{error, fmt};

/// Errors [`crate::Watcher`] operations can fail with.
#[derive(Debug)]
pub enum WatcherError {
    /// The underlying OS file-notification backend could not be created, or
    /// failed while registering a watched directory.
    Notify(notify::Error),

    #[doc(hidden)]
    __Unknown,
}

impl fmt::Display for WatcherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Notify(err) => write!(f, "file notification backend error: {}", err),
            Self::__Unknown => unreachable!(),
        }
    }
}

impl error::Error for WatcherError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Notify(err) => Some(err),
            Self::__Unknown => unreachable!(),
        }
    }
}

impl From<notify::Error> for WatcherError {
    fn from(err: notify::Error) -> Self {
        Self::Notify(err)
    }
}
