//! Errors a storage operation can fail with.

use std::{error, fmt};

/// Errors a [`crate::Database`] or store operation can fail with.
#[derive(Debug)]
pub enum StorageError {
    /// A connection could not be checked out of the pool.
    Pool(r2d2::Error),
    /// The underlying SQL query failed.
    Query(diesel::result::Error),
    /// A JSON column could not be (de)serialized.
    Json(serde_json::Error),
    /// A row held a value (e.g. an enum string) that is no longer valid.
    Corrupt(String),
    /// The referenced row does not exist.
    NotFound,

    #[doc(hidden)]
    __Unknown,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pool(err) => write!(f, "database pool error: {}", err),
            Self::Query(err) => write!(f, "database query error: {}", err),
            Self::Json(err) => write!(f, "JSON (de)serialization error: {}", err),
            Self::Corrupt(msg) => write!(f, "corrupt row: {}", msg),
            Self::NotFound => write!(f, "row not found"),
            Self::__Unknown => unreachable!(),
        }
    }
}

impl error::Error for StorageError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Pool(err) => Some(err),
            Self::Query(err) => Some(err),
            Self::Json(err) => Some(err),
            Self::Corrupt(_) | Self::NotFound => None,
            Self::__Unknown => unreachable!(),
        }
    }
}

impl From<r2d2::Error> for StorageError {
    fn from(err: r2d2::Error) -> Self {
        Self::Pool(err)
    }
}

impl From<diesel::result::Error> for StorageError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => Self::NotFound,
            err => Self::Query(err),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}
