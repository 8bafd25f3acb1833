//! Shared application state handed to every request handler.

use flowline_pipeline::Pipeline;
use std::sync::Arc;

/// The single [`Pipeline`] instance the whole server process drives.
pub(crate) type AppState = Arc<Pipeline>;
