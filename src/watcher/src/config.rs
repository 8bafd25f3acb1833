//! Per-directory watch configuration.

use serde_json::{Map, Value};
use std::path::PathBuf;

/// Default ignore patterns applied to every watch in addition to its own.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] =
    &[".DS_Store", "*.swp", "*~", ".git/*", "*.tmp"];

/// The kind of filesystem change that produced a [`crate::WatchEvent`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChangeKind {
    /// A file appeared that the watch's "seen set" had not observed before.
    Created,
    /// A file already in the watch's "seen set" changed.
    Modified,
    /// A file vanished.
    Deleted,
    /// A file was renamed or relocated within a watched tree.
    Moved,
}

impl ChangeKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Moved => "moved",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration for a single watched directory.
///
/// The `source_*` fields describe the job the pipeline should create when
/// this watch fires a matching event; the watcher itself never touches the
/// job store, it only carries these values along on [`crate::WatchEvent`].
#[derive(Clone, Debug)]
pub struct WatchConfig {
    /// Absolute path of the directory to watch.
    pub path: PathBuf,
    /// Human-readable name, used in logs and as a default job tag.
    pub name: String,
    /// Glob patterns a file must match at least one of to be picked up.
    pub patterns: Vec<String>,
    /// Glob patterns checked first, against both the filename and the full
    /// path; a match on either suppresses the event.
    pub ignore_patterns: Vec<String>,
    /// Whether subdirectories are watched too.
    pub recursive: bool,
    /// Which change kinds this watch reports.
    pub events: Vec<ChangeKind>,
    /// How long a path's deadline slides before its event is emitted.
    pub debounce_seconds: u64,
    /// Watches that are not enabled are skipped entirely at startup.
    pub enabled: bool,
    /// Tags applied to jobs created from this watch's events.
    pub tags: Vec<String>,
    /// Scheduling priority applied to jobs created from this watch's events.
    pub priority: i32,
    /// The first processor a job from this watch should run, if the
    /// pipeline should skip straight past dependency-order planning.
    pub initial_processor: Option<String>,
    /// Opaque metadata carried through to created jobs' config.
    pub metadata: Map<String, Value>,
}

impl WatchConfig {
    /// A watch over `path` named `name`, matching every file by default
    /// (`**/*`), recursive, reporting `created`/`modified`/`deleted`, with a
    /// two-second debounce and no tags, priority boost or pinned processor.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            patterns: vec!["**/*".to_owned()],
            ignore_patterns: Vec::new(),
            recursive: true,
            events: vec![ChangeKind::Created, ChangeKind::Modified, ChangeKind::Deleted],
            debounce_seconds: 2,
            enabled: true,
            tags: Vec::new(),
            priority: 0,
            initial_processor: None,
            metadata: Map::new(),
        }
    }

    /// Every ignore pattern that applies to this watch: its own, plus the
    /// defaults every watch carries regardless of configuration.
    pub(crate) fn effective_ignore_patterns(&self) -> impl Iterator<Item = &str> {
        self.ignore_patterns
            .iter()
            .map(String::as_str)
            .chain(DEFAULT_IGNORE_PATTERNS.iter().copied())
    }
}
