//! Loads the optional `WATCH_CONFIG` YAML file into [`WatchConfig`] values.
//!
//! The file is a list of watch entries; unset fields fall back to
//! [`WatchConfig::new`]'s defaults. A missing `WATCH_CONFIG` is not an
//! error -- the server simply starts with no watches.

use flowline_watcher::{ChangeKind, WatchConfig};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::{error, fmt, fs, io};

#[derive(Debug, Deserialize)]
struct WatchEntry {
    path: PathBuf,
    name: String,
    #[serde(default)]
    patterns: Option<Vec<String>>,
    #[serde(default)]
    ignore_patterns: Vec<String>,
    #[serde(default = "default_true")]
    recursive: bool,
    #[serde(default)]
    events: Option<Vec<String>>,
    #[serde(default)]
    debounce_seconds: Option<u64>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    initial_processor: Option<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

/// Read and parse `path` into a list of [`WatchConfig`]s.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read, or
/// [`ConfigError::Parse`] if it's not valid YAML, or names an unknown
/// event kind.
pub fn load_watch_config(path: &std::path::Path) -> Result<Vec<WatchConfig>, ConfigError> {
    let raw = fs::read_to_string(path)?;
    let entries: Vec<WatchEntry> = serde_yaml::from_str(&raw)?;

    entries.into_iter().map(entry_to_config).collect()
}

fn entry_to_config(entry: WatchEntry) -> Result<WatchConfig, ConfigError> {
    let mut config = WatchConfig::new(entry.path, entry.name);

    if let Some(patterns) = entry.patterns {
        config.patterns = patterns;
    }
    config.ignore_patterns = entry.ignore_patterns;
    config.recursive = entry.recursive;
    if let Some(events) = entry.events {
        config.events = events.iter().map(|e| parse_change_kind(e)).collect::<Result<_, _>>()?;
    }
    if let Some(seconds) = entry.debounce_seconds {
        config.debounce_seconds = seconds;
    }
    config.enabled = entry.enabled;
    config.tags = entry.tags;
    config.priority = entry.priority;
    config.initial_processor = entry.initial_processor;
    config.metadata = entry.metadata;

    Ok(config)
}

fn parse_change_kind(raw: &str) -> Result<ChangeKind, ConfigError> {
    match raw {
        "created" => Ok(ChangeKind::Created),
        "modified" => Ok(ChangeKind::Modified),
        "deleted" => Ok(ChangeKind::Deleted),
        "moved" => Ok(ChangeKind::Moved),
        other => Err(ConfigError::UnknownEventKind(other.to_owned())),
    }
}

/// Errors loading the watch configuration file.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io(io::Error),
    /// The file was not valid YAML.
    Parse(serde_yaml::Error),
    /// An `events` entry named something other than
    /// `created`/`modified`/`deleted`/`moved`.
    UnknownEventKind(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "could not read watch config: {}", err),
            Self::Parse(err) => write!(f, "could not parse watch config: {}", err),
            Self::UnknownEventKind(kind) => write!(f, "unknown watch event kind `{}`", kind),
        }
    }
}

impl error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::UnknownEventKind(_) => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Parse(err)
    }
}
