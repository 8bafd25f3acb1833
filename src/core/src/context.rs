//! The [`Context`] is a scoped recorder of side effects for a single step.
//!
//! It is acquired at step start and released at step exit. On normal exit
//! the accumulated artifacts are committed (persisted with
//! `status = created` by the caller, once `commit` hands back the finalized
//! list); on exceptional exit they are rolled back in reverse insertion
//! order. Both `commit` and `rollback` are idempotent after their first
//! call.

use crate::{Artifact, ArtifactType, Id, Reversibility};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::{error, fmt, fs, io};

/// How file content is represented in artifact `before`/`after` state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Encoding {
    /// Content is valid UTF-8 text.
    Utf8,
    /// Content is arbitrary bytes, stored base64-encoded.
    Base64,
}

/// Whether a recorded API call created or modified an external resource.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ApiCallKind {
    /// The call created a new external resource.
    Create,
    /// The call modified an existing external resource.
    Modify,
}

/// The outcome of reverting a single committed artifact.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RevertOutcome {
    /// The artifact's effect was fully undone.
    Reverted,
    /// The artifact's target had already disappeared; treated as a
    /// successful (but warned) no-op.
    Orphaned(String),
    /// The revert would silently overwrite state that now exists; it was
    /// aborted instead.
    Conflict(String),
    /// This artifact type has no context-level undo; the caller (a
    /// processor's own `revert` method) is responsible for cleanup.
    NotApplicable,
}

/// A scoped, rollback-capable recorder of side effects.
#[derive(Debug)]
pub struct Context {
    job_id: Id,
    step_result_id: Id,
    pending: Vec<Artifact>,
    committed: bool,
    rolled_back: bool,
}

impl Context {
    /// Construct a new context for the given job and step result.
    #[must_use]
    pub fn new(job_id: Id, step_result_id: Id) -> Self {
        Self {
            job_id,
            step_result_id,
            pending: Vec::new(),
            committed: false,
            rolled_back: false,
        }
    }

    /// The artifacts recorded so far in this context, not yet committed.
    #[must_use]
    pub fn pending_artifacts(&self) -> &[Artifact] {
        &self.pending
    }

    fn new_artifact(&self, artifact_type: ArtifactType, target: impl Into<String>) -> Artifact {
        let now = Utc::now();
        let mut artifact = Artifact::new(Id::new(), Some(self.job_id.clone()), artifact_type, target, now);
        artifact.step_result_id = Some(self.step_result_id.clone());
        artifact
    }

    fn push(&mut self, artifact: Artifact) -> Artifact {
        self.pending.push(artifact.clone());
        artifact
    }

    /// Create a new file. Fails with [`ContextError::Precondition`] if
    /// `path` already exists.
    pub fn create_file(
        &mut self,
        path: impl AsRef<Path>,
        content: &[u8],
        encoding: Encoding,
    ) -> Result<Artifact, ContextError> {
        let path = path.as_ref();
        if path.exists() {
            return Err(ContextError::Precondition(format!(
                "{} already exists",
                path.display()
            )));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;

        let mut artifact = self.new_artifact(ArtifactType::FileCreate, path.to_string_lossy());
        artifact.after_state = Some(encode_content(content, encoding));
        Ok(self.push(artifact))
    }

    /// Overwrite an existing file. Fails with
    /// [`ContextError::Precondition`] if `path` does not exist.
    pub fn modify_file(
        &mut self,
        path: impl AsRef<Path>,
        new_content: &[u8],
        encoding: Encoding,
    ) -> Result<Artifact, ContextError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ContextError::Precondition(format!(
                "{} does not exist",
                path.display()
            )));
        }

        let before = fs::read(path)?;
        fs::write(path, new_content)?;

        let mut artifact = self.new_artifact(ArtifactType::FileModify, path.to_string_lossy());
        artifact.before_state = Some(encode_content(&before, encoding));
        artifact.after_state = Some(encode_content(new_content, encoding));
        Ok(self.push(artifact))
    }

    /// Delete an existing file. Fails with [`ContextError::Precondition`]
    /// if `path` does not exist.
    pub fn delete_file(&mut self, path: impl AsRef<Path>) -> Result<Artifact, ContextError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ContextError::Precondition(format!(
                "{} does not exist",
                path.display()
            )));
        }

        let before = fs::read(path)?;
        fs::remove_file(path)?;

        let mut artifact = self.new_artifact(ArtifactType::FileDelete, path.to_string_lossy());
        artifact.before_state = Some(encode_content(&before, Encoding::Base64));
        Ok(self.push(artifact))
    }

    /// Move/rename a file. Fails with [`ContextError::Precondition`] if
    /// `src` does not exist or `dst` already does.
    pub fn move_file(
        &mut self,
        src: impl AsRef<Path>,
        dst: impl AsRef<Path>,
    ) -> Result<Artifact, ContextError> {
        let src = src.as_ref();
        let dst = dst.as_ref();

        if !src.exists() {
            return Err(ContextError::Precondition(format!(
                "{} does not exist",
                src.display()
            )));
        }
        if dst.exists() {
            return Err(ContextError::Precondition(format!(
                "{} already exists",
                dst.display()
            )));
        }

        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(src, dst)?;

        let mut artifact = self.new_artifact(ArtifactType::FileMove, dst.to_string_lossy());
        artifact.before_state = Some(json!({ "path": src.to_string_lossy() }));
        artifact.after_state = Some(json!({ "path": dst.to_string_lossy() }));
        Ok(self.push(artifact))
    }

    /// Shallow-merge `updates` into the leading YAML frontmatter block of
    /// `path` (delimited by `---` lines), re-emitting the file. Fails with
    /// [`ContextError::Precondition`] if `path` does not exist. Malformed
    /// YAML is treated as an empty frontmatter block (non-fatal): the whole
    /// file becomes the body.
    pub fn update_frontmatter(
        &mut self,
        path: impl AsRef<Path>,
        updates: Map<String, Value>,
    ) -> Result<Artifact, ContextError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ContextError::Precondition(format!(
                "{} does not exist",
                path.display()
            )));
        }

        let raw = fs::read_to_string(path)?;
        let (before, body) = parse_frontmatter(&raw);

        let mut after = before.clone();
        for (key, value) in updates {
            let _ = after.insert(key, value);
        }

        fs::write(path, serialize_frontmatter(&after, &body))?;

        let mut artifact = self.new_artifact(ArtifactType::FrontmatterUpdate, path.to_string_lossy());
        artifact.before_state = Some(Value::Object(before));
        artifact.after_state = Some(Value::Object(after));
        Ok(self.push(artifact))
    }

    /// Record an external API call as an informational artifact. No
    /// filesystem effect. If `reversible` is false, the artifact is marked
    /// [`Reversibility::Irreversible`] and will never be auto-replayed.
    pub fn record_api_call(
        &mut self,
        service: impl AsRef<str>,
        action: impl AsRef<str>,
        kind: ApiCallKind,
        request: Value,
        response: Value,
        reversible: bool,
        reverse_action: Option<Value>,
    ) -> Artifact {
        let artifact_type = match kind {
            ApiCallKind::Create => ArtifactType::ExternalApiCreate,
            ApiCallKind::Modify => ArtifactType::ExternalApiModify,
        };

        let mut artifact = self.new_artifact(
            artifact_type,
            format!("{}:{}", service.as_ref(), action.as_ref()),
        );
        artifact.before_state = Some(request);
        artifact.after_state = Some(response);
        artifact.reversibility = if reversible {
            Reversibility::Fully
        } else {
            Reversibility::Irreversible
        };
        if let Some(reverse) = reverse_action {
            let _ = artifact.metadata.insert("reverse_action".to_owned(), reverse);
        }

        self.push(artifact)
    }

    /// Commit all pending artifacts, returning the finalized list (each
    /// marked `created`) for the caller to persist. A no-op after the first
    /// call, returning an empty list.
    pub fn commit(&mut self) -> Vec<Artifact> {
        if self.committed {
            return Vec::new();
        }
        self.committed = true;

        let now = Utc::now();
        self.pending
            .iter_mut()
            .for_each(|artifact| artifact.mark_created(now));
        self.pending.clone()
    }

    /// Undo every pending (uncommitted) artifact in reverse insertion
    /// order. A no-op after `commit` has already been called (logged by
    /// the caller as a warning).
    #[must_use]
    pub fn rollback(&mut self) -> Vec<(Artifact, RevertOutcome)> {
        if self.committed || self.rolled_back {
            return Vec::new();
        }
        self.rolled_back = true;

        self.pending
            .drain(..)
            .rev()
            .map(|artifact| {
                let outcome = revert_artifact(&artifact);
                (artifact, outcome)
            })
            .collect()
    }
}

/// Undo a single, already-committed artifact's filesystem effect. Tolerates
/// a missing target (returns [`RevertOutcome::Orphaned`] rather than an
/// error) and refuses to silently clobber a path that now exists where a
/// moved-away file used to live (returns [`RevertOutcome::Conflict`]).
/// External-API and metadata artifacts are never handled here -- see
/// [`RevertOutcome::NotApplicable`].
#[must_use]
pub fn revert_artifact(artifact: &Artifact) -> RevertOutcome {
    match artifact.artifact_type {
        ArtifactType::FileCreate => {
            let path = Path::new(&artifact.target);
            if !path.exists() {
                return RevertOutcome::Orphaned(format!("{} already gone", artifact.target));
            }
            match fs::remove_file(path) {
                Ok(()) => RevertOutcome::Reverted,
                Err(err) => RevertOutcome::Orphaned(err.to_string()),
            }
        }
        ArtifactType::FileModify => {
            let path = Path::new(&artifact.target);
            if !path.exists() {
                return RevertOutcome::Orphaned(format!("{} already gone", artifact.target));
            }
            match restore_bytes(&artifact.before_state) {
                Some(bytes) => match fs::write(path, bytes) {
                    Ok(()) => RevertOutcome::Reverted,
                    Err(err) => RevertOutcome::Conflict(err.to_string()),
                },
                None => RevertOutcome::Conflict("missing before-state".to_owned()),
            }
        }
        ArtifactType::FileDelete => {
            let path = Path::new(&artifact.target);
            if path.exists() {
                return RevertOutcome::Conflict(format!(
                    "{} was recreated since deletion",
                    artifact.target
                ));
            }
            match restore_bytes(&artifact.before_state) {
                Some(bytes) => {
                    if let Some(parent) = path.parent() {
                        if fs::create_dir_all(parent).is_err() {
                            return RevertOutcome::Conflict("could not recreate parent dir".to_owned());
                        }
                    }
                    match fs::write(path, bytes) {
                        Ok(()) => RevertOutcome::Reverted,
                        Err(err) => RevertOutcome::Conflict(err.to_string()),
                    }
                }
                None => RevertOutcome::Conflict("missing before-state".to_owned()),
            }
        }
        ArtifactType::FileMove => {
            let (src, dst) = match (
                artifact.before_state.as_ref().and_then(|v| v.get("path")).and_then(Value::as_str),
                artifact.after_state.as_ref().and_then(|v| v.get("path")).and_then(Value::as_str),
            ) {
                (Some(src), Some(dst)) => (src, dst),
                _ => return RevertOutcome::Conflict("missing move before/after state".to_owned()),
            };

            let dst_path = Path::new(dst);
            let src_path = Path::new(src);

            if !dst_path.exists() {
                return RevertOutcome::Orphaned(format!("{} already gone", dst));
            }
            if src_path.exists() {
                return RevertOutcome::Conflict(format!("{} now occupied", src));
            }

            if let Some(parent) = src_path.parent() {
                if fs::create_dir_all(parent).is_err() {
                    return RevertOutcome::Conflict("could not recreate parent dir".to_owned());
                }
            }
            match fs::rename(dst_path, src_path) {
                Ok(()) => RevertOutcome::Reverted,
                Err(err) => RevertOutcome::Conflict(err.to_string()),
            }
        }
        ArtifactType::FrontmatterUpdate => {
            let path = Path::new(&artifact.target);
            if !path.exists() {
                return RevertOutcome::Orphaned(format!("{} already gone", artifact.target));
            }

            let before = match &artifact.before_state {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            };

            let raw = match fs::read_to_string(path) {
                Ok(raw) => raw,
                Err(err) => return RevertOutcome::Conflict(err.to_string()),
            };
            let (_, body) = parse_frontmatter(&raw);

            match fs::write(path, serialize_frontmatter(&before, &body)) {
                Ok(()) => RevertOutcome::Reverted,
                Err(err) => RevertOutcome::Conflict(err.to_string()),
            }
        }
        ArtifactType::ExternalApiCreate | ArtifactType::ExternalApiModify | ArtifactType::Metadata => {
            RevertOutcome::NotApplicable
        }
    }
}

fn encode_content(content: &[u8], encoding: Encoding) -> Value {
    match encoding {
        Encoding::Utf8 => json!({
            "encoding": "utf8",
            "content": String::from_utf8_lossy(content),
        }),
        Encoding::Base64 => json!({
            "encoding": "base64",
            "content": BASE64.encode(content),
        }),
    }
}

fn restore_bytes(state: &Option<Value>) -> Option<Vec<u8>> {
    let state = state.as_ref()?;
    let encoding = state.get("encoding").and_then(Value::as_str).unwrap_or("utf8");
    let content = state.get("content").and_then(Value::as_str)?;

    match encoding {
        "base64" => BASE64.decode(content).ok(),
        _ => Some(content.as_bytes().to_vec()),
    }
}

/// Split `content` into its leading `---`-delimited YAML frontmatter (if
/// any) and the remaining body. Malformed YAML, or a missing closing
/// delimiter, yields an empty frontmatter map and the whole input as body.
pub(crate) fn parse_frontmatter(content: &str) -> (Map<String, Value>, String) {
    let lines: Vec<&str> = content.lines().collect();

    match lines.first() {
        Some(first) if first.trim_end() == "---" => {}
        _ => return (Map::new(), content.to_owned()),
    }

    let mut end = None;
    for (i, line) in lines.iter().enumerate().skip(1) {
        if line.trim_end() == "---" {
            end = Some(i);
            break;
        }
    }

    let end = match end {
        Some(end) => end,
        None => return (Map::new(), content.to_owned()),
    };

    let yaml_src = lines[1..end].join("\n");
    let map = match serde_yaml::from_str::<serde_yaml::Value>(&yaml_src) {
        Ok(yaml) => match serde_json::to_value(&yaml) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        Err(_) => return (Map::new(), content.to_owned()),
    };

    let body = lines[(end + 1)..].join("\n");
    (map, body)
}

/// Re-emit a frontmatter map and body as `---\n<yaml>---\n<body>`. An empty
/// map emits no frontmatter block at all.
pub(crate) fn serialize_frontmatter(map: &Map<String, Value>, body: &str) -> String {
    if map.is_empty() {
        return body.to_owned();
    }

    let yaml = serde_yaml::to_string(&Value::Object(map.clone())).unwrap_or_default();
    format!("---\n{}---\n{}", yaml, body)
}

/// Errors an [`Context`] operation can fail with.
#[derive(Debug)]
pub enum ContextError {
    /// A precondition (file must/must not exist) was not met.
    Precondition(String),
    /// An I/O error occurred.
    Io(io::Error),

    #[doc(hidden)]
    __Unknown,
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Precondition(msg) => write!(f, "precondition violation: {}", msg),
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::__Unknown => unreachable!(),
        }
    }
}

impl error::Error for ContextError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Precondition(_) => None,
            Self::__Unknown => unreachable!(),
        }
    }
}

impl From<io::Error> for ContextError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}
