//! A processor that executes a shell command and captures its output.
//!
//! The command's _stdout_ becomes the step's output data; a non-zero exit
//! status fails the step with its _stderr_ as the error message. ANSI
//! escape codes are stripped from both streams before they're recorded.
//!
//! # Examples
//!
//! ```rust
//! use flowline_core::{DataBag, Job, SourceType, Processor};
//! use flowline_processor_shell_command::ShellCommand;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let processor = ShellCommand {
//!     command: "echo".to_owned(),
//!     arguments: Some(vec!["hello".to_owned()]),
//!     stdin: None,
//!     cwd: None,
//!     paths: None,
//! };
//!
//! let job = Job::new("demo", SourceType::Manual, chrono::Utc::now());
//! assert!(processor.should_process(&job).await);
//! # }
//! ```
#![deny(
    clippy::all,
    rust_2018_idioms,
    future_incompatible,
    missing_docs,
    nonstandard_style
)]
#![allow(clippy::multiple_crate_versions)]

use async_trait::async_trait;
use flowline_core::{Context, DataBag, Job, Processor, ProcessorError, StepResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{env, error, fmt, io, path};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Runs a shell command, capturing its stdout as output data.
///
/// `cwd` and `paths` are resolved relative to the process's own current
/// working directory and are validated to contain only plain, relative
/// path components -- `..` and absolute paths are rejected so a configured
/// processor can't be pointed outside of the directories it's meant to
/// touch.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ShellCommand {
    /// The command to execute.
    pub command: String,
    /// Arguments passed to `command`.
    pub arguments: Option<Vec<String>>,
    /// A string piped to the command's stdin.
    pub stdin: Option<String>,
    /// The working directory the command runs in, relative to the current
    /// working directory. `None` uses the current working directory as-is.
    pub cwd: Option<String>,
    /// Additional directories prepended to the `PATH` environment
    /// variable, relative to the current working directory.
    pub paths: Option<Vec<String>>,
}

impl ShellCommand {
    fn validate(&self) -> Result<(), Error> {
        fn check_path(candidate: &str) -> Result<(), Error> {
            let candidate = path::Path::new(candidate);
            candidate.components().try_for_each(|c| match c {
                path::Component::Normal(_) => Ok(()),
                _ => Err(Error::Path("only sibling or child paths are accessible".into())),
            })
        }

        if let Some(cwd) = &self.cwd {
            check_path(cwd)?;
        }
        if let Some(paths) = &self.paths {
            paths.iter().map(String::as_str).try_for_each(check_path)?;
        }
        Ok(())
    }

    async fn run(&self) -> Result<Option<String>, Error> {
        self.validate()?;

        let base = env::current_dir()?;
        let cwd = base.join(self.cwd.as_deref().unwrap_or(""));
        let new_paths: Vec<_> = self
            .paths
            .iter()
            .flatten()
            .map(|p| base.join(p))
            .collect();

        let path = match env::var_os("PATH") {
            Some(existing) => env::split_paths(&existing).chain(new_paths).collect(),
            None => new_paths,
        };

        let mut command = Command::new(&self.command);
        command
            .current_dir(cwd)
            .env("PATH", env::join_paths(path)?)
            .args(self.arguments.iter().flatten());

        let output = if let Some(input) = &self.stdin {
            use std::process::Stdio;
            let mut child = command
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()?;

            child
                .stdin
                .take()
                .expect("stdin requested")
                .write_all(input.as_bytes())
                .await?;
            child.wait_with_output().await
        } else {
            command.output().await
        }?;

        if !output.status.success() {
            if output.stderr.is_empty() {
                return Err(Error::Command("unknown error during command execution".into()));
            }
            return Err(Error::Command(
                String::from_utf8_lossy(&strip_ansi_escapes::strip(output.stderr)?)
                    .trim_end()
                    .to_owned(),
            ));
        }

        if output.stdout.is_empty() {
            return Ok(None);
        }

        Ok(Some(
            String::from_utf8_lossy(&strip_ansi_escapes::strip(output.stdout)?)
                .trim_end()
                .to_owned(),
        ))
    }
}

#[async_trait]
impl Processor for ShellCommand {
    fn name(&self) -> &str {
        "shell-command"
    }

    fn display_name(&self) -> &str {
        "Shell Command"
    }

    fn description(&self) -> &str {
        "Executes a shell command and captures its output"
    }

    async fn should_process(&self, _job: &Job) -> bool {
        true
    }

    async fn process(&self, _job: &Job, _ctx: &mut Context) -> Result<StepResult, ProcessorError> {
        let now = chrono::Utc::now();
        let stdout = self.run().await.map_err(|err| match err {
            Error::Io(err) => ProcessorError::Io(err),
            err => ProcessorError::Failed(err.to_string()),
        })?;

        let mut data = DataBag::new();
        data.set("stdout", json!(stdout));

        let mut result = StepResult::new(self.name(), now);
        result.mark_completed(data, chrono::Utc::now());
        Ok(result)
    }

    async fn revert(&self, _job: &Job, _result: &StepResult, _ctx: &mut Context) -> bool {
        true
    }
}

/// The ways [`ShellCommand`] can fail.
#[derive(Debug)]
pub enum Error {
    /// The command exited with a non-zero status; the string is its
    /// stderr output.
    Command(String),
    /// An I/O error occurred spawning or communicating with the command.
    Io(io::Error),
    /// `cwd` or `paths` contained a path outside the allowed shape.
    Path(String),

    #[doc(hidden)]
    __Unknown,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(err) => write!(f, "command error: {}", err),
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Path(err) => write!(f, "path error: {}", err),
            Self::__Unknown => unreachable!(),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Command(_) | Self::Path(_) => None,
            Self::__Unknown => unreachable!(),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<env::JoinPathsError> for Error {
    fn from(err: env::JoinPathsError) -> Self {
        Self::Path(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor_stub() -> ShellCommand {
        ShellCommand {
            command: "echo".to_owned(),
            arguments: None,
            stdin: None,
            cwd: None,
            paths: None,
        }
    }

    mod run {
        use super::*;

        #[tokio::test]
        async fn test_command_without_output() {
            let mut processor = processor_stub();
            processor.command = "true".to_owned();

            assert!(processor.run().await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_command_with_arguments() {
            let mut processor = processor_stub();
            processor.arguments = Some(vec!["hello world".to_owned()]);

            let output = processor.run().await.unwrap().expect("Some");
            assert_eq!(output, "hello world");
        }

        #[tokio::test]
        async fn test_command_with_input() {
            let mut processor = processor_stub();
            processor.command = "cat".to_owned();
            processor.stdin = Some("hello world".to_owned());

            let output = processor.run().await.unwrap().expect("Some");
            assert!(output.contains("hello world"));
        }

        #[tokio::test]
        async fn test_command_non_zero_exit_code() {
            let mut processor = processor_stub();
            processor.command = "false".to_owned();

            assert!(processor.run().await.is_err());
        }

        #[tokio::test]
        async fn test_command_stderr_output() {
            let mut processor = processor_stub();
            processor.command = "ls".to_owned();
            processor.arguments = Some(vec!["/no/such/path".to_owned()]);

            let err = processor.run().await.unwrap_err();
            assert!(matches!(err, Error::Command(_)));
        }

        #[tokio::test]
        async fn test_invalid_command() {
            let mut processor = processor_stub();
            processor.command = "doesnotexist".to_owned();

            assert!(matches!(processor.run().await.unwrap_err(), Error::Io(_)));
        }
    }

    mod validate {
        use super::*;

        #[test]
        fn test_no_cwd_or_paths() {
            processor_stub().validate().unwrap();
        }

        #[test]
        fn test_relative_cwd() {
            let mut processor = processor_stub();
            processor.cwd = Some("hello/world".to_owned());
            processor.validate().unwrap();
        }

        #[test]
        fn test_parent_cwd_rejected() {
            let mut processor = processor_stub();
            processor.cwd = Some("../parent".to_owned());
            assert!(matches!(processor.validate().unwrap_err(), Error::Path(_)));
        }

        #[test]
        fn test_absolute_cwd_rejected() {
            let mut processor = processor_stub();
            processor.cwd = Some("/etc".to_owned());
            assert!(matches!(processor.validate().unwrap_err(), Error::Path(_)));
        }

        #[test]
        fn test_multiple_paths_one_bad() {
            let mut processor = processor_stub();
            processor.paths = Some(vec!["valid/path".to_owned(), "/etc".to_owned()]);
            assert!(matches!(processor.validate().unwrap_err(), Error::Path(_)));
        }
    }

    #[tokio::test]
    async fn test_processor_process_records_stdout() {
        let processor = ShellCommand {
            command: "echo".to_owned(),
            arguments: Some(vec!["recorded".to_owned()]),
            stdin: None,
            cwd: None,
            paths: None,
        };

        let job = flowline_core::Job::new(
            "demo",
            flowline_core::SourceType::Manual,
            chrono::Utc::now(),
        );
        let mut ctx = Context::new(job.id.clone(), flowline_core::Id::new());

        let result = processor.process(&job, &mut ctx).await.unwrap();
        assert_eq!(
            result.output_data.get("stdout").and_then(|v| v.as_str()),
            Some("recorded")
        );
    }
}
