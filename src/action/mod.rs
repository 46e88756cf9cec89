/*! An executable or revertable step, possibly orchestrating sub-[`Action`]s

An [`Action`] is a single step of the pipeline. It is planned up front (`plan`, a
constructor convention rather than a trait method), wrapped in a [`StatefulAction`] which
tracks whether it already ran, then executed against a [`Host`].

Actions which own other actions, like [`ProvisionDisk`](provision::ProvisionDisk), are
"meta-actions": they call [`StatefulAction::try_execute`] on their children and decide what
to do when one fails.

Errors from an action are an [`ActionError`], which names the failing action and wraps an
[`ActionErrorKind`]. Children's errors are nested through [`ActionErrorKind::Child`], and
[`ActionError::root_kind`] digs out the original cause.
*/

pub mod configure;
pub mod install;
pub mod provision;
mod stateful;

pub use stateful::{ActionState, StatefulAction};

use std::{path::PathBuf, process::Output};

use tokio::process::Command;
use tracing::Span;

use crate::{device::DeviceState, os::Host};

/// A pipeline step which can be executed and, where it changed something, reverted
#[async_trait::async_trait]
pub trait Action: Send + Sync + std::fmt::Debug {
    fn action_tag() -> ActionTag
    where
        Self: Sized;
    /// One line, used in logs and as the plan description heading
    fn tracing_synopsis(&self) -> String;
    /// A span carrying the fields which identify this action
    fn tracing_span(&self) -> Span;
    /// What executing would change, for the plan description
    fn execute_description(&self) -> Vec<ActionDescription>;
    fn revert_description(&self) -> Vec<ActionDescription>;
    /// Children must be run through [`StatefulAction::try_execute`] so their state is tracked
    async fn execute(&mut self, host: &dyn Host) -> Result<(), ActionError>;
    async fn revert(&mut self, host: &dyn Host) -> Result<(), ActionError>;

    fn error(kind: impl Into<ActionErrorKind>) -> ActionError
    where
        Self: Sized,
    {
        ActionError::new(Self::action_tag(), kind)
    }
}

/// A description of an [`Action`], intended for humans to review
#[derive(Debug, serde::Deserialize, serde::Serialize, Clone)]
pub struct ActionDescription {
    pub description: String,
    pub explanation: Vec<String>,
}

impl ActionDescription {
    pub fn new(description: String, explanation: Vec<String>) -> Self {
        Self {
            description,
            explanation,
        }
    }
}

/// A 'tag' name an action has, used to name the failing action in errors and traces
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ActionTag(pub &'static str);

impl std::fmt::Display for ActionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Error executing action `{action_tag}`")]
pub struct ActionError {
    action_tag: ActionTag,
    #[source]
    kind: ActionErrorKind,
}

impl ActionError {
    pub fn new(action_tag: ActionTag, kind: impl Into<ActionErrorKind>) -> Self {
        Self {
            action_tag,
            kind: kind.into(),
        }
    }

    pub fn action_tag(&self) -> &ActionTag {
        &self.action_tag
    }

    pub fn kind(&self) -> &ActionErrorKind {
        &self.kind
    }

    /// The innermost [`ActionErrorKind`], skipping any [`ActionErrorKind::Child`] wrapping
    pub fn root_kind(&self) -> &ActionErrorKind {
        match &self.kind {
            ActionErrorKind::Child(child) => child.root_kind(),
            kind => kind,
        }
    }
}

/// An error occurring during an action
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum ActionErrorKind {
    /// A child action failed
    #[error(transparent)]
    Child(Box<ActionError>),
    #[error("Creating directory `{0}`")]
    CreateDirectory(PathBuf, #[source] std::io::Error),
    #[error("Reading directory `{0}`")]
    ReadDir(PathBuf, #[source] std::io::Error),
    #[error("Reading `{0}`")]
    Read(PathBuf, #[source] std::io::Error),
    #[error("Writing `{0}`")]
    Write(PathBuf, #[source] std::io::Error),
    #[error("Setting permissions on `{0}`")]
    SetPermissions(PathBuf, #[source] std::io::Error),
    #[error("Renaming `{0}` to `{1}`")]
    Rename(PathBuf, PathBuf, #[source] std::io::Error),
    #[error("Removing `{0}`")]
    Remove(PathBuf, #[source] std::io::Error),
    #[error("Template `{0}` is required but was not found")]
    MissingTemplate(PathBuf),
    #[error(
        "`{mount_point}` is mounted from `{source_device}`, which is not part of the target disk `{disk}`, \
        refusing to unmount it without approval (pass `--unmount-foreign` to allow it)"
    )]
    ForeignMount {
        mount_point: PathBuf,
        source_device: PathBuf,
        disk: PathBuf,
    },
    #[error(
        "Partition device nodes did not appear after {attempts} attempts, last observed state: {}",
        .last_state.iter().map(|(path, state)| format!("`{}` {state}", path.display())).collect::<Vec<_>>().join(", ")
    )]
    DeviceTimeout {
        attempts: usize,
        last_state: Vec<(PathBuf, DeviceState)>,
    },
    #[error(
        "Expected `{mount_point}` to be mounted from `{expected}`, found {}",
        .found.as_ref().map(|found| format!("`{}`", found.display())).unwrap_or_else(|| "no mount".to_string())
    )]
    MountVerification {
        mount_point: PathBuf,
        expected: PathBuf,
        found: Option<PathBuf>,
    },
    #[error("Expected swap to be active on `{0}` after `swapon`, but it was not listed")]
    SwapVerification(PathBuf),
    #[error("Parsing `{output}` from `{command}` as a size in bytes")]
    ParseDiskSize { command: String, output: String },
    #[error(
        "`nixos-install` {}, its output was written to `{}`. \
        The target is still mounted at `{}`, inspect it or retry with `{retry}`",
        .code.map(|code| format!("exited with status {code}")).unwrap_or_else(|| "was terminated by a signal".to_string()),
        .log.display(),
        .mount_point.display(),
    )]
    InstallFailed {
        code: Option<i32>,
        log: PathBuf,
        mount_point: PathBuf,
        retry: String,
    },
    #[error("Failed to execute command `{command}`")]
    Command {
        command: String,
        #[source]
        error: std::io::Error,
    },
    #[error(
        "Failed to execute command{maybe_status} `{command}`, stdout: {stdout}\nstderr: {stderr}\n",
        maybe_status = if let Some(code) = .code {
            format!(" with status {code}")
        } else {
            "".to_string()
        }
    )]
    CommandOutput {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

impl From<ActionError> for ActionErrorKind {
    fn from(value: ActionError) -> Self {
        Self::Child(Box::new(value))
    }
}

impl ActionErrorKind {
    pub fn command(command: &Command, error: std::io::Error) -> Self {
        Self::Command {
            command: format!("{:?}", command.as_std()),
            error,
        }
    }

    pub fn command_output(command: &Command, output: Output) -> Self {
        Self::CommandOutput {
            command: format!("{:?}", command.as_std()),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}
