/*! Provision a bare disk into a bootable [NixOS](https://nixos.org) installation.

The work is modelled as an [`InstallPlan`]: the target disk is measured and a
[`PartitionPlan`](planner::PartitionPlan) computed up front, then a fixed sequence of
[`Action`](action::Action)s partitions, formats and mounts the disk, composes the
configuration from templates and finally runs `nixos-install`.

Every external tool invocation goes through a [`Host`](os::Host), so the whole pipeline
can be driven against a fake in tests.

```rust,no_run
use nixos_provision::{os::LinuxHost, settings::CommonSettings, InstallPlan, ProvisionError};

async fn provision(settings: CommonSettings) -> Result<(), ProvisionError> {
    let host = LinuxHost::default();
    let mut plan = InstallPlan::plan(settings, &host).await?;
    plan.install(&host, None).await?;
    Ok(())
}
```
*/

pub mod action;
#[cfg(feature = "cli")]
pub mod cli;
pub mod device;
mod error;
pub mod os;
mod plan;
pub mod planner;
pub mod settings;
pub mod sizing;
mod spinner;
pub mod template;
mod util;

use std::process::Output;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::action::ActionErrorKind;

pub use error::{HasExpectedErrors, ProvisionError};
pub use plan::InstallPlan;

#[tracing::instrument(level = "debug", skip_all, fields(command = %format!("{:?}", command.as_std())))]
pub(crate) async fn execute_command(command: &mut Command) -> Result<Output, ActionErrorKind> {
    tracing::trace!("Executing");
    let output = command
        .output()
        .await
        .map_err(|e| ActionErrorKind::command(command, e))?;
    match output.status.success() {
        true => Ok(output),
        false => Err(ActionErrorKind::command_output(command, output)),
    }
}

/// Like [`execute_command`] but feeds `stdin` to the child before waiting on it
#[tracing::instrument(level = "debug", skip_all, fields(command = %format!("{:?}", command.as_std())))]
pub(crate) async fn execute_command_with_stdin(
    command: &mut Command,
    stdin: &str,
) -> Result<Output, ActionErrorKind> {
    tracing::trace!("Executing with stdin");
    command
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|e| ActionErrorKind::command(command, e))?;
    if let Some(mut pipe) = child.stdin.take() {
        pipe.write_all(stdin.as_bytes())
            .await
            .map_err(|e| ActionErrorKind::command(command, e))?;
        // Dropping the pipe closes it so the child sees EOF
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| ActionErrorKind::command(command, e))?;
    match output.status.success() {
        true => Ok(output),
        false => Err(ActionErrorKind::command_output(command, output)),
    }
}
