/*! Running `nixos-install` against the mounted and configured target
*/

use std::path::{Path, PathBuf};

use tracing::{span, Span};

use crate::{
    action::{Action, ActionDescription, ActionError, ActionErrorKind, ActionTag, StatefulAction},
    os::Host,
    spinner::with_spinner,
};

/**
Run `nixos-install` for the composed flake, showing a spinner until it exits

A failed install leaves the target mounted so it can be inspected, and is never retried.
 */
#[derive(Debug, serde::Deserialize, serde::Serialize, Clone)]
#[serde(tag = "action_name", rename = "run_installer")]
pub struct RunInstaller {
    mount_point: PathBuf,
    config_root: PathBuf,
    hostname: String,
    log: PathBuf,
}

impl RunInstaller {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn plan(
        mount_point: impl AsRef<Path>,
        config_root: impl AsRef<Path>,
        hostname: impl Into<String>,
        log: impl AsRef<Path>,
    ) -> StatefulAction<Self> {
        Self {
            mount_point: mount_point.as_ref().to_path_buf(),
            config_root: config_root.as_ref().to_path_buf(),
            hostname: hostname.into(),
            log: log.as_ref().to_path_buf(),
        }
        .into()
    }

    pub fn flake(&self) -> String {
        format!("{}#{}", self.config_root.display(), self.hostname)
    }

    /// The command an operator can run to retry the install by hand
    pub fn retry_command(&self) -> String {
        format!(
            "nixos-install --no-root-passwd --root {} --flake {}",
            self.mount_point.display(),
            self.flake()
        )
    }
}

#[async_trait::async_trait]
impl Action for RunInstaller {
    fn action_tag() -> ActionTag {
        ActionTag("run_installer")
    }
    fn tracing_synopsis(&self) -> String {
        format!("Install NixOS from `{}`", self.flake())
    }

    fn tracing_span(&self) -> Span {
        span!(
            tracing::Level::DEBUG,
            "run_installer",
            mount_point = %self.mount_point.display(),
            flake = %self.flake(),
        )
    }

    fn execute_description(&self) -> Vec<ActionDescription> {
        vec![ActionDescription::new(
            self.tracing_synopsis(),
            vec![
                format!("Runs `{}`", self.retry_command()),
                format!("Writes its output to `{}`", self.log.display()),
            ],
        )]
    }

    #[tracing::instrument(level = "debug", skip_all, fields(mount_point = %self.mount_point.display(), flake = %self.flake()))]
    async fn execute(&mut self, host: &dyn Host) -> Result<(), ActionError> {
        let flake = self.flake();
        let code = with_spinner(
            format!("Installing NixOS, output is in `{}`", self.log.display()),
            host.run_installer(&self.mount_point, &flake, &self.log),
        )
        .await
        .map_err(Self::error)?;

        match code {
            Some(0) => {
                tracing::debug!("`nixos-install` succeeded");
                Ok(())
            },
            code => Err(Self::error(ActionErrorKind::InstallFailed {
                code,
                log: self.log.clone(),
                mount_point: self.mount_point.clone(),
                retry: self.retry_command(),
            })),
        }
    }

    fn revert_description(&self) -> Vec<ActionDescription> {
        vec![]
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn revert(&mut self, _host: &dyn Host) -> Result<(), ActionError> {
        tracing::debug!("An installed system is not uninstalled, releasing the target is enough");
        Ok(())
    }
}
