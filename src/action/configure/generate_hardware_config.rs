use std::path::{Path, PathBuf};

use tracing::{span, Span};

use super::CONFIG_FILE_MODE;
use crate::{
    action::{Action, ActionDescription, ActionError, ActionErrorKind, ActionTag, StatefulAction},
    os::Host,
    template::HARDWARE_CONFIGURATION,
    util::{remove_file, write_atomic},
};

/**
Detect the target's hardware with `nixos-generate-config` and write `hardware-configuration.nix`
into the configuration root
 */
#[derive(Debug, serde::Deserialize, serde::Serialize, Clone)]
#[serde(tag = "action_name", rename = "generate_hardware_config")]
pub struct GenerateHardwareConfig {
    root: PathBuf,
    config_root: PathBuf,
}

impl GenerateHardwareConfig {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn plan(root: impl AsRef<Path>, config_root: impl AsRef<Path>) -> StatefulAction<Self> {
        Self {
            root: root.as_ref().to_path_buf(),
            config_root: config_root.as_ref().to_path_buf(),
        }
        .into()
    }

    fn destination(&self) -> PathBuf {
        self.config_root.join(HARDWARE_CONFIGURATION)
    }
}

#[async_trait::async_trait]
impl Action for GenerateHardwareConfig {
    fn action_tag() -> ActionTag {
        ActionTag("generate_hardware_config")
    }
    fn tracing_synopsis(&self) -> String {
        format!("Generate `{}`", self.destination().display())
    }

    fn tracing_span(&self) -> Span {
        span!(
            tracing::Level::DEBUG,
            "generate_hardware_config",
            root = %self.root.display(),
            config_root = %self.config_root.display(),
        )
    }

    fn execute_description(&self) -> Vec<ActionDescription> {
        vec![ActionDescription::new(
            self.tracing_synopsis(),
            vec![format!(
                "Runs `nixos-generate-config --root {} --show-hardware-config`",
                self.root.display()
            )],
        )]
    }

    #[tracing::instrument(level = "debug", skip_all, fields(root = %self.root.display()))]
    async fn execute(&mut self, host: &dyn Host) -> Result<(), ActionError> {
        tokio::fs::create_dir_all(&self.config_root)
            .await
            .map_err(|e| ActionErrorKind::CreateDirectory(self.config_root.clone(), e))
            .map_err(Self::error)?;

        let hardware_config = host
            .generate_hardware_config(&self.root)
            .await
            .map_err(Self::error)?;

        write_atomic(&self.destination(), &hardware_config, CONFIG_FILE_MODE)
            .await
            .map_err(Self::error)?;

        Ok(())
    }

    fn revert_description(&self) -> Vec<ActionDescription> {
        vec![ActionDescription::new(
            format!("Remove `{}`", self.destination().display()),
            vec![],
        )]
    }

    #[tracing::instrument(level = "debug", skip_all, fields(root = %self.root.display()))]
    async fn revert(&mut self, _host: &dyn Host) -> Result<(), ActionError> {
        let destination = self.destination();
        remove_file(&destination)
            .await
            .map_err(|e| Self::error(ActionErrorKind::Remove(destination, e)))?;
        Ok(())
    }
}
