use std::path::{Path, PathBuf};

use tracing::{span, Span};

use crate::{
    action::{Action, ActionDescription, ActionError, ActionTag, StatefulAction},
    os::{Filesystem, Host},
};

/**
Create a filesystem, or swap signature, on a partition
 */
#[derive(Debug, serde::Deserialize, serde::Serialize, Clone)]
#[serde(tag = "action_name", rename = "format_partition")]
pub struct FormatPartition {
    device: PathBuf,
    filesystem: Filesystem,
    label: String,
}

impl FormatPartition {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn plan(
        device: impl AsRef<Path>,
        filesystem: Filesystem,
        label: impl Into<String>,
    ) -> StatefulAction<Self> {
        Self {
            device: device.as_ref().to_path_buf(),
            filesystem,
            label: label.into(),
        }
        .into()
    }
}

#[async_trait::async_trait]
impl Action for FormatPartition {
    fn action_tag() -> ActionTag {
        ActionTag("format_partition")
    }
    fn tracing_synopsis(&self) -> String {
        match self.filesystem {
            Filesystem::Swap => format!(
                "Set up `{}` as swap labelled `{}`",
                self.device.display(),
                self.label
            ),
            filesystem => format!(
                "Format `{}` as {filesystem} labelled `{}`",
                self.device.display(),
                self.label
            ),
        }
    }

    fn tracing_span(&self) -> Span {
        span!(
            tracing::Level::DEBUG,
            "format_partition",
            device = %self.device.display(),
            filesystem = %self.filesystem,
            label = %self.label,
        )
    }

    fn execute_description(&self) -> Vec<ActionDescription> {
        vec![ActionDescription::new(self.tracing_synopsis(), vec![])]
    }

    #[tracing::instrument(level = "debug", skip_all, fields(device = %self.device.display(), filesystem = %self.filesystem))]
    async fn execute(&mut self, host: &dyn Host) -> Result<(), ActionError> {
        host.format(&self.device, self.filesystem, &self.label)
            .await
            .map_err(Self::error)?;
        Ok(())
    }

    fn revert_description(&self) -> Vec<ActionDescription> {
        vec![]
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn revert(&mut self, _host: &dyn Host) -> Result<(), ActionError> {
        Ok(())
    }
}
