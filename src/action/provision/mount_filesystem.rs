use std::path::{Path, PathBuf};

use tracing::{span, Span};

use crate::{
    action::{Action, ActionDescription, ActionError, ActionErrorKind, ActionTag, StatefulAction},
    device::same_device,
    os::Host,
};

/**
Mount a partition and check that the mount point ends up backed by it
 */
#[derive(Debug, serde::Deserialize, serde::Serialize, Clone)]
#[serde(tag = "action_name", rename = "mount_filesystem")]
pub struct MountFilesystem {
    device: PathBuf,
    mount_point: PathBuf,
    options: Option<String>,
}

impl MountFilesystem {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn plan(
        device: impl AsRef<Path>,
        mount_point: impl AsRef<Path>,
        options: Option<String>,
    ) -> StatefulAction<Self> {
        Self {
            device: device.as_ref().to_path_buf(),
            mount_point: mount_point.as_ref().to_path_buf(),
            options,
        }
        .into()
    }
}

#[async_trait::async_trait]
impl Action for MountFilesystem {
    fn action_tag() -> ActionTag {
        ActionTag("mount_filesystem")
    }
    fn tracing_synopsis(&self) -> String {
        format!(
            "Mount `{}` at `{}`",
            self.device.display(),
            self.mount_point.display()
        )
    }

    fn tracing_span(&self) -> Span {
        span!(
            tracing::Level::DEBUG,
            "mount_filesystem",
            device = %self.device.display(),
            mount_point = %self.mount_point.display(),
            options = ?self.options,
        )
    }

    fn execute_description(&self) -> Vec<ActionDescription> {
        let mut explanation = vec![];
        if let Some(options) = &self.options {
            explanation.push(format!("With mount options `{options}`"));
        }
        vec![ActionDescription::new(self.tracing_synopsis(), explanation)]
    }

    #[tracing::instrument(level = "debug", skip_all, fields(device = %self.device.display(), mount_point = %self.mount_point.display()))]
    async fn execute(&mut self, host: &dyn Host) -> Result<(), ActionError> {
        let Self {
            device,
            mount_point,
            options,
        } = self;

        tokio::fs::create_dir_all(&mount_point)
            .await
            .map_err(|e| ActionErrorKind::CreateDirectory(mount_point.clone(), e))
            .map_err(Self::error)?;

        host.mount(device, mount_point, options.as_deref())
            .await
            .map_err(Self::error)?;

        let found = host.mount_source(mount_point).await.map_err(Self::error)?;
        let verified = match &found {
            Some(source) => same_device(source, device).await,
            None => false,
        };
        if !verified {
            return Err(Self::error(ActionErrorKind::MountVerification {
                mount_point: mount_point.clone(),
                expected: device.clone(),
                found,
            }));
        }

        Ok(())
    }

    fn revert_description(&self) -> Vec<ActionDescription> {
        vec![ActionDescription::new(
            format!("Unmount `{}`", self.mount_point.display()),
            vec![],
        )]
    }

    #[tracing::instrument(level = "debug", skip_all, fields(mount_point = %self.mount_point.display()))]
    async fn revert(&mut self, host: &dyn Host) -> Result<(), ActionError> {
        if host
            .mount_source(&self.mount_point)
            .await
            .map_err(Self::error)?
            .is_none()
        {
            tracing::debug!("Already unmounted");
            return Ok(());
        }
        host.unmount(&self.mount_point)
            .await
            .map_err(Self::error)?;
        Ok(())
    }
}
