use std::path::{Path, PathBuf};

use tracing::{span, Span};

use crate::{
    action::{Action, ActionDescription, ActionError, ActionErrorKind, ActionTag, StatefulAction},
    device::{is_partition_of, same_device},
    os::Host,
};

/**
Release the mount points and swap before the disk is rewritten

Anything mounted from a partition of the target disk is unmounted. Anything mounted from
another device is only unmounted when `allow_foreign` was approved.
 */
#[derive(Debug, serde::Deserialize, serde::Serialize, Clone)]
#[serde(tag = "action_name", rename = "prepare_target")]
pub struct PrepareTarget {
    disk: PathBuf,
    /// Innermost first, so nested mounts come off before their parent
    mount_points: Vec<PathBuf>,
    /// Mounts from other devices found while planning, as `(mount point, source)`
    pub(crate) foreign_mounts: Vec<(PathBuf, PathBuf)>,
    pub(crate) allow_foreign: bool,
}

impl PrepareTarget {
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn plan(
        host: &dyn Host,
        disk: &Path,
        mount_point: &Path,
        allow_foreign: bool,
    ) -> Result<StatefulAction<Self>, ActionError> {
        let mount_points = vec![mount_point.join("boot"), mount_point.to_path_buf()];

        let mut foreign_mounts = Vec::new();
        for mount_point in &mount_points {
            let source = host.mount_source(mount_point).await.map_err(Self::error)?;
            if let Some(source) = source {
                if !belongs_to_disk(disk, &source).await {
                    foreign_mounts.push((mount_point.clone(), source));
                }
            }
        }

        Ok(Self {
            disk: disk.to_path_buf(),
            mount_points,
            foreign_mounts,
            allow_foreign,
        }
        .into())
    }
}

/// Whether `source` is the disk itself or one of its partitions
async fn belongs_to_disk(disk: &Path, source: &Path) -> bool {
    if same_device(disk, source).await || is_partition_of(disk, source) {
        return true;
    }
    // `/dev/disk/by-id/...` mounts are reported under their kernel name
    match tokio::fs::canonicalize(disk).await {
        Ok(canonical) => is_partition_of(&canonical, source),
        Err(_) => false,
    }
}

#[async_trait::async_trait]
impl Action for PrepareTarget {
    fn action_tag() -> ActionTag {
        ActionTag("prepare_target")
    }
    fn tracing_synopsis(&self) -> String {
        format!(
            "Release mounts and swap ahead of rewriting `{}`",
            self.disk.display()
        )
    }

    fn tracing_span(&self) -> Span {
        span!(
            tracing::Level::DEBUG,
            "prepare_target",
            disk = tracing::field::display(self.disk.display()),
            allow_foreign = self.allow_foreign,
        )
    }

    fn execute_description(&self) -> Vec<ActionDescription> {
        let mut explanation = vec![format!(
            "Unmount anything mounted from `{}` at {}, then disable all swap",
            self.disk.display(),
            self.mount_points
                .iter()
                .map(|mount_point| format!("`{}`", mount_point.display()))
                .collect::<Vec<_>>()
                .join(" or ")
        )];
        for (mount_point, source) in &self.foreign_mounts {
            explanation.push(format!(
                "`{}` is currently mounted from `{}`, which is not part of the target disk",
                mount_point.display(),
                source.display()
            ));
        }
        vec![ActionDescription::new(self.tracing_synopsis(), explanation)]
    }

    #[tracing::instrument(level = "debug", skip_all, fields(disk = %self.disk.display()))]
    async fn execute(&mut self, host: &dyn Host) -> Result<(), ActionError> {
        for mount_point in &self.mount_points {
            let Some(source) = host.mount_source(mount_point).await.map_err(Self::error)? else {
                continue;
            };

            if !belongs_to_disk(&self.disk, &source).await {
                if !self.allow_foreign {
                    return Err(Self::error(ActionErrorKind::ForeignMount {
                        mount_point: mount_point.clone(),
                        source_device: source,
                        disk: self.disk.clone(),
                    }));
                }
                tracing::warn!(
                    mount_point = %mount_point.display(),
                    source = %source.display(),
                    "Unmounting a device which is not part of the target disk"
                );
            }

            tracing::debug!(mount_point = %mount_point.display(), source = %source.display(), "Unmounting");
            host.unmount(mount_point).await.map_err(Self::error)?;
        }

        if let Err(err) = host.swap_off_all().await {
            tracing::warn!(
                error = ?err,
                "Could not disable swap, continuing anyway"
            );
        }

        Ok(())
    }

    fn revert_description(&self) -> Vec<ActionDescription> {
        vec![]
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn revert(&mut self, _host: &dyn Host) -> Result<(), ActionError> {
        // Nothing to restore, released mounts stay released
        Ok(())
    }
}
