/*! [`Action`]s which turn the bare disk into mounted filesystems and active swap
*/

pub(crate) mod activate_swap;
pub(crate) mod format_partition;
pub(crate) mod mount_filesystem;
pub(crate) mod prepare_target;
pub(crate) mod settle_devices;
pub(crate) mod write_partition_table;

pub use activate_swap::ActivateSwap;
pub use format_partition::FormatPartition;
pub use mount_filesystem::MountFilesystem;
pub use prepare_target::PrepareTarget;
pub use settle_devices::SettleDevices;
pub use write_partition_table::WritePartitionTable;

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::{span, Span};

use crate::{
    action::{Action, ActionDescription, ActionError, ActionState, ActionTag, StatefulAction},
    device::DeviceNodeSet,
    os::{Filesystem, Host},
    planner::{PartitionPlan, PartitionRole},
    settings::CommonSettings,
};

/// Options the EFI system partition is mounted with
pub const EFI_MOUNT_OPTIONS: &str = "umask=0077";

/**
Partition, format and mount the target disk, then enable swap

Should any step after preparing the target fail, everything mounted or enabled so far is rolled
back before the error is returned. A refused foreign mount is left exactly as it was.
 */
#[derive(Debug, serde::Deserialize, serde::Serialize, Clone)]
#[serde(tag = "action_name", rename = "provision_disk")]
pub struct ProvisionDisk {
    disk: PathBuf,
    mount_point: PathBuf,
    nodes: DeviceNodeSet,
    pub(crate) prepare_target: StatefulAction<PrepareTarget>,
    write_partition_table: StatefulAction<WritePartitionTable>,
    settle_devices: StatefulAction<SettleDevices>,
    format_partitions: Vec<StatefulAction<FormatPartition>>,
    mount_root: StatefulAction<MountFilesystem>,
    mount_boot: StatefulAction<MountFilesystem>,
    activate_swap: StatefulAction<ActivateSwap>,
}

impl ProvisionDisk {
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn plan(
        host: &dyn Host,
        settings: &CommonSettings,
        partition_plan: &PartitionPlan,
    ) -> Result<StatefulAction<Self>, ActionError> {
        let disk = partition_plan.disk.clone();
        let mount_point = settings.mount_point.clone();
        let nodes = partition_plan.device_nodes();

        let prepare_target =
            PrepareTarget::plan(host, &disk, &mount_point, settings.unmount_foreign)
                .await
                .map_err(Self::error)?;
        let write_partition_table = WritePartitionTable::plan(partition_plan);
        let settle_devices = SettleDevices::plan(
            disk.clone(),
            nodes.clone(),
            settings.settle_attempts,
            Duration::from_millis(settings.settle_interval_ms),
        );

        let format_partitions = vec![
            FormatPartition::plan(
                &nodes.efi,
                Filesystem::Vfat,
                partition_plan.get(PartitionRole::Efi).label.clone(),
            ),
            FormatPartition::plan(
                &nodes.root,
                settings.root_filesystem,
                partition_plan.get(PartitionRole::Root).label.clone(),
            ),
            FormatPartition::plan(
                &nodes.swap,
                Filesystem::Swap,
                partition_plan.get(PartitionRole::Swap).label.clone(),
            ),
        ];

        let mount_root = MountFilesystem::plan(&nodes.root, &mount_point, None);
        let mount_boot = MountFilesystem::plan(
            &nodes.efi,
            mount_point.join("boot"),
            Some(EFI_MOUNT_OPTIONS.to_string()),
        );
        let activate_swap = ActivateSwap::plan(&nodes.swap);

        Ok(Self {
            disk,
            mount_point,
            nodes,
            prepare_target,
            write_partition_table,
            settle_devices,
            format_partitions,
            mount_root,
            mount_boot,
            activate_swap,
        }
        .into())
    }

    pub fn device_nodes(&self) -> &DeviceNodeSet {
        &self.nodes
    }

    /// Mounts from devices outside the target disk which would have to be released
    pub fn foreign_mounts(&self) -> &[(PathBuf, PathBuf)] {
        &self.prepare_target.inner().foreign_mounts
    }

    pub(crate) fn approve_foreign_unmount(&mut self) {
        self.prepare_target.inner_mut().allow_foreign = true;
    }

    async fn execute_steps(&mut self, host: &dyn Host) -> Result<(), ActionError> {
        self.write_partition_table.try_execute(host).await?;
        self.settle_devices.try_execute(host).await?;
        for format_partition in self.format_partitions.iter_mut() {
            format_partition.try_execute(host).await?;
        }
        self.mount_root.try_execute(host).await?;
        self.mount_boot.try_execute(host).await?;
        self.activate_swap.try_execute(host).await?;
        Ok(())
    }

    async fn roll_back(&mut self, host: &dyn Host) {
        if self.prepare_target.state() != ActionState::Completed {
            // Whatever is mounted there was never ours
            tracing::debug!("The target was never prepared, leaving its mounts alone");
            return;
        }
        rollback(host, &self.mount_point, Some(self.nodes.swap.as_path())).await;
        // Mounts and swap are released, so a rerun has to redo them
        for child in [&mut self.mount_root, &mut self.mount_boot] {
            child.state = ActionState::Uncompleted;
        }
        self.activate_swap.state = ActionState::Uncompleted;
    }
}

/// Release the mounts and swap of a provisioned disk
///
/// Unmounts `<mount_point>/boot`, then `mount_point`, disables swap on `swap` and finally
/// disables all swap. Every step is attempted regardless of earlier failures, which are only
/// logged.
#[tracing::instrument(level = "debug", skip_all, fields(mount_point = %mount_point.display()))]
pub async fn rollback(host: &dyn Host, mount_point: &Path, swap: Option<&Path>) {
    tracing::info!("Rolling back mounts and swap under `{}`", mount_point.display());

    for target in [mount_point.join("boot"), mount_point.to_path_buf()] {
        match host.mount_source(&target).await {
            Ok(None) => {
                tracing::debug!(mount_point = %target.display(), "Not mounted");
                continue;
            },
            Ok(Some(_)) => (),
            Err(err) => {
                tracing::debug!(mount_point = %target.display(), error = ?err, "Could not check mount, unmounting anyway")
            },
        }
        if let Err(err) = host.unmount(&target).await {
            tracing::warn!(mount_point = %target.display(), error = ?err, "Could not unmount");
        }
    }

    if let Some(swap) = swap {
        match activate_swap::swap_is_active(host, swap).await {
            Ok(false) => tracing::debug!(device = %swap.display(), "Swap not active"),
            Ok(true) | Err(_) => {
                if let Err(err) = host.swap_off(swap).await {
                    tracing::warn!(device = %swap.display(), error = ?err, "Could not disable swap");
                }
            },
        }
    }

    if let Err(err) = host.swap_off_all().await {
        tracing::warn!(error = ?err, "Could not disable all swap");
    }
}

#[async_trait::async_trait]
impl Action for ProvisionDisk {
    fn action_tag() -> ActionTag {
        ActionTag("provision_disk")
    }
    fn tracing_synopsis(&self) -> String {
        format!(
            "Partition `{}` and mount it at `{}`",
            self.disk.display(),
            self.mount_point.display()
        )
    }

    fn tracing_span(&self) -> Span {
        span!(
            tracing::Level::DEBUG,
            "provision_disk",
            disk = %self.disk.display(),
            mount_point = %self.mount_point.display(),
        )
    }

    fn execute_description(&self) -> Vec<ActionDescription> {
        let Self {
            prepare_target,
            write_partition_table,
            settle_devices,
            format_partitions,
            mount_root,
            mount_boot,
            activate_swap,
            ..
        } = &self;

        let mut buf = Vec::default();
        buf.append(&mut prepare_target.describe_execute());
        buf.append(&mut write_partition_table.describe_execute());
        buf.append(&mut settle_devices.describe_execute());
        for format_partition in format_partitions {
            buf.append(&mut format_partition.describe_execute());
        }
        buf.append(&mut mount_root.describe_execute());
        buf.append(&mut mount_boot.describe_execute());
        buf.append(&mut activate_swap.describe_execute());
        buf
    }

    #[tracing::instrument(level = "debug", skip_all, fields(disk = %self.disk.display()))]
    async fn execute(&mut self, host: &dyn Host) -> Result<(), ActionError> {
        // Nothing is acquired before the target is prepared, so a refusal is not rolled back
        self.prepare_target
            .try_execute(host)
            .await
            .map_err(Self::error)?;

        if let Err(err) = self.execute_steps(host).await {
            tracing::error!("Provisioning failed, rolling back");
            self.roll_back(host).await;
            return Err(Self::error(err));
        }
        Ok(())
    }

    fn revert_description(&self) -> Vec<ActionDescription> {
        let mut buf = Vec::default();
        buf.append(&mut self.activate_swap.describe_revert());
        buf.append(&mut self.mount_boot.describe_revert());
        buf.append(&mut self.mount_root.describe_revert());
        buf
    }

    #[tracing::instrument(level = "debug", skip_all, fields(disk = %self.disk.display()))]
    async fn revert(&mut self, host: &dyn Host) -> Result<(), ActionError> {
        self.roll_back(host).await;
        Ok(())
    }
}
