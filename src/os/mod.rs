/*! The machine being provisioned

Every external tool the pipeline runs, and every probe of device or mount state, goes
through a [`Host`]. [`LinuxHost`] does the real thing; tests drive the same actions against
an in-memory fake.
*/

mod linux;
#[cfg(test)]
pub(crate) mod fake;

pub use linux::LinuxHost;

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{action::ActionErrorKind, device::DeviceState};

/// A filesystem the formatter knows how to create
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, strum::Display,
)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Filesystem {
    #[cfg_attr(feature = "cli", value(skip))]
    Vfat,
    Ext4,
    Btrfs,
    Xfs,
    #[cfg_attr(feature = "cli", value(skip))]
    Swap,
}

/// The ways of asking the kernel to re-read a partition table, in order of preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumIter)]
pub enum RereadMethod {
    #[strum(serialize = "partprobe")]
    Partprobe,
    #[strum(serialize = "blockdev --rereadpt")]
    Blockdev,
}

#[async_trait::async_trait]
pub trait Host: Send + Sync {
    /// Size of a block device in bytes
    async fn disk_size(&self, disk: &Path) -> Result<u64, ActionErrorKind>;
    async fn probe(&self, path: &Path) -> DeviceState;
    /// The device mounted at `mount_point`, if anything is
    async fn mount_source(&self, mount_point: &Path) -> Result<Option<PathBuf>, ActionErrorKind>;
    async fn unmount(&self, mount_point: &Path) -> Result<(), ActionErrorKind>;
    async fn swap_on(&self, device: &Path) -> Result<(), ActionErrorKind>;
    async fn swap_off(&self, device: &Path) -> Result<(), ActionErrorKind>;
    async fn swap_off_all(&self) -> Result<(), ActionErrorKind>;
    /// Devices currently used as swap
    async fn active_swaps(&self) -> Result<Vec<PathBuf>, ActionErrorKind>;
    /// Replace the partition table of `disk` with the one described by the sfdisk `script`
    async fn write_partition_table(&self, disk: &Path, script: &str)
        -> Result<(), ActionErrorKind>;
    async fn reread_partition_table(
        &self,
        disk: &Path,
        method: RereadMethod,
    ) -> Result<(), ActionErrorKind>;
    async fn trigger_device_scan(&self) -> Result<(), ActionErrorKind>;
    /// Wait for queued device events to be processed
    async fn wait_device_settle(&self) -> Result<(), ActionErrorKind>;
    async fn format(
        &self,
        device: &Path,
        filesystem: Filesystem,
        label: &str,
    ) -> Result<(), ActionErrorKind>;
    async fn mount(
        &self,
        device: &Path,
        mount_point: &Path,
        options: Option<&str>,
    ) -> Result<(), ActionErrorKind>;
    /// The hardware configuration detected for the system mounted at `root`
    async fn generate_hardware_config(&self, root: &Path) -> Result<String, ActionErrorKind>;
    /// Run `nixos-install`, writing its output to `log`
    ///
    /// Returns the exit code, `None` if it was killed by a signal.
    async fn run_installer(
        &self,
        root: &Path,
        flake: &str,
        log: &Path,
    ) -> Result<Option<i32>, ActionErrorKind>;
    async fn sleep(&self, duration: Duration);
}
