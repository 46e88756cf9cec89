//! An in-memory [`Host`] for tests, recording every tool invocation

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use super::{Filesystem, Host, RereadMethod};
use crate::{
    action::ActionErrorKind,
    device::{DeviceNodeSet, DeviceState},
};

/// Where the fake host should fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FailPoint {
    WritePartitionTable,
    /// The partition nodes never show up after the table is written
    NodesNeverAppear,
    Reread,
    Format(Filesystem),
    /// `mount` fails for this mount point
    Mount(PathBuf),
    /// `mount` claims success but the wrong device ends up mounted
    MountWrongDevice(PathBuf),
    SwapOn,
    /// `swapon` claims success but the device is not listed afterwards
    SwapNotListed,
    HardwareConfig,
}

#[derive(Debug, Default)]
pub(crate) struct FakeState {
    pub(crate) calls: Vec<String>,
    /// Mount point to source device
    pub(crate) mounts: BTreeMap<PathBuf, PathBuf>,
    pub(crate) swaps: BTreeSet<PathBuf>,
    pub(crate) devices: BTreeMap<PathBuf, DeviceState>,
    pub(crate) sleeps: Vec<Duration>,
    pub(crate) partition_table: Option<String>,
    settles_until_nodes_appear: Option<usize>,
}

#[derive(Debug)]
pub(crate) struct FakeHost {
    disk: PathBuf,
    disk_size: u64,
    fail: Option<FailPoint>,
    /// Settle rounds after the table is written before the nodes appear
    settle_delay: usize,
    installer_exit: Option<i32>,
    state: Mutex<FakeState>,
}

pub(crate) const HARDWARE_CONFIG: &str =
    "{ config, lib, pkgs, ... }:\n{\n  boot.initrd.availableKernelModules = [ \"nvme\" ];\n}\n";

/// Tools which change the disk or the mount table
const DESTRUCTIVE: &[&str] = &["sfdisk", "mkfs", "mount", "swapon", "umount", "swapoff"];

impl FakeHost {
    pub(crate) fn new(disk: impl Into<PathBuf>, disk_size: u64) -> Self {
        let disk = disk.into();
        let mut state = FakeState::default();
        state
            .devices
            .insert(disk.clone(), DeviceState::BlockDevice);
        Self {
            disk,
            disk_size,
            fail: None,
            settle_delay: 2,
            installer_exit: Some(0),
            state: Mutex::new(state),
        }
    }

    pub(crate) fn failing(mut self, fail: FailPoint) -> Self {
        self.fail = Some(fail);
        self
    }

    pub(crate) fn installer_exit(mut self, code: Option<i32>) -> Self {
        self.installer_exit = code;
        self
    }

    pub(crate) fn with_mount(
        self,
        mount_point: impl Into<PathBuf>,
        source: impl Into<PathBuf>,
    ) -> Self {
        self.state()
            .mounts
            .insert(mount_point.into(), source.into());
        self
    }

    pub(crate) fn with_swap(self, device: impl Into<PathBuf>) -> Self {
        self.state().swaps.insert(device.into());
        self
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Calls which would have changed the disk or mount table
    pub(crate) fn destructive_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| {
                let tool = call.split_whitespace().next().unwrap_or_default();
                DESTRUCTIVE.iter().any(|destructive| tool.starts_with(destructive))
            })
            .collect()
    }

    fn record(&self, call: String) {
        self.state().calls.push(call);
    }

    fn fails(&self, point: &FailPoint) -> bool {
        self.fail.as_ref() == Some(point)
    }

    fn failure(&self, call: &str) -> ActionErrorKind {
        ActionErrorKind::CommandOutput {
            command: call.to_string(),
            code: Some(1),
            stdout: String::new(),
            stderr: format!("injected failure in `{call}`"),
        }
    }
}

#[async_trait::async_trait]
impl Host for FakeHost {
    async fn disk_size(&self, disk: &Path) -> Result<u64, ActionErrorKind> {
        self.record(format!("blockdev --getsize64 {}", disk.display()));
        Ok(self.disk_size)
    }

    async fn probe(&self, path: &Path) -> DeviceState {
        self.state()
            .devices
            .get(path)
            .copied()
            .unwrap_or(DeviceState::Missing)
    }

    async fn mount_source(&self, mount_point: &Path) -> Result<Option<PathBuf>, ActionErrorKind> {
        Ok(self.state().mounts.get(mount_point).cloned())
    }

    async fn unmount(&self, mount_point: &Path) -> Result<(), ActionErrorKind> {
        let call = format!("umount {}", mount_point.display());
        self.record(call.clone());
        match self.state().mounts.remove(mount_point) {
            Some(_) => Ok(()),
            None => Err(self.failure(&call)),
        }
    }

    async fn swap_on(&self, device: &Path) -> Result<(), ActionErrorKind> {
        let call = format!("swapon {}", device.display());
        self.record(call.clone());
        if self.fails(&FailPoint::SwapOn) {
            return Err(self.failure(&call));
        }
        if !self.fails(&FailPoint::SwapNotListed) {
            self.state().swaps.insert(device.to_path_buf());
        }
        Ok(())
    }

    async fn swap_off(&self, device: &Path) -> Result<(), ActionErrorKind> {
        let call = format!("swapoff {}", device.display());
        self.record(call.clone());
        match self.state().swaps.remove(device) {
            true => Ok(()),
            false => Err(self.failure(&call)),
        }
    }

    async fn swap_off_all(&self) -> Result<(), ActionErrorKind> {
        self.record("swapoff -a".to_string());
        self.state().swaps.clear();
        Ok(())
    }

    async fn active_swaps(&self) -> Result<Vec<PathBuf>, ActionErrorKind> {
        Ok(self.state().swaps.iter().cloned().collect())
    }

    async fn write_partition_table(
        &self,
        disk: &Path,
        script: &str,
    ) -> Result<(), ActionErrorKind> {
        let call = format!(
            "sfdisk --wipe always --wipe-partitions always {}",
            disk.display()
        );
        self.record(call.clone());
        if self.fails(&FailPoint::WritePartitionTable) {
            return Err(self.failure(&call));
        }
        let mut state = self.state();
        state.partition_table = Some(script.to_string());
        if !self.fails(&FailPoint::NodesNeverAppear) {
            state.settles_until_nodes_appear = Some(self.settle_delay);
        }
        Ok(())
    }

    async fn reread_partition_table(
        &self,
        disk: &Path,
        method: RereadMethod,
    ) -> Result<(), ActionErrorKind> {
        let call = format!("{method} {}", disk.display());
        self.record(call.clone());
        match self.fails(&FailPoint::Reread) {
            true => Err(self.failure(&call)),
            false => Ok(()),
        }
    }

    async fn trigger_device_scan(&self) -> Result<(), ActionErrorKind> {
        self.record("udevadm trigger".to_string());
        Ok(())
    }

    async fn wait_device_settle(&self) -> Result<(), ActionErrorKind> {
        self.record("udevadm settle".to_string());
        let mut state = self.state();
        match state.settles_until_nodes_appear {
            Some(0) => {
                for node in DeviceNodeSet::for_disk(&self.disk).iter() {
                    state
                        .devices
                        .insert(node.to_path_buf(), DeviceState::BlockDevice);
                }
                state.settles_until_nodes_appear = None;
            },
            Some(remaining) => state.settles_until_nodes_appear = Some(remaining - 1),
            None => (),
        }
        Ok(())
    }

    async fn format(
        &self,
        device: &Path,
        filesystem: Filesystem,
        label: &str,
    ) -> Result<(), ActionErrorKind> {
        let call = format!("mkfs.{filesystem} -L {label} {}", device.display());
        self.record(call.clone());
        match self.fails(&FailPoint::Format(filesystem)) {
            true => Err(self.failure(&call)),
            false => Ok(()),
        }
    }

    async fn mount(
        &self,
        device: &Path,
        mount_point: &Path,
        options: Option<&str>,
    ) -> Result<(), ActionErrorKind> {
        let call = match options {
            Some(options) => format!(
                "mount -o {options} {} {}",
                device.display(),
                mount_point.display()
            ),
            None => format!("mount {} {}", device.display(), mount_point.display()),
        };
        self.record(call.clone());
        if self.fails(&FailPoint::Mount(mount_point.to_path_buf())) {
            return Err(self.failure(&call));
        }
        let source = match self.fails(&FailPoint::MountWrongDevice(mount_point.to_path_buf())) {
            true => PathBuf::from("/dev/mapper/somewhere-else"),
            false => device.to_path_buf(),
        };
        self.state()
            .mounts
            .insert(mount_point.to_path_buf(), source);
        Ok(())
    }

    async fn generate_hardware_config(&self, root: &Path) -> Result<String, ActionErrorKind> {
        let call = format!(
            "nixos-generate-config --root {} --show-hardware-config",
            root.display()
        );
        self.record(call.clone());
        match self.fails(&FailPoint::HardwareConfig) {
            true => Err(self.failure(&call)),
            false => Ok(HARDWARE_CONFIG.to_string()),
        }
    }

    async fn run_installer(
        &self,
        root: &Path,
        flake: &str,
        log: &Path,
    ) -> Result<Option<i32>, ActionErrorKind> {
        self.record(format!(
            "nixos-install --no-root-passwd --root {} --flake {flake}",
            root.display()
        ));
        tokio::fs::write(log, b"building the system configuration...\n")
            .await
            .map_err(|e| ActionErrorKind::Write(log.to_path_buf(), e))?;
        Ok(self.installer_exit)
    }

    async fn sleep(&self, duration: Duration) {
        self.state().sleeps.push(duration);
    }
}
