use std::{
    os::unix::fs::FileTypeExt,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use tokio::process::Command;

use super::{Filesystem, Host, RereadMethod};
use crate::{
    action::ActionErrorKind, device::DeviceState, execute_command, execute_command_with_stdin,
};

const PROC_SWAPS: &str = "/proc/swaps";

/// A [`Host`] which runs the real tools against the real machine
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxHost;

fn command(program: &str) -> Command {
    let mut command = Command::new(program);
    // Out of the terminal's process group, so cancelling has to kill it explicitly
    command.process_group(0).kill_on_drop(true);
    command.stdin(Stdio::null());
    command
}

/// The formatter and its arguments for `filesystem`
pub(crate) fn formatter_args(
    filesystem: Filesystem,
    device: &Path,
    label: &str,
) -> (&'static str, Vec<String>) {
    let device = device.display().to_string();
    let label = label.to_string();
    match filesystem {
        Filesystem::Vfat => (
            "mkfs.fat",
            vec!["-F".into(), "32".into(), "-n".into(), label, device],
        ),
        Filesystem::Ext4 => ("mkfs.ext4", vec!["-F".into(), "-L".into(), label, device]),
        Filesystem::Btrfs => ("mkfs.btrfs", vec!["-f".into(), "-L".into(), label, device]),
        Filesystem::Xfs => ("mkfs.xfs", vec!["-f".into(), "-L".into(), label, device]),
        Filesystem::Swap => ("mkswap", vec!["-f".into(), "-L".into(), label, device]),
    }
}

pub(crate) fn installer_args(root: &Path, flake: &str) -> Vec<String> {
    vec![
        "--no-root-passwd".into(),
        "--root".into(),
        root.display().to_string(),
        "--flake".into(),
        flake.to_string(),
    ]
}

/// Parse the device column of `/proc/swaps`
pub(crate) fn parse_proc_swaps(contents: &str) -> Vec<PathBuf> {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        // Spaces in names are escaped by the kernel
        .map(|name| PathBuf::from(name.replace("\\040", " ")))
        .collect()
}

/// `findmnt` reports btrfs subvolumes as `/dev/sda2[/root]`
fn strip_subvolume(source: &str) -> &str {
    match source.find('[') {
        Some(idx) if source.ends_with(']') => &source[..idx],
        _ => source,
    }
}

#[async_trait::async_trait]
impl Host for LinuxHost {
    #[tracing::instrument(level = "debug", skip_all, fields(disk = %disk.display()))]
    async fn disk_size(&self, disk: &Path) -> Result<u64, ActionErrorKind> {
        let mut cmd = command("blockdev");
        cmd.arg("--getsize64").arg(disk);
        let output = execute_command(&mut cmd).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .trim()
            .parse::<u64>()
            .map_err(|_| ActionErrorKind::ParseDiskSize {
                command: format!("{:?}", cmd.as_std()),
                output: stdout.trim().to_string(),
            })
    }

    async fn probe(&self, path: &Path) -> DeviceState {
        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.file_type().is_block_device() => DeviceState::BlockDevice,
            Ok(_) => DeviceState::NotBlockDevice,
            Err(_) => DeviceState::Missing,
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(mount_point = %mount_point.display()))]
    async fn mount_source(&self, mount_point: &Path) -> Result<Option<PathBuf>, ActionErrorKind> {
        let mut cmd = command("findmnt");
        cmd.args(["-n", "-o", "SOURCE", "--mountpoint"])
            .arg(mount_point);
        let output = cmd
            .output()
            .await
            .map_err(|e| ActionErrorKind::command(&cmd, e))?;
        let source = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .unwrap_or_default();

        match (output.status.code(), source.is_empty()) {
            (Some(0), false) => Ok(Some(PathBuf::from(strip_subvolume(&source)))),
            // Nothing mounted there
            (Some(1), true) | (Some(0), true) => Ok(None),
            _ => Err(ActionErrorKind::command_output(&cmd, output)),
        }
    }

    async fn unmount(&self, mount_point: &Path) -> Result<(), ActionErrorKind> {
        execute_command(command("umount").arg(mount_point)).await?;
        Ok(())
    }

    async fn swap_on(&self, device: &Path) -> Result<(), ActionErrorKind> {
        execute_command(command("swapon").arg(device)).await?;
        Ok(())
    }

    async fn swap_off(&self, device: &Path) -> Result<(), ActionErrorKind> {
        execute_command(command("swapoff").arg(device)).await?;
        Ok(())
    }

    async fn swap_off_all(&self) -> Result<(), ActionErrorKind> {
        execute_command(command("swapoff").arg("-a")).await?;
        Ok(())
    }

    async fn active_swaps(&self) -> Result<Vec<PathBuf>, ActionErrorKind> {
        let contents = tokio::fs::read_to_string(PROC_SWAPS)
            .await
            .map_err(|e| ActionErrorKind::Read(PathBuf::from(PROC_SWAPS), e))?;
        Ok(parse_proc_swaps(&contents))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(disk = %disk.display()))]
    async fn write_partition_table(
        &self,
        disk: &Path,
        script: &str,
    ) -> Result<(), ActionErrorKind> {
        let mut cmd = Command::new("sfdisk");
        cmd.process_group(0)
            .kill_on_drop(true)
            .args(["--wipe", "always", "--wipe-partitions", "always"])
            .arg(disk);
        execute_command_with_stdin(&mut cmd, script).await?;
        Ok(())
    }

    async fn reread_partition_table(
        &self,
        disk: &Path,
        method: RereadMethod,
    ) -> Result<(), ActionErrorKind> {
        let mut cmd = match method {
            RereadMethod::Partprobe => command("partprobe"),
            RereadMethod::Blockdev => {
                let mut cmd = command("blockdev");
                cmd.arg("--rereadpt");
                cmd
            },
        };
        execute_command(cmd.arg(disk)).await?;
        Ok(())
    }

    async fn trigger_device_scan(&self) -> Result<(), ActionErrorKind> {
        execute_command(command("udevadm").arg("trigger")).await?;
        Ok(())
    }

    async fn wait_device_settle(&self) -> Result<(), ActionErrorKind> {
        execute_command(command("udevadm").arg("settle")).await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(device = %device.display(), %filesystem))]
    async fn format(
        &self,
        device: &Path,
        filesystem: Filesystem,
        label: &str,
    ) -> Result<(), ActionErrorKind> {
        let (program, args) = formatter_args(filesystem, device, label);
        execute_command(command(program).args(args)).await?;
        Ok(())
    }

    async fn mount(
        &self,
        device: &Path,
        mount_point: &Path,
        options: Option<&str>,
    ) -> Result<(), ActionErrorKind> {
        let mut cmd = command("mount");
        if let Some(options) = options {
            cmd.args(["-o", options]);
        }
        execute_command(cmd.arg(device).arg(mount_point)).await?;
        Ok(())
    }

    async fn generate_hardware_config(&self, root: &Path) -> Result<String, ActionErrorKind> {
        let output = execute_command(
            command("nixos-generate-config")
                .arg("--root")
                .arg(root)
                .arg("--show-hardware-config"),
        )
        .await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(root = %root.display(), flake = %flake))]
    async fn run_installer(
        &self,
        root: &Path,
        flake: &str,
        log: &Path,
    ) -> Result<Option<i32>, ActionErrorKind> {
        let log_file = std::fs::File::create(log)
            .map_err(|e| ActionErrorKind::Write(log.to_path_buf(), e))?;
        let log_stderr = log_file
            .try_clone()
            .map_err(|e| ActionErrorKind::Write(log.to_path_buf(), e))?;

        let mut cmd = command("nixos-install");
        cmd.args(installer_args(root, flake))
            .stdout(log_file)
            .stderr(log_stderr)
            .kill_on_drop(true);
        tracing::trace!(command = ?cmd.as_std(), "Spawning");

        let mut child = cmd.spawn().map_err(|e| ActionErrorKind::command(&cmd, e))?;
        let status = child
            .wait()
            .await
            .map_err(|e| ActionErrorKind::command(&cmd, e))?;
        Ok(status.code())
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}
