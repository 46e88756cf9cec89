/*! Naming of partition device nodes

The kernel names the partitions of a disk whose name ends in a digit (`nvme0n1`, `loop0`,
`mmcblk0`) with a `p` separator, `nvme0n1p1`, and all others by appending the number,
`sda1`. The persistent links udev creates under `/dev/disk/by-id/` and the other `by-`
directories instead use `-part1`.
*/

use std::path::{Path, PathBuf};

/// Ordinal of the EFI partition
pub const EFI_ORDINAL: u32 = 1;
/// Ordinal of the root partition
pub const ROOT_ORDINAL: u32 = 2;
/// Ordinal of the swap partition
pub const SWAP_ORDINAL: u32 = 3;

const PERSISTENT_LINK_PREFIX: &str = "/dev/disk/by-";

/// The device node of partition `ordinal` of `disk`
pub fn partition_path(disk: &Path, ordinal: u32) -> PathBuf {
    let disk_str = disk.to_string_lossy();
    if disk_str.starts_with(PERSISTENT_LINK_PREFIX) {
        return PathBuf::from(format!("{disk_str}-part{ordinal}"));
    }

    match disk_str.chars().last() {
        Some(last) if last.is_ascii_digit() => PathBuf::from(format!("{disk_str}p{ordinal}")),
        _ => PathBuf::from(format!("{disk_str}{ordinal}")),
    }
}

/// Whether `candidate` names a partition of `disk`, judged by name alone
pub fn is_partition_of(disk: &Path, candidate: &Path) -> bool {
    let disk_str = disk.to_string_lossy();
    let candidate_str = candidate.to_string_lossy();
    let Some(rest) = candidate_str.strip_prefix(disk_str.as_ref()) else {
        return false;
    };

    let all_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    let ends_in_digit = disk_str
        .chars()
        .last()
        .map(|c| c.is_ascii_digit())
        .unwrap_or(false);

    if disk_str.starts_with(PERSISTENT_LINK_PREFIX) {
        rest.strip_prefix("-part").map(all_digits).unwrap_or(false)
    } else if ends_in_digit {
        rest.strip_prefix('p').map(all_digits).unwrap_or(false)
    } else {
        all_digits(rest)
    }
}

/// The device nodes of the three partitions, derived from the disk path
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeviceNodeSet {
    pub efi: PathBuf,
    pub root: PathBuf,
    pub swap: PathBuf,
}

impl DeviceNodeSet {
    pub fn for_disk(disk: &Path) -> Self {
        Self {
            efi: partition_path(disk, EFI_ORDINAL),
            root: partition_path(disk, ROOT_ORDINAL),
            swap: partition_path(disk, SWAP_ORDINAL),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        [self.efi.as_path(), self.root.as_path(), self.swap.as_path()].into_iter()
    }
}

/// What a probe of a device path found
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, strum::Display,
)]
pub enum DeviceState {
    #[strum(serialize = "is a block device")]
    BlockDevice,
    #[strum(serialize = "exists but is not a block device")]
    NotBlockDevice,
    #[strum(serialize = "is missing")]
    Missing,
}

/// Whether two device paths refer to the same node, following symlinks like `/dev/disk/by-id/...`
pub async fn same_device(left: &Path, right: &Path) -> bool {
    if left == right {
        return true;
    }
    match (
        tokio::fs::canonicalize(left).await,
        tokio::fs::canonicalize(right).await,
    ) {
        (Ok(left), Ok(right)) => left == right,
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partition_paths() {
        let cases = [
            ("/dev/nvme0n1", 1, "/dev/nvme0n1p1"),
            ("/dev/nvme0n1", 3, "/dev/nvme0n1p3"),
            ("/dev/loop0", 2, "/dev/loop0p2"),
            ("/dev/mmcblk7", 2, "/dev/mmcblk7p2"),
            ("/dev/sda", 1, "/dev/sda1"),
            ("/dev/vdb", 10, "/dev/vdb10"),
            (
                "/dev/disk/by-id/ata-SAMSUNG_SSD_870",
                2,
                "/dev/disk/by-id/ata-SAMSUNG_SSD_870-part2",
            ),
            (
                "/dev/disk/by-path/pci-0000:00:1f.2-ata-1",
                1,
                "/dev/disk/by-path/pci-0000:00:1f.2-ata-1-part1",
            ),
        ];
        for (disk, ordinal, expected) in cases {
            assert_eq!(
                partition_path(Path::new(disk), ordinal),
                PathBuf::from(expected),
                "{disk} partition {ordinal}"
            );
            // Same input, same output
            assert_eq!(
                partition_path(Path::new(disk), ordinal),
                partition_path(Path::new(disk), ordinal)
            );
        }
    }

    #[test]
    fn node_set_is_in_ordinal_order() {
        let nodes = DeviceNodeSet::for_disk(Path::new("/dev/nvme0n1"));
        assert_eq!(
            nodes.iter().collect::<Vec<_>>(),
            vec![
                Path::new("/dev/nvme0n1p1"),
                Path::new("/dev/nvme0n1p2"),
                Path::new("/dev/nvme0n1p3")
            ]
        );
    }

    #[test]
    fn partitions_of_a_disk() {
        let sda = Path::new("/dev/sda");
        assert!(is_partition_of(sda, Path::new("/dev/sda1")));
        assert!(is_partition_of(sda, Path::new("/dev/sda12")));
        assert!(!is_partition_of(sda, Path::new("/dev/sda")));
        assert!(!is_partition_of(sda, Path::new("/dev/sdb1")));
        assert!(!is_partition_of(sda, Path::new("/dev/sdaa1")));

        let nvme = Path::new("/dev/nvme0n1");
        assert!(is_partition_of(nvme, Path::new("/dev/nvme0n1p2")));
        assert!(!is_partition_of(nvme, Path::new("/dev/nvme0n12")));
        assert!(!is_partition_of(nvme, Path::new("/dev/nvme0n1p")));

        let by_id = Path::new("/dev/disk/by-id/wwn-0x5002538e");
        assert!(is_partition_of(by_id, Path::new("/dev/disk/by-id/wwn-0x5002538e-part3")));
        assert!(!is_partition_of(by_id, Path::new("/dev/disk/by-id/wwn-0x5002538e3")));
    }

    #[tokio::test]
    async fn same_device_follows_links() -> eyre::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let node = temp_dir.path().join("sda1");
        tokio::fs::write(&node, b"").await?;
        let link = temp_dir.path().join("by-label-nixos");
        tokio::fs::symlink(&node, &link).await?;

        assert!(same_device(&node, &node).await);
        assert!(same_device(&link, &node).await);
        assert!(!same_device(&link, &temp_dir.path().join("sda2")).await);
        Ok(())
    }
}
