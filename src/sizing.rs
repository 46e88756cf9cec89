/*! Sizing of the EFI, root and swap partitions

All arithmetic is in whole MiB. The layout is computed from the disk size alone and never
touches a device, so it can be checked before anything destructive happens.
*/

/// Bytes in a MiB
pub const MIB: u64 = 1024 * 1024;
/// Offset of the first partition, keeping it aligned and leaving room for the primary GPT
pub const ALIGNMENT_MIB: u64 = 1;

pub const DEFAULT_EFI_MIB: u64 = 512;
pub const DEFAULT_EFI_FALLBACK_MIB: u64 = 256;
pub const DEFAULT_SWAP_MIB: u64 = 16384;
pub const DEFAULT_MIN_ROOT_MIB: u64 = 20480;
pub const DEFAULT_SWAP_FLOOR_MIB: u64 = 512;

/// The sizes the layout aims for
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::Args))]
pub struct SizingPolicy {
    /// Size of the EFI system partition in MiB
    #[cfg_attr(
        feature = "cli",
        clap(long, default_value_t = DEFAULT_EFI_MIB, env = "NIXOS_PROVISION_EFI_MIB", global = true)
    )]
    pub efi_mib: u64,
    /// Size of the EFI system partition in MiB when the preferred size does not fit
    #[cfg_attr(
        feature = "cli",
        clap(
            long,
            default_value_t = DEFAULT_EFI_FALLBACK_MIB,
            env = "NIXOS_PROVISION_EFI_FALLBACK_MIB",
            global = true
        )
    )]
    pub efi_fallback_mib: u64,
    /// Size of the swap partition in MiB
    #[cfg_attr(
        feature = "cli",
        clap(long, default_value_t = DEFAULT_SWAP_MIB, env = "NIXOS_PROVISION_SWAP_MIB", global = true)
    )]
    pub swap_mib: u64,
    /// Smallest acceptable root partition in MiB
    #[cfg_attr(
        feature = "cli",
        clap(
            long,
            default_value_t = DEFAULT_MIN_ROOT_MIB,
            env = "NIXOS_PROVISION_MIN_ROOT_MIB",
            global = true
        )
    )]
    pub min_root_mib: u64,
    /// Smallest acceptable swap partition in MiB, should swap need to shrink
    #[cfg_attr(
        feature = "cli",
        clap(
            long,
            default_value_t = DEFAULT_SWAP_FLOOR_MIB,
            env = "NIXOS_PROVISION_SWAP_FLOOR_MIB",
            global = true
        )
    )]
    pub swap_floor_mib: u64,
}

impl Default for SizingPolicy {
    fn default() -> Self {
        Self {
            efi_mib: DEFAULT_EFI_MIB,
            efi_fallback_mib: DEFAULT_EFI_FALLBACK_MIB,
            swap_mib: DEFAULT_SWAP_MIB,
            min_root_mib: DEFAULT_MIN_ROOT_MIB,
            swap_floor_mib: DEFAULT_SWAP_FLOOR_MIB,
        }
    }
}

/// A contiguous run of the disk, in MiB
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Region {
    pub start_mib: u64,
    pub size_mib: u64,
}

impl Region {
    pub fn end_mib(&self) -> u64 {
        self.start_mib + self.size_mib
    }
}

/// The computed EFI, root and swap regions, in physical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PartitionLayout {
    pub efi: Region,
    pub root: Region,
    pub swap: Region,
}

#[non_exhaustive]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SizingError {
    #[error("`{0}` is not a valid disk size, expected a positive number of bytes")]
    InvalidDiskSize(String),
    #[error(
        "The disk is too small: it has {disk_mib} MiB, but at least {required_mib} MiB are required"
    )]
    DiskTooSmall { disk_mib: u64, required_mib: u64 },
    #[error(
        "The root partition would only be {root_mib} MiB, but at least {min_root_mib} MiB are required"
    )]
    RootTooSmall { root_mib: u64, min_root_mib: u64 },
}

/// Parse a disk size given in bytes, as used by `--disk-size-bytes`
pub fn parse_disk_size(value: &str) -> Result<u64, SizingError> {
    match value.trim().parse::<u64>() {
        Ok(bytes) if bytes > 0 => Ok(bytes),
        _ => Err(SizingError::InvalidDiskSize(value.to_string())),
    }
}

/// Compute the partition layout of a disk of `total_bytes`
#[tracing::instrument(level = "debug", skip(policy))]
pub fn compute_layout(
    total_bytes: u64,
    policy: &SizingPolicy,
) -> Result<PartitionLayout, SizingError> {
    if total_bytes == 0 {
        return Err(SizingError::InvalidDiskSize(total_bytes.to_string()));
    }
    let disk_mib = total_bytes / MIB;

    let required = |efi_mib: u64| required_mib(&[efi_mib, policy.swap_mib, policy.min_root_mib]);

    let mut efi_mib = policy.efi_mib;
    if required(efi_mib) > disk_mib {
        tracing::debug!(
            disk_mib,
            efi_mib,
            fallback_efi_mib = policy.efi_fallback_mib,
            "Preferred EFI size does not fit, retrying with the fallback size"
        );
        efi_mib = policy.efi_fallback_mib;
        if required(efi_mib) > disk_mib {
            return Err(SizingError::DiskTooSmall {
                disk_mib,
                required_mib: required(efi_mib),
            });
        }
    }

    layout(disk_mib, efi_mib, policy.swap_mib, policy)
}

/// The alignment offset plus `sizes`, saturating so absurd sizes simply never fit
fn required_mib(sizes: &[u64]) -> u64 {
    sizes
        .iter()
        .fold(ALIGNMENT_MIB, |total, size| total.saturating_add(*size))
}

/// Place the EFI partition after the alignment offset, swap at the tail and root in between
///
/// Swap is shrunk when it would not fit after the EFI partition, but never below the swap floor.
fn layout(
    disk_mib: u64,
    efi_mib: u64,
    swap_mib: u64,
    policy: &SizingPolicy,
) -> Result<PartitionLayout, SizingError> {
    let too_small = || SizingError::DiskTooSmall {
        disk_mib,
        required_mib: required_mib(&[efi_mib, policy.swap_floor_mib, policy.min_root_mib]),
    };

    let efi = Region {
        start_mib: ALIGNMENT_MIB,
        size_mib: efi_mib,
    };
    let root_start = efi.end_mib();
    let remaining = disk_mib.checked_sub(root_start).ok_or_else(too_small)?;

    let mut swap_mib = swap_mib;
    if remaining < swap_mib {
        swap_mib = remaining.saturating_sub(1);
        tracing::debug!(swap_mib, "Shrinking swap to fit the disk");
        if swap_mib < policy.swap_floor_mib {
            return Err(too_small());
        }
    }

    let swap_start = disk_mib - swap_mib;
    if swap_start <= root_start {
        return Err(too_small());
    }

    let root_mib = swap_start - root_start;
    if root_mib < policy.min_root_mib {
        return Err(SizingError::RootTooSmall {
            root_mib,
            min_root_mib: policy.min_root_mib,
        });
    }

    Ok(PartitionLayout {
        efi,
        root: Region {
            start_mib: root_start,
            size_mib: root_mib,
        },
        swap: Region {
            start_mib: swap_start,
            size_mib: swap_mib,
        },
    })
}

#[cfg(test)]
mod test {
    use super::*;

    const GIB: u64 = 1024 * MIB;

    #[test]
    fn hundred_gib_disk() -> eyre::Result<()> {
        let layout = compute_layout(100 * GIB, &SizingPolicy::default())?;
        assert_eq!(
            layout.efi,
            Region {
                start_mib: 1,
                size_mib: 512
            }
        );
        assert_eq!(
            layout.root,
            Region {
                start_mib: 513,
                size_mib: 85503
            }
        );
        assert_eq!(
            layout.swap,
            Region {
                start_mib: 86016,
                size_mib: 16384
            }
        );
        Ok(())
    }

    #[test]
    fn ten_gib_disk_is_too_small() {
        let err = compute_layout(10 * GIB, &SizingPolicy::default()).unwrap_err();
        assert_eq!(
            err,
            SizingError::DiskTooSmall {
                disk_mib: 10240,
                required_mib: 1 + 256 + 16384 + 20480,
            }
        );
    }

    #[test]
    fn zero_bytes_is_invalid() {
        assert!(matches!(
            compute_layout(0, &SizingPolicy::default()),
            Err(SizingError::InvalidDiskSize(_))
        ));
    }

    #[test]
    fn falls_back_to_the_smaller_efi_partition() -> eyre::Result<()> {
        let policy = SizingPolicy::default();
        // Fits with a 256 MiB EFI partition, but not with 512 MiB
        let disk_mib = 1 + 256 + 16384 + 20480 + 100;
        let layout = compute_layout(disk_mib * MIB, &policy)?;
        assert_eq!(layout.efi.size_mib, 256);
        assert_eq!(layout.root.start_mib, 257);
        assert_eq!(layout.root.size_mib, 20480 + 100);
        assert_eq!(layout.swap.end_mib(), disk_mib);

        // The smallest disk which still takes the preferred size
        let disk_mib = 1 + 512 + 16384 + 20480;
        let layout = compute_layout(disk_mib * MIB, &policy)?;
        assert_eq!(layout.efi.size_mib, 512);
        assert_eq!(layout.root.size_mib, 20480);
        Ok(())
    }

    #[test]
    fn layouts_hold_their_shape() -> eyre::Result<()> {
        let policy = SizingPolicy::default();
        let smallest = 1 + 256 + 16384 + 20480;
        for disk_mib in (smallest..smallest + 2048)
            .chain((40..=4096).step_by(37).map(|gib| gib * 1024))
        {
            // A few stray bytes past the last MiB must not matter
            let layout = compute_layout(disk_mib * MIB + 4095, &policy)?;
            assert_eq!(layout.efi.start_mib, ALIGNMENT_MIB);
            assert_eq!(layout.root.start_mib, layout.efi.end_mib());
            assert_eq!(layout.swap.start_mib, layout.root.end_mib());
            assert!(layout.swap.end_mib() <= disk_mib);
            assert!(layout.root.size_mib >= policy.min_root_mib);
            assert!(layout.swap.size_mib >= policy.swap_floor_mib);
        }
        Ok(())
    }

    #[test]
    fn swap_shrinks_to_fit() -> eyre::Result<()> {
        let policy = SizingPolicy {
            min_root_mib: 1,
            ..Default::default()
        };
        let layout = layout(4096, 512, 8192, &policy)?;
        assert_eq!(layout.swap.size_mib, 4096 - 513 - 1);
        assert_eq!(layout.root.start_mib, 513);
        assert_eq!(layout.root.size_mib, 1);

        // What is left for root after shrinking is then held to the minimum
        let policy = SizingPolicy {
            min_root_mib: 1024,
            ..Default::default()
        };
        assert_eq!(
            super::layout(4096, 512, 8192, &policy),
            Err(SizingError::RootTooSmall {
                root_mib: 1,
                min_root_mib: 1024
            })
        );
        Ok(())
    }

    #[test]
    fn swap_never_shrinks_below_the_floor() {
        let policy = SizingPolicy::default();
        let err = layout(1024, 512, 16384, &policy).unwrap_err();
        assert!(matches!(err, SizingError::DiskTooSmall { disk_mib: 1024, .. }));
    }

    #[test]
    fn huge_sizes_never_fit() {
        let disk = 100 * GIB;
        for policy in [
            SizingPolicy {
                swap_mib: u64::MAX,
                ..Default::default()
            },
            SizingPolicy {
                efi_mib: u64::MAX,
                efi_fallback_mib: u64::MAX,
                ..Default::default()
            },
            SizingPolicy {
                min_root_mib: u64::MAX - 1,
                ..Default::default()
            },
        ] {
            assert_eq!(
                compute_layout(disk, &policy),
                Err(SizingError::DiskTooSmall {
                    disk_mib: 100 * 1024,
                    required_mib: u64::MAX,
                }),
                "{policy:?}"
            );
        }
    }

    #[test]
    fn parses_disk_sizes() {
        assert_eq!(parse_disk_size("107374182400"), Ok(107374182400));
        assert!(parse_disk_size("0").is_err());
        assert!(parse_disk_size("-5").is_err());
        assert!(parse_disk_size("lots").is_err());
    }
}
