/*! Turning a disk into a concrete [`PartitionPlan`]

The plan is computed once per run, before anything is written, and rendered as an
`sfdisk` script for [`WritePartitionTable`](crate::action::provision::WritePartitionTable).
*/

use std::{
    error::Error,
    fmt::Write as _,
    path::{Path, PathBuf},
};

use crate::{
    action::{ActionError, ActionErrorKind},
    device::{DeviceNodeSet, DeviceState, EFI_ORDINAL, ROOT_ORDINAL, SWAP_ORDINAL},
    os::Host,
    sizing::{compute_layout, SizingError, SizingPolicy, MIB},
    HasExpectedErrors,
};

pub const EFI_SYSTEM_TYPE_GUID: &str = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B";
pub const LINUX_FILESYSTEM_TYPE_GUID: &str = "0FC63DAF-8483-4772-8E79-3D69D8477DE4";
pub const LINUX_SWAP_TYPE_GUID: &str = "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F";

/// The disk being provisioned
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DiskSpec {
    pub path: PathBuf,
    pub total_bytes: u64,
}

impl DiskSpec {
    /// Measure `path`, or take `size_override` as its size without touching the device
    #[tracing::instrument(level = "debug", skip(host))]
    pub async fn read(
        host: &dyn Host,
        path: &Path,
        size_override: Option<u64>,
    ) -> Result<Self, PlannerError> {
        let total_bytes = match size_override {
            Some(0) => return Err(SizingError::InvalidDiskSize("0".to_string()).into()),
            Some(bytes) => bytes,
            None => {
                match host.probe(path).await {
                    DeviceState::BlockDevice => (),
                    _ => return Err(PlannerError::NotBlockDevice(path.to_path_buf())),
                }
                host.disk_size(path)
                    .await
                    .map_err(|kind| PlannerError::DiskSize(path.to_path_buf(), kind))?
            },
        };

        Ok(Self {
            path: path.to_path_buf(),
            total_bytes,
        })
    }

    pub fn total_mib(&self) -> u64 {
        self.total_bytes / MIB
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumIter,
)]
pub enum PartitionRole {
    #[strum(serialize = "EFI")]
    Efi,
    #[strum(serialize = "root")]
    Root,
    #[strum(serialize = "swap")]
    Swap,
}

impl PartitionRole {
    pub fn type_guid(&self) -> &'static str {
        match self {
            PartitionRole::Efi => EFI_SYSTEM_TYPE_GUID,
            PartitionRole::Root => LINUX_FILESYSTEM_TYPE_GUID,
            PartitionRole::Swap => LINUX_SWAP_TYPE_GUID,
        }
    }

    /// The GPT partition name, also used as the filesystem label
    pub fn label(&self) -> &'static str {
        match self {
            PartitionRole::Efi => "EFI",
            PartitionRole::Root => "nixos",
            PartitionRole::Swap => "swap",
        }
    }

    pub fn ordinal(&self) -> u32 {
        match self {
            PartitionRole::Efi => EFI_ORDINAL,
            PartitionRole::Root => ROOT_ORDINAL,
            PartitionRole::Swap => SWAP_ORDINAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PartitionSpec {
    pub role: PartitionRole,
    pub start_mib: u64,
    pub size_mib: u64,
    pub type_guid: String,
    pub label: String,
}

impl PartitionSpec {
    fn new(role: PartitionRole, start_mib: u64, size_mib: u64) -> Self {
        Self {
            role,
            start_mib,
            size_mib,
            type_guid: role.type_guid().to_string(),
            label: role.label().to_string(),
        }
    }
}

/// The EFI, root and swap partitions of a disk, in physical order
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PartitionPlan {
    pub disk: PathBuf,
    pub entries: [PartitionSpec; 3],
}

impl PartitionPlan {
    pub fn get(&self, role: PartitionRole) -> &PartitionSpec {
        &self.entries[role.ordinal() as usize - 1]
    }

    pub fn device_nodes(&self) -> DeviceNodeSet {
        DeviceNodeSet::for_disk(&self.disk)
    }

    /// The partition table as `sfdisk` input
    ///
    /// The swap entry has no size so `sfdisk` can keep the backup GPT header at the end of
    /// the disk.
    pub fn sfdisk_script(&self) -> String {
        let mut script = String::from("label: gpt\n\n");
        for entry in &self.entries {
            let _ = write!(script, "start={}MiB, ", entry.start_mib);
            if entry.role != PartitionRole::Swap {
                let _ = write!(script, "size={}MiB, ", entry.size_mib);
            }
            let _ = writeln!(
                script,
                "type={}, name=\"{}\"",
                entry.type_guid, entry.label
            );
        }
        script
    }
}

/// Plan the partitions of `disk`
pub fn plan(disk: &DiskSpec, policy: &SizingPolicy) -> Result<PartitionPlan, SizingError> {
    let layout = compute_layout(disk.total_bytes, policy)?;
    Ok(PartitionPlan {
        disk: disk.path.clone(),
        entries: [
            PartitionSpec::new(PartitionRole::Efi, layout.efi.start_mib, layout.efi.size_mib),
            PartitionSpec::new(
                PartitionRole::Root,
                layout.root.start_mib,
                layout.root.size_mib,
            ),
            PartitionSpec::new(
                PartitionRole::Swap,
                layout.swap.start_mib,
                layout.swap.size_mib,
            ),
        ],
    })
}

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum PlannerError {
    #[error(transparent)]
    Sizing(#[from] SizingError),
    #[error("Reading the size of `{0}`")]
    DiskSize(PathBuf, #[source] ActionErrorKind),
    #[error("`{0}` is not a block device")]
    NotBlockDevice(PathBuf),
    #[error("`{0}` must be set to plan an install")]
    MissingSetting(&'static str),
    #[error("Error executing action")]
    Action(
        #[source]
        #[from]
        ActionError,
    ),
}

impl HasExpectedErrors for PlannerError {
    fn expected<'a>(&'a self) -> Option<Box<dyn Error + 'a>> {
        match self {
            this @ PlannerError::Sizing(_) => Some(Box::new(this)),
            this @ PlannerError::NotBlockDevice(_) => Some(Box::new(this)),
            this @ PlannerError::MissingSetting(_) => Some(Box::new(this)),
            PlannerError::DiskSize(..) => None,
            PlannerError::Action(_) => None,
        }
    }
}
