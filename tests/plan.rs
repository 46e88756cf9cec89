use std::path::Path;

use nixos_provision::{planner::PartitionRole, InstallPlan};

const NVME_100G: &str = include_str!("./fixtures/nvme-100g.json");

// Ensure existing plans still parse
// If this breaks and you need to update the fixture, bump to a new version and regenerate it with `nixos-provision plan`.
#[test]
fn plan_compat_nvme_100g() -> eyre::Result<()> {
    let _: InstallPlan = serde_json::from_str(NVME_100G)?;
    Ok(())
}

#[test]
fn replayed_plan_keeps_its_layout() -> eyre::Result<()> {
    let plan: InstallPlan = serde_json::from_str(NVME_100G)?;
    plan.check_compatible()?;

    let partition_plan = plan.partition_plan();
    assert_eq!(partition_plan.get(PartitionRole::Efi).size_mib, 512);
    assert_eq!(partition_plan.get(PartitionRole::Root).size_mib, 85503);
    assert_eq!(partition_plan.get(PartitionRole::Swap).start_mib, 86016);
    assert_eq!(
        partition_plan.device_nodes().root,
        Path::new("/dev/nvme0n1p2")
    );
    assert!(!plan.needs_foreign_unmount_approval());
    Ok(())
}

#[test]
fn replayed_plan_hides_the_password_hash() -> eyre::Result<()> {
    let plan: InstallPlan = serde_json::from_str(NVME_100G)?;
    let description = plan.describe_install(true)?;
    assert!(description.contains("/dev/nvme0n1p3"));
    assert!(!description.contains("Zm9vYmFyL2Jhei9xdXV4"));
    Ok(())
}
