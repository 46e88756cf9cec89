use std::path::Path;

use nixos_provision::{
    device::partition_path,
    sizing::{compute_layout, SizingPolicy},
    template::{compose, discover_modules, has_placeholders, template_files, TemplateContext},
};

const GIB: u64 = 1024 * 1024 * 1024;

const BASE: &str = "\
{ ... }:
{
  imports = [
__MODULE_IMPORTS__
  ];
  networking.hostName = \"__HOSTNAME__\";
  users.users.__USERNAME__.hashedPassword = \"__PASSWORD_HASH__\";
}
";

#[tokio::test]
async fn composes_a_template_directory() -> eyre::Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let dir = temp_dir.path();
    std::fs::write(dir.join("configuration.nix"), BASE)?;
    std::fs::write(dir.join("networking.nix"), "{ ... }: { }\n")?;
    std::fs::write(dir.join("desktop.nix"), "{ ... }: { }\n")?;
    std::fs::write(dir.join("home.nix"), "{ ... }: { }\n")?;
    std::fs::write(dir.join("hardware-configuration.nix"), "{ }\n")?;
    std::fs::write(dir.join("README.md"), "not a module\n")?;

    let modules = discover_modules(dir, &["desktop.nix".to_string()]).await;
    assert_eq!(modules.files(), ["networking.nix".to_string()]);

    let files = template_files(dir).await?;
    assert_eq!(
        files,
        ["configuration.nix", "desktop.nix", "home.nix", "networking.nix"]
    );

    let context = TemplateContext::new(
        "ada",
        "$6$salt$hash",
        "Ada Lovelace",
        "ada@example.org",
        "analytical",
        "/dev/sda",
    );
    let composed = compose(BASE, &context, &modules);
    assert!(composed.contains("    ./networking.nix\n    ./hardware-configuration.nix"));
    assert!(composed.contains("networking.hostName = \"analytical\";"));
    assert!(composed.contains("users.users.ada.hashedPassword = \"$6$salt$hash\";"));
    assert!(!has_placeholders(&composed));
    Ok(())
}

#[tokio::test]
async fn unreadable_template_directory_imports_only_hardware() -> eyre::Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let modules = discover_modules(&temp_dir.path().join("missing"), &[]).await;
    assert!(modules.files().is_empty());
    assert_eq!(modules.render(), "    ./hardware-configuration.nix");
    Ok(())
}

#[test]
fn layout_and_naming_agree() -> eyre::Result<()> {
    let layout = compute_layout(100 * GIB, &SizingPolicy::default())?;
    assert_eq!(layout.efi.start_mib, 1);
    assert_eq!(layout.root.start_mib, layout.efi.end_mib());
    assert_eq!(layout.swap.start_mib, layout.root.end_mib());

    assert_eq!(
        partition_path(Path::new("/dev/nvme0n1"), 2),
        Path::new("/dev/nvme0n1p2")
    );
    assert_eq!(partition_path(Path::new("/dev/sda"), 3), Path::new("/dev/sda3"));
    assert_eq!(
        partition_path(Path::new("/dev/disk/by-id/ata-WDC_WD10EZEX"), 1),
        Path::new("/dev/disk/by-id/ata-WDC_WD10EZEX-part1")
    );
    Ok(())
}
