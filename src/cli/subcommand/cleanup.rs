use std::{path::PathBuf, process::ExitCode};

use clap::{ArgAction, Parser};
use owo_colors::OwoColorize;

use crate::{
    action::provision::rollback,
    cli::{ensure_root, interaction, CommandExecute},
    device::DeviceNodeSet,
    os::LinuxHost,
    settings::DEFAULT_MOUNT_POINT,
};

/**
Unmount a target left mounted by an earlier run and disable its swap

Useful after a failed `nixos-install`, which leaves the target mounted for inspection.
*/
#[derive(Debug, Parser)]
pub struct Cleanup {
    /// Run without requiring explicit confirmation
    #[clap(
        long,
        env = "NIXOS_PROVISION_NO_CONFIRM",
        action(ArgAction::SetTrue),
        default_value = "false"
    )]
    pub no_confirm: bool,

    /// Where the target is mounted
    #[clap(long, default_value = DEFAULT_MOUNT_POINT, env = "NIXOS_PROVISION_MOUNT_POINT")]
    pub mount_point: PathBuf,

    /// The provisioned disk, so swap on its swap partition is disabled explicitly
    #[clap(long, env = "NIXOS_PROVISION_DISK")]
    pub disk: Option<PathBuf>,
}

#[async_trait::async_trait]
impl CommandExecute for Cleanup {
    #[tracing::instrument(level = "debug", skip_all, fields(mount_point = %self.mount_point.display()))]
    async fn execute(self) -> eyre::Result<ExitCode> {
        let Self {
            no_confirm,
            mount_point,
            disk,
        } = self;

        ensure_root()?;

        if !no_confirm
            && !interaction::confirm(format!(
                "Unmount `{}` and `{}`, then disable all swap",
                mount_point.join("boot").display(),
                mount_point.display()
            ))
            .await?
        {
            interaction::clean_exit_with_message("Okay, didn't do anything! Bye!").await
        }

        let swap = disk.map(|disk| DeviceNodeSet::for_disk(&disk).swap);
        rollback(&LinuxHost::default(), &mount_point, swap.as_deref()).await;

        println!(
            "{}",
            format!("Released `{}`", mount_point.display())
                .green()
                .bold()
        );
        Ok(ExitCode::SUCCESS)
    }
}
