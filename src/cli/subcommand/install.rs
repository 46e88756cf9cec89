use std::{path::PathBuf, process::ExitCode};

use clap::{ArgAction, Parser};
use eyre::{eyre, WrapErr};
use owo_colors::OwoColorize;

use crate::{
    cli::{
        ensure_root,
        interaction::{self, PromptChoice},
        signal_channel, CommandExecute,
    },
    error::HasExpectedErrors,
    os::LinuxHost,
    settings::CommonSettings,
    InstallPlan, ProvisionError,
};

/**
Provision the disk and install NixOS on it

Everything on the disk is erased. Unless `--no-confirm` is passed, the plan is shown and must
be confirmed first.
*/
#[derive(Debug, Parser)]
pub struct Install {
    /// Run the installation without requiring explicit confirmation
    #[clap(
        long,
        env = "NIXOS_PROVISION_NO_CONFIRM",
        action(ArgAction::SetTrue),
        default_value = "false",
        global = true
    )]
    pub no_confirm: bool,

    #[clap(flatten)]
    pub settings: CommonSettings,

    /// Explain every change the installation will make
    #[clap(
        long,
        env = "NIXOS_PROVISION_EXPLAIN",
        action(ArgAction::SetTrue),
        default_value = "false",
        global = true
    )]
    pub explain: bool,

    /// Replay a plan written by `nixos-provision plan` instead of planning from the settings
    #[clap(long, env = "NIXOS_PROVISION_PLAN")]
    pub plan: Option<PathBuf>,
}

#[async_trait::async_trait]
impl CommandExecute for Install {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn execute(self) -> eyre::Result<ExitCode> {
        let Self {
            no_confirm,
            settings,
            explain,
            plan,
        } = self;

        ensure_root()?;
        let host = LinuxHost::default();

        let mut install_plan = match plan {
            Some(plan_path) => {
                let install_plan_string = tokio::fs::read_to_string(&plan_path)
                    .await
                    .wrap_err("Reading plan")?;
                let install_plan: InstallPlan = serde_json::from_str(&install_plan_string)
                    .wrap_err_with(|| format!("Parsing plan `{}`", plan_path.display()))?;
                if let Err(err) = install_plan.check_compatible() {
                    if let Some(expected) = err.expected() {
                        eprintln!("{}", expected.red());
                        return Ok(ExitCode::FAILURE);
                    }
                    return Err(err)?;
                }
                install_plan
            },
            None => match InstallPlan::plan(settings, &host).await {
                Ok(install_plan) => install_plan,
                Err(err) => {
                    if let Some(expected) = err.expected() {
                        eprintln!("{}", expected.red());
                        return Ok(ExitCode::FAILURE);
                    }
                    return Err(err)?;
                },
            },
        };

        if !no_confirm {
            if install_plan.needs_foreign_unmount_approval() {
                let mounts = install_plan
                    .foreign_mounts()
                    .iter()
                    .map(|(mount_point, source)| {
                        format!("* `{}` from `{}`", mount_point.display(), source.display())
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                let question = format!(
                    "\
                    These mount points are held by devices outside the target disk:\n\
                    {mounts}\n\
                    \n\
                    They have to be unmounted to continue.\
                "
                );
                if !interaction::confirm(question).await? {
                    interaction::clean_exit_with_message(
                        "Okay, not continuing with the installation. Bye!",
                    )
                    .await
                }
                install_plan.approve_foreign_unmount();
            }

            let mut currently_explaining = explain;
            loop {
                match interaction::prompt(
                    install_plan
                        .describe_install(currently_explaining)
                        .map_err(|e| eyre!(e))?,
                    PromptChoice::Yes,
                    currently_explaining,
                )
                .await?
                {
                    PromptChoice::Yes => break,
                    PromptChoice::Explain => currently_explaining = true,
                    PromptChoice::No => {
                        interaction::clean_exit_with_message(
                            "Okay, not continuing with the installation. Bye!",
                        )
                        .await
                    },
                }
            }
        }

        let (_tx, rx) = signal_channel().await?;

        match install_plan.install(&host, Some(rx)).await {
            Err(err) => {
                if let Some(expected) = err.expected() {
                    eprintln!("{}", expected.red());
                    return Ok(ExitCode::FAILURE);
                }
                if matches!(err, ProvisionError::Cancelled) {
                    eprintln!("{}", err.red());
                    return Ok(ExitCode::FAILURE);
                }
                let error = eyre!(err).wrap_err("Install failure");
                return Err(error)?;
            },
            Ok(()) => {
                println!(
                    "\
                    {success}\n\
                    The new system is mounted at `{mount_point}`, reboot to start it\n\
                    ",
                    success = "NixOS was installed successfully!".green().bold(),
                    mount_point = install_plan.settings().mount_point.display(),
                );
            },
        }

        Ok(ExitCode::SUCCESS)
    }
}
