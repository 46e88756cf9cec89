use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use eyre::WrapErr;
use owo_colors::OwoColorize;

use crate::{
    cli::CommandExecute, error::HasExpectedErrors, os::LinuxHost, settings::CommonSettings,
    InstallPlan,
};

/// Compute an install plan without changing anything, for review or a later `install --plan`
#[derive(Debug, Parser)]
pub struct Plan {
    #[clap(flatten)]
    pub settings: CommonSettings,

    /// Where to write the generated plan (in JSON format), stdout when unset
    #[clap(long = "out-file", env = "NIXOS_PROVISION_PLAN_OUT_FILE")]
    pub output: Option<PathBuf>,
}

#[async_trait::async_trait]
impl CommandExecute for Plan {
    #[tracing::instrument(level = "debug", skip_all)]
    async fn execute(self) -> eyre::Result<ExitCode> {
        let Self { settings, output } = self;

        let install_plan = match InstallPlan::plan(settings, &LinuxHost::default()).await {
            Ok(install_plan) => install_plan,
            Err(err) => {
                if let Some(expected) = err.expected() {
                    eprintln!("{}", expected.red());
                    return Ok(ExitCode::FAILURE);
                }
                return Err(err)?;
            },
        };

        let json = serde_json::to_string_pretty(&install_plan)?;
        match output {
            Some(output) => tokio::fs::write(&output, format!("{json}\n"))
                .await
                .wrap_err_with(|| format!("Writing plan to `{}`", output.display()))?,
            None => println!("{json}"),
        }

        Ok(ExitCode::SUCCESS)
    }
}
