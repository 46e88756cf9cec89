use std::{io::IsTerminal, process::ExitCode};

use clap::Parser;
use nixos_provision::cli::{CommandExecute, NixosProvisionCli};

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    color_eyre::config::HookBuilder::default()
        .add_issue_metadata("version", env!("CARGO_PKG_VERSION"))
        .theme(if !std::io::stderr().is_terminal() {
            color_eyre::config::Theme::new()
        } else {
            color_eyre::config::Theme::dark()
        })
        .install()?;

    let cli = NixosProvisionCli::parse();

    cli.instrumentation.setup()?;

    tracing::info!("nixos-provision v{}", env!("CARGO_PKG_VERSION"));

    cli.execute().await
}
