/*! The `nixos-provision` command line interface
*/

pub mod arg;
mod interaction;
pub mod subcommand;

use std::process::ExitCode;

use clap::Parser;
use eyre::WrapErr;
use owo_colors::OwoColorize;
use tokio::sync::broadcast::{Receiver, Sender};

use self::subcommand::NixosProvisionSubcommand;

#[async_trait::async_trait]
pub trait CommandExecute {
    async fn execute(self) -> eyre::Result<ExitCode>;
}

/**
Provision a bare disk and install NixOS on it

Plans a GPT layout (EFI, root and swap), partitions, formats and mounts the disk, composes the
configuration from a template directory and runs `nixos-install`.
*/
#[derive(Debug, Parser)]
#[clap(version)]
pub struct NixosProvisionCli {
    #[clap(flatten)]
    pub instrumentation: arg::Instrumentation,

    #[clap(subcommand)]
    pub subcommand: NixosProvisionSubcommand,
}

#[async_trait::async_trait]
impl CommandExecute for NixosProvisionCli {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn execute(self) -> eyre::Result<ExitCode> {
        let Self {
            instrumentation: _,
            subcommand,
        } = self;

        match subcommand {
            NixosProvisionSubcommand::Install(install) => install.execute().await,
            NixosProvisionSubcommand::Plan(plan) => plan.execute().await,
            NixosProvisionSubcommand::Cleanup(cleanup) => cleanup.execute().await,
        }
    }
}

/// A broadcast channel which receives a message on `SIGINT` or `SIGTERM`
pub(crate) async fn signal_channel() -> eyre::Result<(Sender<()>, Receiver<()>)> {
    use tokio::signal::unix::{signal, SignalKind};

    let (sender, receiver) = tokio::sync::broadcast::channel(100);

    let mut interrupt = signal(SignalKind::interrupt()).wrap_err("Creating SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).wrap_err("Creating SIGTERM handler")?;

    let sender_cloned = sender.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => tracing::warn!("Received SIGINT, cancelling"),
            _ = terminate.recv() => tracing::warn!("Received SIGTERM, cancelling"),
        }
        if sender_cloned.send(()).is_err() {
            tracing::debug!("Nothing was listening for cancellation");
        }
    });

    Ok((sender, receiver))
}

pub(crate) fn is_root() -> bool {
    nix::unistd::getuid().is_root()
}

pub(crate) fn ensure_root() -> eyre::Result<()> {
    if !is_root() {
        eyre::bail!(
            "{}",
            "`nixos-provision` needs to run as `root`, try again with `sudo`".red()
        );
    }
    Ok(())
}
