mod cleanup;
pub use cleanup::Cleanup;
mod install;
pub use install::Install;
mod plan;
pub use plan::Plan;

#[allow(clippy::large_enum_variant)]
#[derive(Debug, clap::Subcommand)]
pub enum NixosProvisionSubcommand {
    Install(Install),
    Plan(Plan),
    Cleanup(Cleanup),
}
