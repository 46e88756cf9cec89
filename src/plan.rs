use std::{future::Future, path::PathBuf, str::FromStr};

use owo_colors::OwoColorize;
use semver::{Version, VersionReq};
use tokio::sync::broadcast::{error::RecvError, Receiver};

use crate::{
    action::{
        configure::{ComposeConfiguration, GenerateHardwareConfig},
        install::RunInstaller,
        provision::ProvisionDisk,
        ActionDescription, ActionState, StatefulAction,
    },
    os::Host,
    planner::{self, DiskSpec, PartitionPlan, PartitionRole, PlannerError},
    settings::CommonSettings,
    sizing::MIB,
    ProvisionError,
};

/**
Everything needed to provision a disk and install NixOS on it, in the order it happens

A plan is computed against the live system by [`InstallPlan::plan`] and can be serialized,
inspected and replayed later with [`InstallPlan::install`].
*/
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct InstallPlan {
    pub(crate) version: Version,

    pub(crate) settings: CommonSettings,
    pub(crate) disk: DiskSpec,
    pub(crate) partition_plan: PartitionPlan,

    pub(crate) provision: StatefulAction<ProvisionDisk>,
    pub(crate) generate_hardware_config: StatefulAction<GenerateHardwareConfig>,
    pub(crate) compose_configuration: StatefulAction<ComposeConfiguration>,
    pub(crate) run_installer: StatefulAction<RunInstaller>,
}

impl InstallPlan {
    /// Measure the disk and plan every step, without changing anything
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn plan(settings: CommonSettings, host: &dyn Host) -> Result<Self, ProvisionError> {
        let disk_path = settings.require_disk()?.to_path_buf();
        let context = settings.template_context()?;

        let disk = DiskSpec::read(host, &disk_path, settings.disk_size_bytes).await?;
        let partition_plan =
            planner::plan(&disk, &settings.sizing).map_err(PlannerError::from)?;
        tracing::debug!(plan = ?partition_plan, "Planned partitions");

        let provision = ProvisionDisk::plan(host, &settings, &partition_plan)
            .await
            .map_err(PlannerError::Action)?;

        let config_root = settings.config_root();
        let generate_hardware_config =
            GenerateHardwareConfig::plan(&settings.mount_point, &config_root);
        let compose_configuration = ComposeConfiguration::plan(
            &settings.template_dir,
            &config_root,
            context,
            settings.exclude_module.clone(),
        );
        let run_installer = RunInstaller::plan(
            &settings.mount_point,
            &config_root,
            settings.hostname.clone(),
            &settings.install_log,
        );

        Ok(Self {
            version: current_version()?,
            settings,
            disk,
            partition_plan,
            provision,
            generate_hardware_config,
            compose_configuration,
            run_installer,
        })
    }

    pub fn settings(&self) -> &CommonSettings {
        &self.settings
    }

    pub fn partition_plan(&self) -> &PartitionPlan {
        &self.partition_plan
    }

    /// Mount points held by devices outside the target disk, with their source devices
    pub fn foreign_mounts(&self) -> &[(PathBuf, PathBuf)] {
        self.provision.inner().foreign_mounts()
    }

    /// Whether [`InstallPlan::install`] would refuse to unmount a [`foreign mount`](Self::foreign_mounts)
    pub fn needs_foreign_unmount_approval(&self) -> bool {
        let prepare_target = self.provision.inner().prepare_target.inner();
        !prepare_target.allow_foreign && !prepare_target.foreign_mounts.is_empty()
    }

    /// Allow [`InstallPlan::install`] to unmount the [`foreign_mounts`](Self::foreign_mounts)
    pub fn approve_foreign_unmount(&mut self) {
        self.provision.inner_mut().approve_foreign_unmount()
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub fn describe_install(&self, explain: bool) -> Result<String, ProvisionError> {
        let Self {
            version,
            settings,
            disk,
            partition_plan,
            ..
        } = self;

        let nodes = partition_plan.device_nodes();
        let partitions = [
            (PartitionRole::Efi, &nodes.efi),
            (PartitionRole::Root, &nodes.root),
            (PartitionRole::Swap, &nodes.swap),
        ]
        .into_iter()
        .map(|(role, node)| {
            let entry = partition_plan.get(role);
            format!(
                "* {role}: {size} MiB at {start} MiB, `{node}`",
                role = role.to_string().bold(),
                size = entry.size_mib,
                start = entry.start_mib,
                node = node.display(),
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

        let maybe_settings = if explain {
            let mut listing = settings
                .settings()?
                .into_iter()
                .map(|(k, v)| format!("* {k}: {v}", k = k.bold()))
                .collect::<Vec<_>>();
            // Stabilize output order
            listing.sort();
            format!(
                "\
                Settings:\n\
                {listing}\n\
                \n\
            ",
                listing = listing.join("\n")
            )
        } else {
            String::new()
        };

        let buf = format!(
            "\
            NixOS provisioning plan (v{version})\n\
            {warning}\n\
            \n\
            Partitions:\n\
            {partitions}\n\
            \n\
            {maybe_settings}\
            Planned actions:\n\
            {actions}\n\
        ",
            warning = format!(
                "Everything on `{}` ({} MiB) will be erased",
                disk.path.display(),
                disk.total_bytes / MIB
            )
            .red()
            .bold(),
            actions = self
                .describe_actions()
                .into_iter()
                .map(|desc| {
                    let ActionDescription {
                        description,
                        explanation,
                    } = desc;

                    let mut buf = String::default();
                    buf.push_str(&format!("* {description}"));
                    if explain {
                        for line in explanation {
                            buf.push_str(&format!("\n  {line}"));
                        }
                    }
                    buf
                })
                .collect::<Vec<_>>()
                .join("\n"),
        );
        Ok(buf)
    }

    fn describe_actions(&self) -> Vec<ActionDescription> {
        let mut buf = Vec::default();
        buf.append(&mut self.provision.describe_execute());
        buf.append(&mut self.generate_hardware_config.describe_execute());
        buf.append(&mut self.compose_configuration.describe_execute());
        buf.append(&mut self.run_installer.describe_execute());
        buf
    }

    /// Provision the disk, write the configuration and run `nixos-install`
    ///
    /// A failure before `nixos-install` runs, or a message on `cancel_channel`, releases the
    /// target again. A failed `nixos-install` leaves it mounted.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn install(
        &mut self,
        host: &dyn Host,
        mut cancel_channel: Option<Receiver<()>>,
    ) -> Result<(), ProvisionError> {
        self.check_compatible()?;

        // Stages run strictly in order, each one needs the previous one.
        tracing::info!("Step: {}", self.provision.tracing_synopsis());
        let res = cancellable(self.provision.try_execute(host), &mut cancel_channel).await;
        match res {
            // Provisioning rolls itself back
            Some(res) => res?,
            None => return self.cancelled(host).await,
        }

        tracing::info!("Step: {}", self.generate_hardware_config.tracing_synopsis());
        let res = cancellable(
            self.generate_hardware_config.try_execute(host),
            &mut cancel_channel,
        )
        .await;
        match res {
            Some(Ok(())) => (),
            Some(Err(err)) => return self.failed(host, err.into()).await,
            None => return self.cancelled(host).await,
        }

        tracing::info!("Step: {}", self.compose_configuration.tracing_synopsis());
        let res = cancellable(
            self.compose_configuration.try_execute(host),
            &mut cancel_channel,
        )
        .await;
        match res {
            Some(Ok(())) => (),
            Some(Err(err)) => return self.failed(host, err.into()).await,
            None => return self.cancelled(host).await,
        }

        tracing::info!("Step: {}", self.run_installer.tracing_synopsis());
        let res = cancellable(self.run_installer.try_execute(host), &mut cancel_channel).await;
        match res {
            // The target stays mounted for inspection
            Some(res) => res?,
            None => return self.cancelled(host).await,
        }

        Ok(())
    }

    async fn failed(&mut self, host: &dyn Host, err: ProvisionError) -> Result<(), ProvisionError> {
        tracing::error!("Configuration failed, rolling back");
        if let Err(rollback_err) = self.rollback(host).await {
            tracing::warn!(error = ?rollback_err, "Rollback failed");
        }
        Err(err)
    }

    async fn cancelled(&mut self, host: &dyn Host) -> Result<(), ProvisionError> {
        tracing::warn!("Cancelled, rolling back");
        if let Err(rollback_err) = self.rollback(host).await {
            tracing::warn!(error = ?rollback_err, "Rollback failed");
        }
        Err(ProvisionError::Cancelled)
    }

    /// Remove the written configuration, then unmount the target and disable its swap, if
    /// provisioning got that far
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn rollback(&mut self, host: &dyn Host) -> Result<(), ProvisionError> {
        // The files live on the filesystems released below
        if let Err(err) = self.compose_configuration.try_revert(host).await {
            tracing::warn!(error = ?err, "Could not remove the composed configuration");
        }
        if let Err(err) = self.generate_hardware_config.try_revert(host).await {
            tracing::warn!(error = ?err, "Could not remove the hardware configuration");
        }

        match self.provision.state() {
            ActionState::Uncompleted | ActionState::Skipped => {
                tracing::debug!("Nothing was provisioned, nothing to roll back");
            },
            ActionState::Progress | ActionState::Completed => {
                self.provision.try_revert(host).await?;
                // Whatever was left of their files is gone with the filesystems
                for state in [
                    &mut self.generate_hardware_config.state,
                    &mut self.compose_configuration.state,
                ] {
                    *state = ActionState::Uncompleted;
                }
            },
        }
        Ok(())
    }

    pub fn check_compatible(&self) -> Result<(), ProvisionError> {
        let self_version_string = self.version.to_string();
        let req = VersionReq::parse(&self_version_string)?;
        let binary = current_version()?;
        if req.matches(&binary) {
            Ok(())
        } else {
            Err(ProvisionError::IncompatibleVersion {
                binary,
                plan: self.version.clone(),
            })
        }
    }
}

/// Drive `task` to completion, unless a message arrives on `cancel_channel` first
async fn cancellable<F>(task: F, cancel_channel: &mut Option<Receiver<()>>) -> Option<F::Output>
where
    F: Future,
{
    match cancel_channel {
        Some(cancel_channel) => tokio::select! {
            biased;
            _ = cancel_requested(cancel_channel) => None,
            output = task => Some(output),
        },
        None => Some(task.await),
    }
}

async fn cancel_requested(cancel_channel: &mut Receiver<()>) {
    match cancel_channel.recv().await {
        Ok(()) | Err(RecvError::Lagged(_)) => (),
        // Nobody can cancel anymore
        Err(RecvError::Closed) => std::future::pending().await,
    }
}

pub fn current_version() -> Result<Version, ProvisionError> {
    Ok(Version::from_str(env!("CARGO_PKG_VERSION"))?)
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use super::*;
    use crate::{
        action::ActionErrorKind,
        os::fake::FakeHost,
        sizing::SizingError,
        HasExpectedErrors,
    };

    const DISK: &str = "/dev/nvme0n1";
    const GIB: u64 = 1024 * MIB;

    fn settings(dir: &Path) -> CommonSettings {
        let mut settings = CommonSettings::for_disk(DISK);
        settings.mount_point = dir.join("mnt");
        settings.template_dir = dir.join("templates");
        settings.install_log = dir.join("install.log");
        settings
    }

    async fn write_templates(dir: &Path) -> std::io::Result<()> {
        let templates = dir.join("templates");
        tokio::fs::create_dir_all(&templates).await?;
        tokio::fs::write(
            templates.join("configuration.nix"),
            "{ ... }:\n{\n  imports = [\n__MODULE_IMPORTS__\n  ];\n  networking.hostName = \"__HOSTNAME__\";\n  boot.loader.grub.device = \"__DISK__\";\n}\n",
        )
        .await?;
        tokio::fs::write(templates.join("desktop.nix"), "{ ... }: { }\n").await?;
        Ok(())
    }

    #[tokio::test]
    async fn installs_a_hundred_gib_disk() -> eyre::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        write_templates(temp_dir.path()).await?;
        let settings = settings(temp_dir.path());
        let mount_point = settings.mount_point.clone();
        let host = FakeHost::new(DISK, 100 * GIB);

        let mut plan = InstallPlan::plan(settings, &host).await?;
        let nodes = plan.partition_plan().device_nodes();
        assert_eq!(nodes.efi, Path::new("/dev/nvme0n1p1"));
        assert_eq!(nodes.root, Path::new("/dev/nvme0n1p2"));
        assert_eq!(nodes.swap, Path::new("/dev/nvme0n1p3"));
        assert_eq!(plan.partition_plan().get(PartitionRole::Root).size_mib, 85503);

        plan.install(&host, None).await?;

        let config_root = mount_point.join("etc/nixos");
        let configuration = tokio::fs::read_to_string(config_root.join("configuration.nix")).await?;
        assert!(configuration.contains("    ./desktop.nix\n    ./hardware-configuration.nix\n"));
        assert!(configuration.contains("networking.hostName = \"analytical\";"));
        assert!(configuration.contains("boot.loader.grub.device = \"/dev/nvme0n1\";"));
        assert!(config_root.join("hardware-configuration.nix").is_file());
        assert!(config_root.join("desktop.nix").is_file());

        let calls = host.calls();
        assert_eq!(
            calls.last().map(String::as_str),
            Some(
                format!(
                    "nixos-install --no-root-passwd --root {} --flake {}#analytical",
                    mount_point.display(),
                    config_root.display()
                )
                .as_str()
            )
        );
        // Left mounted for the operator
        assert_eq!(host.state().mounts.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn small_disks_never_reach_a_destructive_tool() -> eyre::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let host = FakeHost::new(DISK, 10 * GIB);

        let err = InstallPlan::plan(settings(temp_dir.path()), &host)
            .await
            .unwrap_err();
        match &err {
            ProvisionError::Planner(PlannerError::Sizing(SizingError::DiskTooSmall {
                disk_mib,
                required_mib,
            })) => {
                assert_eq!(*disk_mib, 10240);
                assert_eq!(*required_mib, 37121);
            },
            err => panic!("unexpected error {err:?}"),
        }
        assert!(err.expected().is_some());
        assert!(host.destructive_calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn missing_settings_fail_planning() -> eyre::Result<()> {
        let host = FakeHost::new(DISK, 100 * GIB);
        let mut settings = CommonSettings::default();
        settings.disk(DISK);

        let err = InstallPlan::plan(settings, &host).await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Planner(PlannerError::MissingSetting("--username"))
        ));
        assert!(host.calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn configuration_failures_roll_back() -> eyre::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        // No templates at all
        let host = FakeHost::new(DISK, 100 * GIB);

        let mut plan = InstallPlan::plan(settings(temp_dir.path()), &host).await?;
        let err = plan.install(&host, None).await.unwrap_err();

        match &err {
            ProvisionError::Action(action_error) => assert!(matches!(
                action_error.root_kind(),
                ActionErrorKind::MissingTemplate(_)
            )),
            err => panic!("unexpected error {err:?}"),
        }
        let state = host.state();
        assert!(state.mounts.is_empty());
        assert!(state.swaps.is_empty());
        assert_eq!(plan.provision.state(), ActionState::Uncompleted);
        assert!(!state.calls.iter().any(|call| call.starts_with("nixos-install")));
        Ok(())
    }

    #[tokio::test]
    async fn a_failed_compose_leaves_no_configuration() -> eyre::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        write_templates(temp_dir.path()).await?;
        tokio::fs::write(
            temp_dir.path().join("templates/home.nix"),
            "{ home.username = \"__USERNAME__\"; }\n",
        )
        .await?;
        let settings = settings(temp_dir.path());
        let config_root = settings.config_root();
        // Sorted after `configuration.nix` and `desktop.nix`, and a directory cannot be replaced
        tokio::fs::create_dir_all(config_root.join("home.nix")).await?;
        let host = FakeHost::new(DISK, 100 * GIB);

        let mut plan = InstallPlan::plan(settings, &host).await?;
        let err = plan.install(&host, None).await.unwrap_err();

        match &err {
            ProvisionError::Action(action_error) => assert!(matches!(
                action_error.root_kind(),
                ActionErrorKind::Rename(..)
            )),
            err => panic!("unexpected error {err:?}"),
        }
        for name in ["configuration.nix", "desktop.nix", "hardware-configuration.nix"] {
            assert!(!config_root.join(name).exists(), "{name} was left behind");
        }
        assert_eq!(plan.compose_configuration.state(), ActionState::Uncompleted);
        assert_eq!(plan.generate_hardware_config.state(), ActionState::Uncompleted);
        assert!(host.state().mounts.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn install_failures_leave_the_target_mounted() -> eyre::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        write_templates(temp_dir.path()).await?;
        let host = FakeHost::new(DISK, 100 * GIB).installer_exit(Some(1));

        let mut plan = InstallPlan::plan(settings(temp_dir.path()), &host).await?;
        let err = plan.install(&host, None).await.unwrap_err();

        assert!(err.expected().is_some());
        let state = host.state();
        assert_eq!(state.mounts.len(), 2);
        assert_eq!(state.swaps.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn cancelling_before_anything_ran() -> eyre::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        write_templates(temp_dir.path()).await?;
        let host = FakeHost::new(DISK, 100 * GIB);
        let (tx, rx) = tokio::sync::broadcast::channel(1);

        let mut plan = InstallPlan::plan(settings(temp_dir.path()), &host).await?;
        tx.send(())?;
        let err = plan.install(&host, Some(rx)).await.unwrap_err();

        assert!(matches!(err, ProvisionError::Cancelled));
        assert!(host.destructive_calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn a_dropped_sender_does_not_cancel() -> eyre::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        write_templates(temp_dir.path()).await?;
        let host = FakeHost::new(DISK, 100 * GIB);
        let (tx, rx) = tokio::sync::broadcast::channel::<()>(1);
        drop(tx);

        let mut plan = InstallPlan::plan(settings(temp_dir.path()), &host).await?;
        plan.install(&host, Some(rx)).await?;
        Ok(())
    }

    #[tokio::test]
    async fn plans_round_trip_and_check_their_version() -> eyre::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let host = FakeHost::new(DISK, 100 * GIB);
        let plan = InstallPlan::plan(settings(temp_dir.path()), &host).await?;

        let mut value = serde_json::to_value(&plan)?;
        let replayed: InstallPlan = serde_json::from_value(value.clone())?;
        replayed.check_compatible()?;
        assert_eq!(replayed.partition_plan(), plan.partition_plan());

        value["version"] = serde_json::json!("9999999999999.9999999999.99999999");
        let incompatible: InstallPlan = serde_json::from_value(value)?;
        assert!(matches!(
            incompatible.check_compatible(),
            Err(ProvisionError::IncompatibleVersion { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn description_names_the_disk_and_nodes() -> eyre::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let host = FakeHost::new(DISK, 100 * GIB);
        let plan = InstallPlan::plan(settings(temp_dir.path()), &host).await?;

        let description = plan.describe_install(true)?;
        assert!(description.contains("/dev/nvme0n1p3"));
        assert!(description.contains("85503 MiB"));
        assert!(!description.contains("Zm9vYmFy"));
        Ok(())
    }
}
