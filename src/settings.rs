/*! Configurable knobs and their related errors
*/
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::{
    os::Filesystem,
    planner::PlannerError,
    sizing::SizingPolicy,
    template::TemplateContext,
};

/// Default [`mount_point`](CommonSettings::mount_point)
pub const DEFAULT_MOUNT_POINT: &str = "/mnt";
/// Default [`template_dir`](CommonSettings::template_dir)
pub const DEFAULT_TEMPLATE_DIR: &str = "templates";
/// Default [`install_log`](CommonSettings::install_log)
pub const DEFAULT_INSTALL_LOG: &str = "/tmp/nixos-provision-install.log";
/// Where the configuration lives, relative to the mount point
pub const CONFIG_ROOT: &str = "etc/nixos";

/// A pre-hashed password, as accepted by `users.users.<name>.hashedPassword`
///
/// Never shown by `Debug` or `Display`.
#[derive(Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PasswordHash(<redacted>)")
    }
}

impl std::fmt::Display for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

impl FromStr for PasswordHash {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

/** Settings for provisioning a disk

Values the operator has to supply, like the disk or the user name, are optional here so a
saved plan can be replayed without them; planning fails with
[`PlannerError::MissingSetting`] when one is absent.
*/
#[derive(Debug, serde::Deserialize, serde::Serialize, Clone)]
#[cfg_attr(feature = "cli", derive(clap::Parser))]
pub struct CommonSettings {
    /// The disk to provision, everything on it is erased
    #[cfg_attr(feature = "cli", clap(long, env = "NIXOS_PROVISION_DISK"))]
    pub disk: Option<PathBuf>,

    /// Use this size in bytes for the disk instead of asking the kernel
    #[cfg_attr(
        feature = "cli",
        clap(long, env = "NIXOS_PROVISION_DISK_SIZE_BYTES", value_parser = crate::sizing::parse_disk_size)
    )]
    pub disk_size_bytes: Option<u64>,

    /// Host name of the installed system, also selects the flake output
    #[cfg_attr(
        feature = "cli",
        clap(long, default_value = "nixos", env = "NIXOS_PROVISION_HOSTNAME")
    )]
    pub hostname: String,

    /// The primary user
    #[cfg_attr(feature = "cli", clap(long, env = "NIXOS_PROVISION_USERNAME"))]
    pub username: Option<String>,

    /// The primary user's password, already hashed (for example with `mkpasswd -m sha-512`)
    #[cfg_attr(
        feature = "cli",
        clap(long, env = "NIXOS_PROVISION_PASSWORD_HASH", hide_env_values = true)
    )]
    pub password_hash: Option<PasswordHash>,

    /// Name for the primary user's git identity
    #[cfg_attr(feature = "cli", clap(long, env = "NIXOS_PROVISION_GIT_USERNAME"))]
    pub git_username: Option<String>,

    /// Email for the primary user's git identity
    #[cfg_attr(feature = "cli", clap(long, env = "NIXOS_PROVISION_GIT_EMAIL"))]
    pub git_email: Option<String>,

    /// Filesystem of the root partition
    #[cfg_attr(
        feature = "cli",
        clap(long, value_enum, default_value_t = Filesystem::Ext4, env = "NIXOS_PROVISION_ROOT_FILESYSTEM")
    )]
    pub root_filesystem: Filesystem,

    /// Where the new system is mounted while it is installed
    #[cfg_attr(
        feature = "cli",
        clap(long, default_value = DEFAULT_MOUNT_POINT, env = "NIXOS_PROVISION_MOUNT_POINT")
    )]
    pub mount_point: PathBuf,

    /// Directory holding `configuration.nix` and the module templates
    #[cfg_attr(
        feature = "cli",
        clap(long, default_value = DEFAULT_TEMPLATE_DIR, env = "NIXOS_PROVISION_TEMPLATE_DIR")
    )]
    pub template_dir: PathBuf,

    /// Template files which should not be imported as modules
    #[cfg_attr(
        feature = "cli",
        clap(
            long,
            num_args = 0..,
            action = clap::ArgAction::Append,
            value_delimiter = ',',
            env = "NIXOS_PROVISION_EXCLUDE_MODULE",
        )
    )]
    pub exclude_module: Vec<String>,

    /// Where the output of `nixos-install` is written
    #[cfg_attr(
        feature = "cli",
        clap(long, default_value = DEFAULT_INSTALL_LOG, env = "NIXOS_PROVISION_INSTALL_LOG")
    )]
    pub install_log: PathBuf,

    /// How many times to check for the new partitions before giving up
    #[cfg_attr(
        feature = "cli",
        clap(
            long,
            default_value_t = 20,
            value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..),
            env = "NIXOS_PROVISION_SETTLE_ATTEMPTS"
        )
    )]
    pub settle_attempts: usize,

    /// Milliseconds between checks for the new partitions
    #[cfg_attr(
        feature = "cli",
        clap(long, default_value_t = 1000, env = "NIXOS_PROVISION_SETTLE_INTERVAL_MS")
    )]
    pub settle_interval_ms: u64,

    #[cfg_attr(feature = "cli", clap(flatten))]
    pub sizing: SizingPolicy,

    /// Unmount devices from other disks which are mounted at the mount point
    #[cfg_attr(
        feature = "cli",
        clap(long, default_value = "false", env = "NIXOS_PROVISION_UNMOUNT_FOREIGN")
    )]
    pub unmount_foreign: bool,
}

impl Default for CommonSettings {
    fn default() -> Self {
        Self {
            disk: None,
            disk_size_bytes: None,
            hostname: "nixos".to_string(),
            username: None,
            password_hash: None,
            git_username: None,
            git_email: None,
            root_filesystem: Filesystem::Ext4,
            mount_point: PathBuf::from(DEFAULT_MOUNT_POINT),
            template_dir: PathBuf::from(DEFAULT_TEMPLATE_DIR),
            exclude_module: vec![],
            install_log: PathBuf::from(DEFAULT_INSTALL_LOG),
            settle_attempts: 20,
            settle_interval_ms: 1000,
            sizing: SizingPolicy::default(),
            unmount_foreign: false,
        }
    }
}

fn required<'a, T>(value: &'a Option<T>, flag: &'static str) -> Result<&'a T, PlannerError> {
    value.as_ref().ok_or(PlannerError::MissingSetting(flag))
}

impl CommonSettings {
    /// The disk to provision
    pub fn disk(&mut self, disk: impl Into<PathBuf>) -> &mut Self {
        self.disk = Some(disk.into());
        self
    }

    /// The primary user and their hashed password
    pub fn user(&mut self, username: impl Into<String>, password_hash: PasswordHash) -> &mut Self {
        self.username = Some(username.into());
        self.password_hash = Some(password_hash);
        self
    }

    /// The primary user's git identity
    pub fn git_identity(
        &mut self,
        git_username: impl Into<String>,
        git_email: impl Into<String>,
    ) -> &mut Self {
        self.git_username = Some(git_username.into());
        self.git_email = Some(git_email.into());
        self
    }

    /// The host name of the installed system
    pub fn hostname(&mut self, hostname: impl Into<String>) -> &mut Self {
        self.hostname = hostname.into();
        self
    }

    pub fn require_disk(&self) -> Result<&Path, PlannerError> {
        required(&self.disk, "--disk").map(PathBuf::as_path)
    }

    /// Where the composed configuration is written, `<mount_point>/etc/nixos`
    pub fn config_root(&self) -> PathBuf {
        self.mount_point.join(CONFIG_ROOT)
    }

    /// The values substituted into the templates
    pub fn template_context(&self) -> Result<TemplateContext, PlannerError> {
        Ok(TemplateContext::new(
            required(&self.username, "--username")?.as_str(),
            required(&self.password_hash, "--password-hash")?.expose(),
            required(&self.git_username, "--git-username")?.as_str(),
            required(&self.git_email, "--git-email")?.as_str(),
            self.hostname.as_str(),
            self.require_disk()?.display().to_string(),
        ))
    }

    /// A listing of the settings, suitable for describing a plan
    pub fn settings(&self) -> Result<BTreeMap<String, serde_json::Value>, serde_json::Error> {
        let mut map = BTreeMap::new();
        if let serde_json::Value::Object(object) = serde_json::to_value(self)? {
            for (key, value) in object {
                map.insert(key, value);
            }
        }
        if self.password_hash.is_some() {
            map.insert(
                "password_hash".to_string(),
                serde_json::Value::String("<redacted>".to_string()),
            );
        }
        Ok(map)
    }

    #[cfg(test)]
    pub(crate) fn for_disk(disk: impl Into<PathBuf>) -> Self {
        let mut settings = Self::default();
        settings
            .disk(disk)
            .user("ada", PasswordHash::new("$6$salt$Zm9vYmFyL2Jhei9xdXV4"))
            .git_identity("Ada Lovelace", "ada@example.org")
            .hostname("analytical");
        settings
    }
}
