/*! [`Action`](crate::action::Action)s which write the system configuration onto the mounted target
*/

pub(crate) mod compose_configuration;
pub(crate) mod generate_hardware_config;

pub use compose_configuration::ComposeConfiguration;
pub use generate_hardware_config::GenerateHardwareConfig;

/// Mode of every file written to the configuration root
pub const CONFIG_FILE_MODE: u32 = 0o644;
