use std::error::Error;

use crate::{
    action::{ActionError, ActionErrorKind},
    planner::PlannerError,
};

/// An error occurring during a call defined in this crate
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum ProvisionError {
    /// An error originating from an [`Action`](crate::action::Action)
    #[error("Error executing action")]
    Action(#[source] ActionError),
    /// An error ocurring when a signal is issued along [`InstallPlan::install`](crate::InstallPlan::install)'s `cancel_channel` argument
    #[error("Cancelled by user")]
    Cancelled,
    /// The plan was produced by an incompatible version of this crate
    #[error(
        "`nixos-provision` version `{binary}` is not compatible with plan version `{plan}`"
    )]
    IncompatibleVersion {
        binary: semver::Version,
        plan: semver::Version,
    },
    /// Semver error
    #[error("Semantic Versioning error")]
    SemVer(
        #[from]
        #[source]
        semver::Error,
    ),
    /// Serializing the settings to describe them
    #[error("Serializing settings")]
    SerializingSettings(
        #[from]
        #[source]
        serde_json::Error,
    ),
    /// Planner error
    #[error("Planner error")]
    Planner(
        #[from]
        #[source]
        PlannerError,
    ),
}

impl From<ActionError> for ProvisionError {
    fn from(value: ActionError) -> Self {
        Self::Action(value)
    }
}

/// Errors which the operator is expected to act on, and which are better reported as a
/// short message than as a full error report
pub trait HasExpectedErrors: std::error::Error + Sized + Send + Sync {
    fn expected<'a>(&'a self) -> Option<Box<dyn std::error::Error + 'a>>;
}

impl HasExpectedErrors for ProvisionError {
    fn expected<'a>(&'a self) -> Option<Box<dyn Error + 'a>> {
        match self {
            ProvisionError::Action(action_error) => match action_error.root_kind() {
                ActionErrorKind::InstallFailed { .. }
                | ActionErrorKind::ForeignMount { .. }
                | ActionErrorKind::DeviceTimeout { .. } => Some(Box::new(action_error.root_kind())),
                _ => None,
            },
            this @ ProvisionError::IncompatibleVersion { .. } => Some(Box::new(this)),
            ProvisionError::Planner(planner_error) => planner_error.expected(),
            ProvisionError::Cancelled
            | ProvisionError::SemVer(_)
            | ProvisionError::SerializingSettings(_) => None,
        }
    }
}
