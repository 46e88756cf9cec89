use tracing::Instrument;

use super::{Action, ActionDescription, ActionError};
use crate::os::Host;

/// An [`Action`] together with how far it got, so a saved plan can be resumed or rolled back
#[derive(Debug, serde::Deserialize, serde::Serialize, Clone)]
pub struct StatefulAction<A> {
    pub(crate) action: A,
    pub(crate) state: ActionState,
}

impl<A> From<A> for StatefulAction<A>
where
    A: Action,
{
    fn from(action: A) -> Self {
        Self {
            action,
            state: ActionState::Uncompleted,
        }
    }
}

impl<A> StatefulAction<A>
where
    A: Action,
{
    pub fn inner(&self) -> &A {
        &self.action
    }

    pub(crate) fn inner_mut(&mut self) -> &mut A {
        &mut self.action
    }

    pub fn state(&self) -> ActionState {
        self.state
    }

    pub fn tracing_synopsis(&self) -> String {
        self.action.tracing_synopsis()
    }

    /// What executing would still do, nothing once completed
    pub fn describe_execute(&self) -> Vec<ActionDescription> {
        match self.state {
            ActionState::Completed | ActionState::Skipped => vec![],
            ActionState::Uncompleted | ActionState::Progress => self.action.execute_description(),
        }
    }

    /// What reverting would undo, nothing if the action never ran
    pub fn describe_revert(&self) -> Vec<ActionDescription> {
        match self.state {
            ActionState::Uncompleted | ActionState::Skipped => vec![],
            ActionState::Completed | ActionState::Progress => self.action.revert_description(),
        }
    }

    /// Execute the action unless it already completed
    ///
    /// Meta-actions call this on their children rather than [`Action::execute`]. A failure
    /// leaves the action in [`ActionState::Progress`], so a rollback still reverts it.
    pub async fn try_execute(&mut self, host: &dyn Host) -> Result<(), ActionError> {
        let synopsis = self.action.tracing_synopsis();
        match self.state {
            ActionState::Completed => {
                tracing::trace!("Already completed: {synopsis}");
                Ok(())
            },
            ActionState::Skipped => {
                tracing::trace!("Skipped: {synopsis}");
                Ok(())
            },
            ActionState::Uncompleted | ActionState::Progress => {
                self.state = ActionState::Progress;
                tracing::debug!("Executing: {synopsis}");
                let span = self.action.tracing_span();
                self.action.execute(host).instrument(span).await?;
                self.state = ActionState::Completed;
                tracing::debug!("Completed: {synopsis}");
                Ok(())
            },
        }
    }

    /// Revert the action if it ran at all, even partially
    pub async fn try_revert(&mut self, host: &dyn Host) -> Result<(), ActionError> {
        let synopsis = self.action.tracing_synopsis();
        match self.state {
            ActionState::Uncompleted => {
                tracing::trace!("Nothing to revert: {synopsis}");
                Ok(())
            },
            ActionState::Skipped => {
                tracing::trace!("Skipped: {synopsis}");
                Ok(())
            },
            ActionState::Completed | ActionState::Progress => {
                self.state = ActionState::Progress;
                tracing::debug!("Reverting: {synopsis}");
                let span = self.action.tracing_span();
                self.action.revert(host).instrument(span).await?;
                self.state = ActionState::Uncompleted;
                tracing::debug!("Reverted: {synopsis}");
                Ok(())
            },
        }
    }
}

/// How far an [`Action`] got
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq, Copy)]
pub enum ActionState {
    /// Done, skipped by [`InstallPlan::install`](crate::InstallPlan::install) and reverted on
    /// rollback
    Completed,
    /// Started but not finished, either failed or interrupted, run again on install and
    /// reverted on rollback
    Progress,
    /// Not started, run on install and left alone on rollback
    Uncompleted,
    /// Never run, neither on install nor on rollback
    Skipped,
}
