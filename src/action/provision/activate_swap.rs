use std::path::{Path, PathBuf};

use tracing::{span, Span};

use crate::{
    action::{Action, ActionDescription, ActionError, ActionErrorKind, ActionTag, StatefulAction},
    device::same_device,
    os::Host,
};

/**
Enable swap on a partition and check the kernel lists it
 */
#[derive(Debug, serde::Deserialize, serde::Serialize, Clone)]
#[serde(tag = "action_name", rename = "activate_swap")]
pub struct ActivateSwap {
    device: PathBuf,
}

impl ActivateSwap {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn plan(device: impl AsRef<Path>) -> StatefulAction<Self> {
        Self {
            device: device.as_ref().to_path_buf(),
        }
        .into()
    }
}

/// Whether `device` is among the active swap devices
pub(crate) async fn swap_is_active(
    host: &dyn Host,
    device: &Path,
) -> Result<bool, ActionErrorKind> {
    for active in host.active_swaps().await? {
        if same_device(&active, device).await {
            return Ok(true);
        }
    }
    Ok(false)
}

#[async_trait::async_trait]
impl Action for ActivateSwap {
    fn action_tag() -> ActionTag {
        ActionTag("activate_swap")
    }
    fn tracing_synopsis(&self) -> String {
        format!("Enable swap on `{}`", self.device.display())
    }

    fn tracing_span(&self) -> Span {
        span!(
            tracing::Level::DEBUG,
            "activate_swap",
            device = %self.device.display(),
        )
    }

    fn execute_description(&self) -> Vec<ActionDescription> {
        vec![ActionDescription::new(self.tracing_synopsis(), vec![])]
    }

    #[tracing::instrument(level = "debug", skip_all, fields(device = %self.device.display()))]
    async fn execute(&mut self, host: &dyn Host) -> Result<(), ActionError> {
        host.swap_on(&self.device).await.map_err(Self::error)?;

        if !swap_is_active(host, &self.device)
            .await
            .map_err(Self::error)?
        {
            return Err(Self::error(ActionErrorKind::SwapVerification(
                self.device.clone(),
            )));
        }
        Ok(())
    }

    fn revert_description(&self) -> Vec<ActionDescription> {
        vec![ActionDescription::new(
            format!("Disable swap on `{}`", self.device.display()),
            vec![],
        )]
    }

    #[tracing::instrument(level = "debug", skip_all, fields(device = %self.device.display()))]
    async fn revert(&mut self, host: &dyn Host) -> Result<(), ActionError> {
        if !swap_is_active(host, &self.device)
            .await
            .map_err(Self::error)?
        {
            tracing::debug!("Swap already disabled");
            return Ok(());
        }
        host.swap_off(&self.device).await.map_err(Self::error)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::os::fake::{FailPoint, FakeHost};

    #[tokio::test]
    async fn activates_and_deactivates() -> eyre::Result<()> {
        let host = FakeHost::new("/dev/vda", 0);
        let mut action = ActivateSwap::plan("/dev/vda3");
        action.try_execute(&host).await?;
        assert!(host.state().swaps.contains(Path::new("/dev/vda3")));

        action.try_revert(&host).await?;
        assert!(host.state().swaps.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn unlisted_swap_fails() -> eyre::Result<()> {
        let host = FakeHost::new("/dev/vda", 0).failing(FailPoint::SwapNotListed);
        let err = ActivateSwap::plan("/dev/vda3")
            .try_execute(&host)
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), ActionErrorKind::SwapVerification(_)));
        Ok(())
    }
}
