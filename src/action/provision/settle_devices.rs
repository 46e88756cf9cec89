use std::{path::PathBuf, time::Duration};

use strum::IntoEnumIterator;
use tracing::{span, Span};

use crate::{
    action::{Action, ActionDescription, ActionError, ActionErrorKind, ActionTag, StatefulAction},
    device::{DeviceNodeSet, DeviceState},
    os::{Host, RereadMethod},
};

/**
Wait for the kernel and udev to create the device nodes of the new partitions
 */
#[derive(Debug, serde::Deserialize, serde::Serialize, Clone)]
#[serde(tag = "action_name", rename = "settle_devices")]
pub struct SettleDevices {
    disk: PathBuf,
    nodes: DeviceNodeSet,
    attempts: usize,
    interval_ms: u64,
}

impl SettleDevices {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn plan(
        disk: PathBuf,
        nodes: DeviceNodeSet,
        attempts: usize,
        interval: Duration,
    ) -> StatefulAction<Self> {
        Self {
            disk,
            nodes,
            attempts,
            interval_ms: interval.as_millis() as u64,
        }
        .into()
    }
}

#[async_trait::async_trait]
impl Action for SettleDevices {
    fn action_tag() -> ActionTag {
        ActionTag("settle_devices")
    }
    fn tracing_synopsis(&self) -> String {
        format!(
            "Wait for the partitions of `{}` to appear",
            self.disk.display()
        )
    }

    fn tracing_span(&self) -> Span {
        span!(
            tracing::Level::DEBUG,
            "settle_devices",
            disk = %self.disk.display(),
            attempts = self.attempts,
            interval_ms = self.interval_ms,
        )
    }

    fn execute_description(&self) -> Vec<ActionDescription> {
        vec![ActionDescription::new(
            self.tracing_synopsis(),
            vec![format!(
                "Re-read the partition table, then check up to {} times, {}ms apart, for {}",
                self.attempts,
                self.interval_ms,
                self.nodes
                    .iter()
                    .map(|node| format!("`{}`", node.display()))
                    .collect::<Vec<_>>()
                    .join(", ")
            )],
        )]
    }

    #[tracing::instrument(level = "debug", skip_all, fields(disk = %self.disk.display()))]
    async fn execute(&mut self, host: &dyn Host) -> Result<(), ActionError> {
        let mut reread = false;
        for method in RereadMethod::iter() {
            match host.reread_partition_table(&self.disk, method).await {
                Ok(()) => {
                    reread = true;
                    break;
                },
                Err(err) => tracing::debug!(%method, error = ?err, "Re-reading the partition table failed"),
            }
        }
        if !reread {
            tracing::warn!(
                disk = %self.disk.display(),
                "Could not ask the kernel to re-read the partition table, waiting for the partitions anyway"
            );
        }

        let interval = Duration::from_millis(self.interval_ms);
        let mut last_state = Vec::new();
        for attempt in 1..=self.attempts {
            if let Err(err) = host.trigger_device_scan().await {
                tracing::debug!(error = ?err, "Triggering a device scan failed");
            }
            if let Err(err) = host.wait_device_settle().await {
                tracing::debug!(error = ?err, "Waiting for device events failed");
            }

            last_state.clear();
            for node in self.nodes.iter() {
                last_state.push((node.to_path_buf(), host.probe(node).await));
            }
            if last_state
                .iter()
                .all(|(_, state)| *state == DeviceState::BlockDevice)
            {
                tracing::debug!(attempt, "Partition device nodes are present");
                return Ok(());
            }

            tracing::trace!(attempt, attempts = self.attempts, "Partition device nodes not present yet");
            if attempt < self.attempts {
                host.sleep(interval).await;
            }
        }

        Err(Self::error(ActionErrorKind::DeviceTimeout {
            attempts: self.attempts,
            last_state,
        }))
    }

    fn revert_description(&self) -> Vec<ActionDescription> {
        vec![]
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn revert(&mut self, _host: &dyn Host) -> Result<(), ActionError> {
        Ok(())
    }
}
