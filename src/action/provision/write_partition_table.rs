use std::path::PathBuf;

use tracing::{span, Span};

use crate::{
    action::{Action, ActionDescription, ActionError, ActionTag, StatefulAction},
    os::Host,
    planner::PartitionPlan,
};

/**
Replace the partition table of the disk with a fresh GPT
 */
#[derive(Debug, serde::Deserialize, serde::Serialize, Clone)]
#[serde(tag = "action_name", rename = "write_partition_table")]
pub struct WritePartitionTable {
    disk: PathBuf,
    script: String,
}

impl WritePartitionTable {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn plan(partition_plan: &PartitionPlan) -> StatefulAction<Self> {
        Self {
            disk: partition_plan.disk.clone(),
            script: partition_plan.sfdisk_script(),
        }
        .into()
    }
}

#[async_trait::async_trait]
impl Action for WritePartitionTable {
    fn action_tag() -> ActionTag {
        ActionTag("write_partition_table")
    }
    fn tracing_synopsis(&self) -> String {
        format!(
            "Wipe `{}` and write a new GPT partition table",
            self.disk.display()
        )
    }

    fn tracing_span(&self) -> Span {
        span!(
            tracing::Level::DEBUG,
            "write_partition_table",
            disk = %self.disk.display(),
        )
    }

    fn execute_description(&self) -> Vec<ActionDescription> {
        vec![ActionDescription::new(
            self.tracing_synopsis(),
            vec![
                "All existing partitions and filesystem signatures on the disk are erased"
                    .to_string(),
                format!(
                    "The table is written by `sfdisk` from:\n{}",
                    self.script.trim_end()
                ),
            ],
        )]
    }

    #[tracing::instrument(level = "debug", skip_all, fields(disk = %self.disk.display()))]
    async fn execute(&mut self, host: &dyn Host) -> Result<(), ActionError> {
        host.write_partition_table(&self.disk, &self.script)
            .await
            .map_err(Self::error)?;
        Ok(())
    }

    fn revert_description(&self) -> Vec<ActionDescription> {
        vec![]
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn revert(&mut self, _host: &dyn Host) -> Result<(), ActionError> {
        // The previous table is gone
        Ok(())
    }
}
