use strata_core::{PartitionId, QName, WorkspaceId};
use strata_events::{AppDefinition, LogEvent, ProjectorDescriptor};
use tracing::trace;

use super::error::{ActualizerError, ActualizerResult};
use super::state::{BundledState, touched_views};
use crate::config::ActualizerConfig;
use crate::partitions::BorrowedPartition;

struct SyncBranch {
    descriptor: ProjectorDescriptor,
    state: BundledState,
}

/// Runs every synchronous projector of an application inline with the
/// command that produced the event.
///
/// ## Atomicity
///
/// Each projector stages its writes in its own state. Only when every
/// projector succeeded are the writes of all of them committed, in a single
/// batch; otherwise all of them are discarded and the error is returned to
/// the command.
pub struct SyncActualizerPipeline {
    partition: PartitionId,
    branches: Vec<SyncBranch>,
}

impl SyncActualizerPipeline {
    pub fn new(definition: &AppDefinition, partition: PartitionId, config: &ActualizerConfig) -> Self {
        let branches = definition
            .sync_projectors()
            .map(|descriptor| SyncBranch {
                descriptor: descriptor.clone(),
                state: BundledState::new(config.intents_limit, usize::MAX),
            })
            .collect();
        Self {
            partition,
            branches,
        }
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn projectors(&self) -> impl Iterator<Item = &QName> {
        self.branches.iter().map(|b| b.descriptor.name())
    }

    /// Project `event` with every synchronous projector and commit the result.
    ///
    /// Returns the `(view, workspace)` pairs that were written.
    pub async fn do_sync(
        &mut self,
        partition: &BorrowedPartition,
        event: &LogEvent,
    ) -> ActualizerResult<Vec<(QName, WorkspaceId)>> {
        let result = self.project(partition, event).await;
        if result.is_err() {
            for branch in &mut self.branches {
                branch.state.discard();
            }
        }
        result.map_err(|err| err.at(event.workspace(), event.offset()))
    }

    async fn project(
        &mut self,
        partition: &BorrowedPartition,
        event: &LogEvent,
    ) -> ActualizerResult<Vec<(QName, WorkspaceId)>> {
        let app_state = partition.app_state();
        let definition = app_state.definition();
        let views = app_state.views();

        for branch in &mut self.branches {
            if !definition.accepts(&branch.descriptor, event) {
                continue;
            }
            trace!(projector = %branch.descriptor.name(), offset = %event.offset(), "sync projection");

            let name = branch.descriptor.name();
            let mut invocation = branch.state.invocation(views);
            partition
                .invoke(name, event, &mut invocation)
                .await
                .map_err(|err| ActualizerError::from_projector(name, err))?;

            if let Some(intent) = branch
                .state
                .intents()
                .iter()
                .find(|intent| !branch.descriptor.view_intents().contains(&intent.view))
            {
                return Err(ActualizerError::UndeclaredView {
                    projector: name.clone(),
                    view: intent.view.clone(),
                });
            }
        }

        let mut records = Vec::new();
        for branch in &mut self.branches {
            branch.state.apply_intents();
            records.extend(branch.state.take_records());
        }
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let touched = touched_views(&records);
        views.put_batch(records).await?;
        Ok(touched)
    }
}
