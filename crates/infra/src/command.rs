//! Command write path: the producer side of the PLog.
//!
//! Every command appends exactly one event. The event is put into the log
//! first, then the partition's synchronous projectors run on it. A failed
//! put leaves the views untouched; a failed synchronous projection fails the
//! command, but the event stays logged and is announced to the async
//! actualizers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::{debug, instrument};

use strata_core::{AppName, PartitionId};
use strata_events::{LogEvent, NewEvent, NotificationBroker, ProjectionKey};

use crate::actualizers::{ActualizerError, SyncActualizerPipeline};
use crate::config::ActualizerConfig;
use crate::partitions::{BorrowError, PartitionBorrower, ProcessorKind};
use crate::plog::{LogWriter, PLogError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error(transparent)]
    Borrow(#[from] BorrowError),

    #[error(transparent)]
    PLog(#[from] PLogError),

    #[error("synchronous projection failed: {0}")]
    Projection(#[from] ActualizerError),
}

type PartitionSlot = Arc<tokio::sync::Mutex<Option<SyncActualizerPipeline>>>;

/// Appends command events for one application.
///
/// Appends to the same partition are serialised; different partitions are
/// written concurrently.
pub struct CommandWriter {
    app: AppName,
    partitions: Arc<dyn PartitionBorrower>,
    log: Arc<dyn LogWriter>,
    broker: Arc<dyn NotificationBroker>,
    config: ActualizerConfig,
    slots: Mutex<HashMap<PartitionId, PartitionSlot>>,
}

impl CommandWriter {
    pub fn new(
        app: AppName,
        partitions: Arc<dyn PartitionBorrower>,
        log: Arc<dyn LogWriter>,
        broker: Arc<dyn NotificationBroker>,
        config: ActualizerConfig,
    ) -> Self {
        Self {
            app,
            partitions,
            log,
            broker,
            config: config.normalized(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, partition: PartitionId) -> PartitionSlot {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(partition)
            .or_default()
            .clone()
    }

    /// Append `event` to `partition` at the next offset.
    #[instrument(skip(self, event), fields(app = %self.app, partition = %partition, workspace = %event.workspace()), err)]
    pub async fn write(
        &self,
        partition: PartitionId,
        event: NewEvent,
    ) -> Result<Arc<LogEvent>, CommandError> {
        let slot = self.slot(partition);
        let mut sync_pipeline = slot.lock().await;

        let borrowed = self
            .partitions
            .borrow(&self.app, partition, ProcessorKind::Command)
            .await?;
        let offset = self.log.last_offset(partition).await?.next();
        let event = Arc::new(event.into_log_event(partition, offset));

        self.log.put(event.clone()).await?;

        let pipeline = sync_pipeline.get_or_insert_with(|| {
            SyncActualizerPipeline::new(borrowed.app_state().definition(), partition, &self.config)
        });
        let synced = pipeline.do_sync(&borrowed, &event).await;
        drop(borrowed);

        self.broker
            .update(ProjectionKey::plog_updates(self.app.clone(), partition), offset);
        for (view, workspace) in synced? {
            self.broker
                .update(ProjectionKey::new(self.app.clone(), view, workspace), offset);
        }
        debug!(offset = %offset, name = %event.name(), "event written");
        Ok(event)
    }

    /// Drop the cached synchronous pipelines, e.g. after the app was redeployed.
    pub fn reset_pipelines(&self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
