use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use thiserror::Error;

use strata_core::{AppName, PartitionId, QName};
use strata_events::{AppDefinition, LogEvent, ProjectorRegistry, ProjectorState};

use crate::plog::LogReader;
use crate::views::ViewStorage;

/// Role a partition is borrowed for. Each role has its own engine pool.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ProcessorKind {
    Command,
    Query,
    Actualizer,
    Scheduler,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BorrowError {
    #[error("application {0} is not deployed")]
    AppNotDeployed(AppName),

    #[error("partition {partition} of application {app} is not deployed")]
    PartitionNotDeployed { app: AppName, partition: PartitionId },

    #[error("no {kind:?} engines for {app} [{partition}]")]
    NoEngines {
        app: AppName,
        partition: PartitionId,
        kind: ProcessorKind,
    },

    #[error("partition borrow failed: {0}")]
    Unavailable(String),
}

/// Runtime state of a deployed application, reachable through a borrow.
pub struct AppState {
    definition: Arc<AppDefinition>,
    log: Arc<dyn LogReader>,
    views: Arc<dyn ViewStorage>,
    projectors: ProjectorRegistry,
}

impl AppState {
    pub fn new(
        definition: Arc<AppDefinition>,
        log: Arc<dyn LogReader>,
        views: Arc<dyn ViewStorage>,
        projectors: ProjectorRegistry,
    ) -> Self {
        Self {
            definition,
            log,
            views,
            projectors,
        }
    }

    pub fn definition(&self) -> &AppDefinition {
        &self.definition
    }

    /// The definition, detached from the borrow.
    pub fn shared_definition(&self) -> Arc<AppDefinition> {
        self.definition.clone()
    }

    pub fn log(&self) -> &dyn LogReader {
        self.log.as_ref()
    }

    pub fn views(&self) -> &dyn ViewStorage {
        self.views.as_ref()
    }

    pub fn projectors(&self) -> &ProjectorRegistry {
        &self.projectors
    }
}

impl core::fmt::Debug for AppState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppState")
            .field("app", self.definition.app())
            .field("projectors", &self.projectors)
            .finish_non_exhaustive()
    }
}

/// A borrowed partition. Released when dropped.
pub struct BorrowedPartition {
    app_state: Arc<AppState>,
    partition: PartitionId,
    kind: ProcessorKind,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl BorrowedPartition {
    pub fn new(
        app_state: Arc<AppState>,
        partition: PartitionId,
        kind: ProcessorKind,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            app_state,
            partition,
            kind,
            release: Some(Box::new(release)),
        }
    }

    pub fn app_state(&self) -> &AppState {
        &self.app_state
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn kind(&self) -> ProcessorKind {
        self.kind
    }

    /// Run the registered body of `projector` against `state`.
    pub async fn invoke(
        &self,
        projector: &QName,
        event: &LogEvent,
        state: &mut dyn ProjectorState,
    ) -> anyhow::Result<()> {
        let body = self
            .app_state
            .projectors()
            .get(projector)
            .ok_or_else(|| anyhow!("projector {projector} has no registered body"))?;
        body.project(event, state).await
    }

    /// Give the partition back. Same as dropping the handle.
    pub fn release(self) {}
}

impl Drop for BorrowedPartition {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl core::fmt::Debug for BorrowedPartition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BorrowedPartition")
            .field("app", self.app_state.definition().app())
            .field("partition", &self.partition)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Grants scoped, exclusive access to application partitions.
///
/// `borrow()` waits until an engine of the requested kind is free. Dropping
/// the returned future abandons the wait, so callers cancel a borrow by
/// racing it against their own cancellation.
#[async_trait]
pub trait PartitionBorrower: Send + Sync {
    async fn borrow(
        &self,
        app: &AppName,
        partition: PartitionId,
        kind: ProcessorKind,
    ) -> Result<BorrowedPartition, BorrowError>;
}

#[async_trait]
impl<B> PartitionBorrower for Arc<B>
where
    B: PartitionBorrower + ?Sized,
{
    async fn borrow(
        &self,
        app: &AppName,
        partition: PartitionId,
        kind: ProcessorKind,
    ) -> Result<BorrowedPartition, BorrowError> {
        (**self).borrow(app, partition, kind).await
    }
}
