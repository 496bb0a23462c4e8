use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use strata_core::{AppName, Offset, PartitionId, QName};
use strata_events::{AppDefinition, LogEvent, NotificationBroker, ProjectionKey, ProjectorDescriptor};
use strata_observability::metrics::{
    ActualizerMetrics, CURRENT_OFFSET, FLUSHES_TOTAL, MetricKey, PROJECTORS_IN_ERROR, STORED_OFFSET,
};

use super::error::{ActualizerError, ActualizerResult};
use super::run_state::RunState;
use super::state::BundledState;
use crate::config::ActualizerConfig;
use crate::partitions::{BorrowedPartition, PartitionBorrower, ProcessorKind};
use crate::views::{ViewStorage, offset_record, workspace_kind};

/// Collaborators shared by the async actualizers of a process.
#[derive(Clone)]
pub struct ActualizerServices {
    pub partitions: Arc<dyn PartitionBorrower>,
    pub broker: Arc<dyn NotificationBroker>,
    pub metrics: Arc<dyn ActualizerMetrics>,
}

/// Pipeline stage applying one projector to the events of one partition.
///
/// Owns the bundle of unflushed writes and the offset waiting to be saved.
pub struct AsyncProjector {
    app: AppName,
    partition: PartitionId,
    descriptor: ProjectorDescriptor,
    definition: Arc<AppDefinition>,
    services: ActualizerServices,
    metric_key: MetricKey,
    app_key: MetricKey,
    non_buffered: bool,
    flush_position_interval: Duration,
    state: BundledState,
    pending_offset: Offset,
    accepted_since_save: bool,
    last_save: Instant,
    in_error: Arc<AtomicBool>,
    run_state: Arc<RunState>,
}

impl AsyncProjector {
    pub fn new(
        partition: PartitionId,
        descriptor: ProjectorDescriptor,
        definition: Arc<AppDefinition>,
        services: ActualizerServices,
        config: &ActualizerConfig,
        in_error: Arc<AtomicBool>,
        run_state: Arc<RunState>,
    ) -> Self {
        let app = definition.app().clone();
        Self {
            metric_key: MetricKey::actualizer(app.clone(), partition, descriptor.name().clone()),
            app_key: MetricKey::app(app.clone()),
            non_buffered: !descriptor.is_buffered_eligible(),
            flush_position_interval: config.flush_position_interval,
            state: BundledState::new(config.intents_limit, config.bundles_limit),
            pending_offset: Offset::NULL,
            accepted_since_save: false,
            last_save: Instant::now(),
            app,
            partition,
            descriptor,
            definition,
            services,
            in_error,
            run_state,
        }
    }

    pub fn name(&self) -> &QName {
        self.descriptor.name()
    }

    pub fn is_non_buffered(&self) -> bool {
        self.non_buffered
    }

    /// Handle one event, flushing when the bundle is full or the projector
    /// is non-buffered.
    pub async fn process(&mut self, event: Arc<LogEvent>) -> ActualizerResult<()> {
        let offset = event.offset();
        self.services
            .metrics
            .set(CURRENT_OFFSET, &self.metric_key, offset.get() as i64);
        self.pending_offset = offset;

        if !self.definition.accepts(&self.descriptor, &event) {
            trace!(projector = %self.name(), offset = %offset, "event not accepted");
            return Ok(());
        }

        self.apply(&event)
            .await
            .map_err(|err| err.at(event.workspace(), offset))
    }

    async fn apply(&mut self, event: &LogEvent) -> ActualizerResult<()> {
        let borrowed = self.borrow().await?;
        let app_state = borrowed.app_state();

        let kind = workspace_kind(app_state.views(), event.workspace())
            .await?
            .ok_or(ActualizerError::WorkspaceNotFound(event.workspace()))?;
        if !app_state
            .definition()
            .workspace_defines(&kind, self.descriptor.name())
        {
            trace!(projector = %self.name(), workspace = %event.workspace(), "projector not defined in workspace");
            return Ok(());
        }

        let mut invocation = self.state.invocation(app_state.views());
        let invoked = borrowed
            .invoke(self.descriptor.name(), event, &mut invocation)
            .await;
        if let Err(err) = invoked {
            self.state.clear_intents();
            return Err(ActualizerError::from_projector(self.descriptor.name(), err));
        }

        self.accepted_since_save = true;
        let ready = self.state.apply_intents();
        if ready || self.non_buffered {
            self.flush(app_state.views()).await?;
        }
        Ok(())
    }

    /// Borrow the partition, giving up when the run is cancelled.
    async fn borrow(&self) -> ActualizerResult<BorrowedPartition> {
        tokio::select! {
            borrowed = self.services.partitions.borrow(&self.app, self.partition, ProcessorKind::Actualizer) => {
                Ok(borrowed?)
            }
            _ = self.run_state.cancelled() => Err(self
                .run_state
                .current_error()
                .unwrap_or(ActualizerError::PipelineClosed)),
        }
    }

    /// Whether an idle flush would write anything.
    pub fn needs_flush(&self) -> bool {
        !self.pending_offset.is_null()
            && (self.accepted_since_save
                || self.state.is_dirty()
                || self.last_save.elapsed() >= self.flush_position_interval)
    }

    /// Timer-driven flush: borrow the partition and flush through it.
    pub async fn flush_idle(&mut self) -> ActualizerResult<()> {
        if !self.needs_flush() {
            return Ok(());
        }
        let borrowed = self.borrow().await?;
        self.flush(borrowed.app_state().views()).await
    }

    /// Commit the bundle, and the offset record when it is due.
    pub async fn flush(&mut self, views: &dyn ViewStorage) -> ActualizerResult<()> {
        if self.pending_offset.is_null() {
            return Ok(());
        }
        let offset = self.pending_offset;

        let save_offset = self.accepted_since_save
            || self.last_save.elapsed() >= self.flush_position_interval;
        if save_offset {
            self.state
                .stage_offset(offset_record(self.partition, self.descriptor.name(), offset));
        }
        if !self.state.is_dirty() {
            return Ok(());
        }

        let touched = match self.state.flush(views).await {
            Ok(touched) => touched,
            Err(err) => {
                self.state.discard();
                self.accepted_since_save = false;
                return Err(err.into());
            }
        };

        let metrics = &self.services.metrics;
        metrics.increase(FLUSHES_TOTAL, &self.metric_key, 1);
        if save_offset {
            metrics.set(STORED_OFFSET, &self.metric_key, offset.get() as i64);
            self.pending_offset = Offset::NULL;
            self.accepted_since_save = false;
            self.last_save = Instant::now();
        }
        debug!(
            projector = %self.name(),
            partition = %self.partition,
            offset = %offset,
            views = touched.len(),
            "flushed"
        );

        for (view, workspace) in touched {
            self.services
                .broker
                .update(ProjectionKey::new(self.app.clone(), view, workspace), offset);
        }
        if self
            .in_error
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            metrics.increase(PROJECTORS_IN_ERROR, &self.app_key, -1);
        }
        Ok(())
    }
}

/// Final pipeline stage: raises the error gauge and cancels the run.
pub struct AsyncErrorHandler {
    run_state: Arc<RunState>,
    metrics: Arc<dyn ActualizerMetrics>,
    app_key: MetricKey,
    in_error: Arc<AtomicBool>,
}

impl AsyncErrorHandler {
    pub fn new(
        run_state: Arc<RunState>,
        metrics: Arc<dyn ActualizerMetrics>,
        app: AppName,
        in_error: Arc<AtomicBool>,
    ) -> Self {
        Self {
            run_state,
            metrics,
            app_key: MetricKey::app(app),
            in_error,
        }
    }

    pub fn handle(&self, err: ActualizerError) {
        if self
            .in_error
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.metrics.increase(PROJECTORS_IN_ERROR, &self.app_key, 1);
        }
        self.run_state.cancel_with_error(err);
    }
}
