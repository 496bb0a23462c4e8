use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use strata_core::{AppName, Offset, PartitionId, QName};
use strata_events::{LogEvent, NotificationChannel, ProjectionKey};

use super::error::{ActualizerError, ActualizerResult};
use super::pipeline::ActualizerPipeline;
use super::projector::{ActualizerServices, AsyncErrorHandler, AsyncProjector};
use super::run_state::RunState;
use crate::config::ActualizerConfig;
use crate::partitions::{BorrowedPartition, ProcessorKind};
use crate::plog::ReadLimit;
use crate::retry::retry_until_cancelled;
use crate::views::actualizer_offset;

/// Receives every error that stops an actualizer run, with the actualizer name.
pub type ErrorSink = Arc<dyn Fn(&str, &ActualizerError) + Send + Sync>;

/// Error sink logging through `tracing`.
pub fn default_error_sink() -> ErrorSink {
    Arc::new(|actualizer: &str, err: &ActualizerError| {
        tracing::error!(actualizer = %actualizer, error = %err, "actualizer failed");
    })
}

/// Keeps one async projector up to date with one partition of the log.
///
/// ## Run Loop
///
/// Each run reads the stored offset, drains the log from there in batches,
/// then waits on a notification channel for `sys.PLogUpdates` and drains up
/// to the announced offset. Any error ends the run; [`AsyncActualizer::run`]
/// restarts it with backoff, so the actualizer resumes from the last flushed
/// offset and may deliver events again.
///
/// ## Partition Borrowing
///
/// The partition is borrowed per batch read and per projector invocation,
/// never while waiting for notifications.
pub struct AsyncActualizer {
    app: AppName,
    partition: PartitionId,
    projector: QName,
    name: String,
    services: ActualizerServices,
    config: ActualizerConfig,
    error_sink: ErrorSink,
    in_error: Arc<AtomicBool>,
}

impl AsyncActualizer {
    pub fn new(
        app: AppName,
        partition: PartitionId,
        projector: QName,
        services: ActualizerServices,
        config: ActualizerConfig,
    ) -> Self {
        Self {
            name: format!("{projector} [{partition}]"),
            app,
            partition,
            projector,
            services,
            config: config.normalized(),
            error_sink: default_error_sink(),
            in_error: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_error_sink(mut self, sink: ErrorSink) -> Self {
        self.error_sink = sink;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run until `cancel` fires, restarting after every failed run.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(actualizer = %self.name, "actualizer started");
        let policy = self.config.retry_policy();
        let attempts = retry_until_cancelled(
            &cancel,
            &policy,
            || self.run_once(&cancel),
            |attempt, err| {
                (self.error_sink)(&self.name, err);
                debug!(
                    actualizer = %self.name,
                    attempt,
                    delay_ms = policy.delay_for_attempt(attempt).as_millis() as u64,
                    "restarting actualizer"
                );
            },
        )
        .await;
        info!(actualizer = %self.name, runs = attempts, "actualizer stopped");
    }

    /// One run: init, read, teardown. `Ok` only when `parent` was cancelled.
    pub async fn run_once(&self, parent: &CancellationToken) -> ActualizerResult<()> {
        let run_state = Arc::new(RunState::new(parent));
        let mut run = ActualizerRun {
            actualizer: self,
            run_state: run_state.clone(),
            offset: Offset::NULL,
            pipeline: None,
            channel: None,
            deferred_read_error: None,
        };

        let outcome = tokio::select! {
            result = run.init_and_read() => result,
            _ = run_state.cancelled() => Ok(()),
        };
        if let Err(err) = outcome {
            run_state.cancel_with_error(err);
        }
        run.teardown().await;
        run_state.check()
    }
}

struct ActualizerRun<'a> {
    actualizer: &'a AsyncActualizer,
    run_state: Arc<RunState>,
    offset: Offset,
    pipeline: Option<ActualizerPipeline>,
    channel: Option<NotificationChannel>,
    deferred_read_error: Option<ActualizerError>,
}

impl ActualizerRun<'_> {
    async fn init_and_read(&mut self) -> ActualizerResult<()> {
        self.init().await?;
        self.keep_reading().await
    }

    async fn borrow(&self) -> ActualizerResult<BorrowedPartition> {
        let a = self.actualizer;
        Ok(a.services
            .partitions
            .borrow(&a.app, a.partition, ProcessorKind::Actualizer)
            .await?)
    }

    async fn init(&mut self) -> ActualizerResult<()> {
        let a = self.actualizer;

        let borrowed = self.borrow().await?;
        let definition = borrowed.app_state().shared_definition();
        let descriptor = definition
            .projector(&a.projector)
            .cloned()
            .ok_or_else(|| ActualizerError::ProjectorNotDefined(a.projector.clone()))?;
        self.offset = actualizer_offset(borrowed.app_state().views(), a.partition, &a.projector).await?;
        drop(borrowed);

        let projector = AsyncProjector::new(
            a.partition,
            descriptor,
            definition,
            a.services.clone(),
            &a.config,
            a.in_error.clone(),
            self.run_state.clone(),
        );
        let non_buffered = projector.is_non_buffered();
        let errors = AsyncErrorHandler::new(
            self.run_state.clone(),
            a.services.metrics.clone(),
            a.app.clone(),
            a.in_error.clone(),
        );
        self.pipeline = Some(ActualizerPipeline::start(
            projector,
            errors,
            self.run_state.clone(),
            a.config.bundles_limit,
            a.config.flush_interval,
        ));

        let channel = a.services.broker.new_channel(&a.name, a.config.channel_ttl)?;
        a.services
            .broker
            .subscribe(channel.id(), ProjectionKey::plog_updates(a.app.clone(), a.partition))?;
        self.channel = Some(channel);

        info!(
            actualizer = %a.name,
            offset = %self.offset,
            non_buffered,
            "actualizer initialised"
        );
        Ok(())
    }

    async fn keep_reading(&mut self) -> ActualizerResult<()> {
        self.read_plog(ReadLimit::ToEnd).await?;
        debug!(actualizer = %self.actualizer.name, offset = %self.offset, "caught up");

        loop {
            let channel = self.channel.as_mut().ok_or(ActualizerError::ChannelClosed)?;
            let Some((_, announced)) = channel.next().await else {
                return Err(ActualizerError::ChannelClosed);
            };
            if announced > self.offset {
                let limit = ReadLimit::Count(self.offset.distance_to(announced));
                self.read_plog(limit).await?;
            }
        }
    }

    /// Feed the pipeline with events after the current offset, batch by batch.
    async fn read_plog(&mut self, limit: ReadLimit) -> ActualizerResult<()> {
        let batch_size = self.actualizer.config.read_batch_size as u64;
        let mut delivered = 0u64;

        loop {
            if let Some(err) = self.deferred_read_error.take() {
                return Err(err);
            }
            let batch_limit = match limit {
                ReadLimit::ToEnd => batch_size,
                ReadLimit::Count(total) if delivered < total => batch_size.min(total - delivered),
                ReadLimit::Count(_) => return Ok(()),
            };

            let batch = self.read_batch(batch_limit).await?;
            if batch.is_empty() {
                return Ok(());
            }

            let pipeline = self.pipeline.as_ref().ok_or(ActualizerError::PipelineClosed)?;
            for event in batch {
                let offset = event.offset();
                pipeline.send(event).await?;
                self.offset = offset;
                delivered += 1;
            }
        }
    }

    /// Read up to `limit` events under one borrow.
    ///
    /// A read that fails after delivering events still returns them; the
    /// error is kept and returned by the next read attempt.
    async fn read_batch(&mut self, limit: u64) -> ActualizerResult<Vec<Arc<LogEvent>>> {
        let a = self.actualizer;
        let borrowed = self.borrow().await?;

        let mut batch = Vec::with_capacity(limit as usize);
        let mut collect = |event: Arc<LogEvent>| {
            batch.push(event);
            ControlFlow::Continue(())
        };
        let result = borrowed
            .app_state()
            .log()
            .read_plog(a.partition, self.offset.next(), ReadLimit::Count(limit), &mut collect)
            .await;
        drop(borrowed);

        match result {
            Ok(()) => Ok(batch),
            Err(err) if batch.is_empty() => Err(err.into()),
            Err(err) => {
                warn!(
                    actualizer = %a.name,
                    error = %err,
                    events = batch.len(),
                    "partial batch read; error deferred to the next read"
                );
                self.deferred_read_error = Some(err.into());
                Ok(batch)
            }
        }
    }

    async fn teardown(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.close().await;
        }
        self.channel.take();
    }
}
