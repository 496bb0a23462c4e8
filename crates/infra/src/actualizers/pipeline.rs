use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::warn;

use strata_events::LogEvent;

use super::error::{ActualizerError, ActualizerResult};
use super::projector::{AsyncErrorHandler, AsyncProjector};
use super::run_state::RunState;

/// Bounded hand-off between the log reader and the projector stage.
///
/// The stage runs as its own task: it processes events in order, flushes on
/// an idle timer, and stops at the first error after passing it to the
/// error handler. Events queued behind a failed one are dropped.
pub struct ActualizerPipeline {
    sender: Option<mpsc::Sender<Arc<LogEvent>>>,
    stage: Option<JoinHandle<()>>,
    run_state: Arc<RunState>,
}

impl ActualizerPipeline {
    pub fn start(
        projector: AsyncProjector,
        errors: AsyncErrorHandler,
        run_state: Arc<RunState>,
        capacity: usize,
        flush_interval: Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let stage = tokio::spawn(run_stage(
            projector,
            errors,
            receiver,
            run_state.clone(),
            flush_interval,
        ));
        Self {
            sender: Some(sender),
            stage: Some(stage),
            run_state,
        }
    }

    /// Queue an event; waits while the queue is full.
    pub async fn send(&self, event: Arc<LogEvent>) -> ActualizerResult<()> {
        let Some(sender) = &self.sender else {
            return Err(ActualizerError::PipelineClosed);
        };
        tokio::select! {
            sent = sender.send(event) => sent.map_err(|_| self.stopped_error()),
            _ = self.run_state.cancelled() => Err(self.stopped_error()),
        }
    }

    fn stopped_error(&self) -> ActualizerError {
        self.run_state
            .current_error()
            .unwrap_or(ActualizerError::PipelineClosed)
    }

    /// Stop accepting events and wait for the stage to finish. Idempotent.
    pub async fn close(&mut self) {
        self.sender.take();
        if let Some(stage) = self.stage.take() {
            if let Err(err) = stage.await {
                warn!(error = %err, "actualizer pipeline stage panicked");
            }
        }
    }
}

async fn run_stage(
    mut projector: AsyncProjector,
    errors: AsyncErrorHandler,
    mut receiver: mpsc::Receiver<Arc<LogEvent>>,
    run_state: Arc<RunState>,
    flush_interval: Duration,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        let result = tokio::select! {
            biased;
            _ = run_state.cancelled() => return,
            _ = ticker.tick() => projector.flush_idle().await,
            event = receiver.recv() => match event {
                Some(event) => projector.process(event).await,
                None => return,
            },
        };
        if let Err(err) = result {
            // A cancelled run is not an actualizer failure.
            if !run_state.is_cancelled() {
                errors.handle(err);
            }
            return;
        }
    }
}
