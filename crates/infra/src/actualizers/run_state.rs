use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use super::error::ActualizerError;

/// Cancellation and first-error holder of one actualizer run.
///
/// Shared by the reading loop, the notification watch and the pipeline task.
/// The token is a child of the supervisor's token: cancelling the parent
/// cancels the run without recording an error.
#[derive(Debug)]
pub struct RunState {
    token: CancellationToken,
    error: Mutex<Option<ActualizerError>>,
}

impl RunState {
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            error: Mutex::new(None),
        }
    }

    /// Record `err` and cancel the run. Only the first error is kept.
    pub fn cancel_with_error(&self, err: ActualizerError) {
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
        self.token.cancel();
    }

    pub fn current_error(&self) -> Option<ActualizerError> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the run is cancelled, by error or by the parent.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// `Err` with the recorded error if one was posted.
    pub fn check(&self) -> Result<(), ActualizerError> {
        match self.current_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
