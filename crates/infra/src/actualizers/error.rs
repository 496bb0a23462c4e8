use thiserror::Error;

use strata_core::{Offset, QName, WorkspaceId};
use strata_events::{BrokerError, StateError};

use crate::partitions::BorrowError;
use crate::plog::PLogError;
use crate::views::ViewStorageError;

/// Actualizer failure.
///
/// Cloneable because the first error of a run is shared between the reading
/// loop, the pipeline task and the supervisor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActualizerError {
    #[error("projector {0} is not defined in the application")]
    ProjectorNotDefined(QName),

    #[error("workspace {0} has no descriptor")]
    WorkspaceNotFound(WorkspaceId),

    #[error("projector {name} failed: {message}")]
    Projector { name: QName, message: String },

    #[error("intents limit exceeded: at most {limit} intents per event")]
    IntentsLimitExceeded { limit: usize },

    #[error("projector {projector} staged an intent for undeclared view {view}")]
    UndeclaredView { projector: QName, view: QName },

    #[error(transparent)]
    Borrow(#[from] BorrowError),

    #[error(transparent)]
    PLog(#[from] PLogError),

    #[error(transparent)]
    Views(#[from] ViewStorageError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("notification channel closed")]
    ChannelClosed,

    #[error("actualizer pipeline stopped")]
    PipelineClosed,

    #[error("wsid[{workspace}] offset[{offset}]: {source}")]
    Event {
        workspace: WorkspaceId,
        offset: Offset,
        source: Box<ActualizerError>,
    },
}

impl ActualizerError {
    /// Attach the position of the event being handled.
    pub fn at(self, workspace: WorkspaceId, offset: Offset) -> Self {
        ActualizerError::Event {
            workspace,
            offset,
            source: Box::new(self),
        }
    }

    /// Render a projector body failure, keeping the limit error recognisable.
    pub fn from_projector(name: &QName, err: anyhow::Error) -> Self {
        match err.downcast_ref::<StateError>() {
            Some(StateError::IntentsLimitExceeded { limit }) => {
                ActualizerError::IntentsLimitExceeded { limit: *limit }
            }
            Some(StateError::UndeclaredView { projector, view }) => ActualizerError::UndeclaredView {
                projector: projector.clone(),
                view: view.clone(),
            },
            _ => ActualizerError::Projector {
                name: name.clone(),
                message: format!("{err:#}"),
            },
        }
    }
}

impl From<StateError> for ActualizerError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::IntentsLimitExceeded { limit } => {
                ActualizerError::IntentsLimitExceeded { limit }
            }
            StateError::UndeclaredView { projector, view } => {
                ActualizerError::UndeclaredView { projector, view }
            }
            StateError::Storage(message) => {
                ActualizerError::Views(ViewStorageError::Storage(message))
            }
        }
    }
}

pub type ActualizerResult<T> = Result<T, ActualizerError>;
