//! Projectors: descriptors, the function contract and the state they see.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use strata_core::{QName, WorkspaceId};

use crate::event::LogEvent;
use crate::view::{ViewKey, ViewValue};

/// Kind of storage a projector declares it reads (state) or writes (intents).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    View,
    Record,
    WLog,
    Http,
    SendMail,
    Federation,
    Custom(QName),
}

impl StorageKind {
    /// View and record writes can be held back and committed as one bundle.
    pub fn is_bufferable(&self) -> bool {
        matches!(self, StorageKind::View | StorageKind::Record)
    }
}

/// Event pattern a projector reacts to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// The command with the trigger's name was executed.
    Execute,
    /// A command was executed with an argument of the trigger's name (or kind).
    ExecuteWithParam,
    Insert,
    Update,
    Activate,
    Deactivate,
}

/// A name together with the event kinds that trigger on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub name: QName,
    pub kinds: Vec<TriggerKind>,
}

/// Declaration of a projector inside an application definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectorDescriptor {
    name: QName,
    sync: bool,
    want_errors: bool,
    triggers: Vec<Trigger>,
    states: BTreeSet<StorageKind>,
    intents: BTreeSet<StorageKind>,
    view_intents: BTreeSet<QName>,
}

impl ProjectorDescriptor {
    /// An asynchronous projector with no triggers (reacts to every valid event).
    pub fn new(name: QName) -> Self {
        Self {
            name,
            sync: false,
            want_errors: false,
            triggers: Vec::new(),
            states: BTreeSet::new(),
            intents: BTreeSet::new(),
            view_intents: BTreeSet::new(),
        }
    }

    /// Run inline with the command instead of in an async actualizer.
    pub fn synchronous(mut self) -> Self {
        self.sync = true;
        self
    }

    /// Also receive events rejected by the command path (`sys.Error`).
    pub fn want_errors(mut self) -> Self {
        self.want_errors = true;
        self
    }

    pub fn on(mut self, name: QName, kinds: impl IntoIterator<Item = TriggerKind>) -> Self {
        self.triggers.push(Trigger {
            name,
            kinds: kinds.into_iter().collect(),
        });
        self
    }

    pub fn reads(mut self, storage: StorageKind) -> Self {
        self.states.insert(storage);
        self
    }

    pub fn writes(mut self, storage: StorageKind) -> Self {
        self.intents.insert(storage);
        self
    }

    /// Declare a view this projector writes to.
    pub fn writes_view(mut self, view: QName) -> Self {
        self.intents.insert(StorageKind::View);
        self.view_intents.insert(view);
        self
    }

    pub fn name(&self) -> &QName {
        &self.name
    }

    pub fn is_sync(&self) -> bool {
        self.sync
    }

    pub fn wants_errors(&self) -> bool {
        self.want_errors
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    pub fn states(&self) -> &BTreeSet<StorageKind> {
        &self.states
    }

    pub fn intents(&self) -> &BTreeSet<StorageKind> {
        &self.intents
    }

    pub fn view_intents(&self) -> &BTreeSet<QName> {
        &self.view_intents
    }

    /// `true` when every declared state and intent storage is View or Record.
    ///
    /// Projectors touching any other storage have externally visible side
    /// effects and must be flushed after every event.
    pub fn is_buffered_eligible(&self) -> bool {
        self.states
            .iter()
            .chain(self.intents.iter())
            .all(StorageKind::is_bufferable)
    }
}

/// Failures raised by the state a projector works against.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("intents limit exceeded: at most {limit} intents per event")]
    IntentsLimitExceeded { limit: usize },

    #[error("view {view} is not declared as an intent of projector {projector}")]
    UndeclaredView { projector: QName, view: QName },

    #[error("state storage failure: {0}")]
    Storage(String),
}

/// Application state as seen by one projector invocation.
///
/// Reads observe the writes staged by the same actualizer that have not been
/// committed yet, so a projector can update a value more than once before a
/// flush. Writes are only staged; the actualizer decides when they are
/// committed.
#[async_trait]
pub trait ProjectorState: Send + Sync {
    async fn read_view(
        &self,
        view: &QName,
        workspace: WorkspaceId,
        key: &ViewKey,
    ) -> Result<Option<ViewValue>, StateError>;

    fn put_view(
        &mut self,
        view: &QName,
        workspace: WorkspaceId,
        key: ViewKey,
        value: ViewValue,
    ) -> Result<(), StateError>;
}

/// A projector body: the business logic behind a [`ProjectorDescriptor`].
///
/// ## Delivery
///
/// Events arrive in log order for one partition, at least once. After a crash
/// or an error the actualizer replays from the last persisted offset, so the
/// same event can be projected again. Bodies must therefore be safe to
/// re-invoke; see [`crate::idempotency`] for the offset-stamping helpers.
///
/// ## Errors
///
/// Returning an error stops the actualizer. It is restarted with backoff and
/// retries the same event until the body succeeds.
#[async_trait]
pub trait Projector: Send + Sync {
    async fn project(&self, event: &LogEvent, state: &mut dyn ProjectorState) -> anyhow::Result<()>;
}

#[async_trait]
impl<P> Projector for Arc<P>
where
    P: Projector + ?Sized,
{
    async fn project(&self, event: &LogEvent, state: &mut dyn ProjectorState) -> anyhow::Result<()> {
        (**self).project(event, state).await
    }
}

/// Projector bodies of one application, by projector name.
#[derive(Default, Clone)]
pub struct ProjectorRegistry {
    bodies: HashMap<QName, Arc<dyn Projector>>,
}

impl ProjectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: QName, body: impl Projector + 'static) -> Self {
        self.bodies.insert(name, Arc::new(body));
        self
    }

    pub fn get(&self, name: &QName) -> Option<&Arc<dyn Projector>> {
        self.bodies.get(name)
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

impl core::fmt::Debug for ProjectorRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.bodies.keys()).finish()
    }
}
