//! Events as they are stored in the partitioned log (PLog).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use strata_core::{Offset, PartitionId, QName, WorkspaceId};

/// Name logged for a command that was rejected by validation.
pub fn error_event_name() -> QName {
    QName::sys("Error")
}

/// Name logged for an event whose payload could not be decoded.
pub fn corrupted_event_name() -> QName {
    QName::sys("Corrupted")
}

/// What a CUD row did to its record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CudKind {
    Insert,
    Update,
    Activate,
    Deactivate,
}

/// One record change carried by an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cud {
    record: QName,
    id: u64,
    kind: CudKind,
    fields: Map<String, Value>,
}

impl Cud {
    pub fn new(record: QName, id: u64, kind: CudKind) -> Self {
        Self {
            record,
            id,
            kind,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn record(&self) -> &QName {
        &self.record
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> CudKind {
        self.kind
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

/// The argument object a command was executed with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventArgs {
    name: QName,
    fields: Value,
}

impl EventArgs {
    pub fn new(name: QName, fields: Value) -> Self {
        Self { name, fields }
    }

    pub fn name(&self) -> &QName {
        &self.name
    }

    pub fn fields(&self) -> &Value {
        &self.fields
    }
}

/// An event read from the PLog.
///
/// Immutable once logged. Consumers receive it behind an `Arc` and release it
/// by dropping their handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    partition: PartitionId,
    offset: Offset,
    workspace: WorkspaceId,
    name: QName,
    args: Option<EventArgs>,
    cuds: Vec<Cud>,
    error: Option<String>,
    registered_at: DateTime<Utc>,
}

impl LogEvent {
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn offset(&self) -> Offset {
        self.offset
    }

    pub fn workspace(&self) -> WorkspaceId {
        self.workspace
    }

    /// Command name, or one of the `sys.Error` / `sys.Corrupted` markers.
    pub fn name(&self) -> &QName {
        &self.name
    }

    pub fn args(&self) -> Option<&EventArgs> {
        self.args.as_ref()
    }

    pub fn cuds(&self) -> &[Cud] {
        &self.cuds
    }

    /// Validation message of a rejected command.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    /// `false` for rejected or corrupted events.
    pub fn is_valid(&self) -> bool {
        self.name != error_event_name() && self.name != corrupted_event_name()
    }
}

/// An event that has not been assigned a log position yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    workspace: WorkspaceId,
    name: QName,
    args: Option<EventArgs>,
    cuds: Vec<Cud>,
    error: Option<String>,
}

impl NewEvent {
    pub fn new(workspace: WorkspaceId, name: QName) -> Self {
        Self {
            workspace,
            name,
            args: None,
            cuds: Vec::new(),
            error: None,
        }
    }

    /// A command rejected by validation; logged so error-aware projectors see it.
    pub fn rejected(workspace: WorkspaceId, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(workspace, error_event_name())
        }
    }

    pub fn with_args(mut self, args: EventArgs) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_cud(mut self, cud: Cud) -> Self {
        self.cuds.push(cud);
        self
    }

    pub fn workspace(&self) -> WorkspaceId {
        self.workspace
    }

    /// Assign the event its position in the log.
    pub fn into_log_event(self, partition: PartitionId, offset: Offset) -> LogEvent {
        LogEvent {
            partition,
            offset,
            workspace: self.workspace,
            name: self.name,
            args: self.args,
            cuds: self.cuds,
            error: self.error,
            registered_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qname(raw: &str) -> QName {
        raw.parse().unwrap()
    }

    #[test]
    fn new_event_takes_the_assigned_position() {
        let event = NewEvent::new(WorkspaceId::new(1001), qname("test.abc"))
            .with_cud(Cud::new(qname("test.doc"), 1, CudKind::Insert).with_field("x", 1))
            .into_log_event(PartitionId::new(1), Offset::new(7));

        assert_eq!(event.partition(), PartitionId::new(1));
        assert_eq!(event.offset(), Offset::new(7));
        assert_eq!(event.workspace(), WorkspaceId::new(1001));
        assert_eq!(event.cuds().len(), 1);
        assert_eq!(event.cuds()[0].fields()["x"], 1);
        assert!(event.is_valid());
    }

    #[test]
    fn rejected_events_are_not_valid() {
        let event = NewEvent::rejected(WorkspaceId::new(1), "bad input")
            .into_log_event(PartitionId::new(1), Offset::new(1));

        assert!(!event.is_valid());
        assert_eq!(event.error(), Some("bad input"));
        assert_eq!(event.name(), &error_event_name());
    }
}
