//! Log events, projector contracts and offset notifications.
//!
//! Everything here is storage-agnostic; the actualizer engine and the
//! concrete log/view storages live in `strata-infra`.

pub mod definition;
pub mod event;
pub mod filter;
pub mod idempotency;
pub mod in_memory_broker;
pub mod notification;
pub mod projector;
pub mod view;

pub use definition::{AppDefinition, AppDefinitionBuilder, TypeKind};
pub use event::{Cud, CudKind, EventArgs, LogEvent, NewEvent};
pub use in_memory_broker::InMemoryBroker;
pub use notification::{
    BrokerError, ChannelInbox, NotificationBroker, NotificationChannel, ProjectionKey,
    plog_updates_name,
};
pub use projector::{
    Projector, ProjectorDescriptor, ProjectorRegistry, ProjectorState, StateError, StorageKind,
    Trigger, TriggerKind,
};
pub use view::{ViewKey, ViewRecord, ViewValue};
