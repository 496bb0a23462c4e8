//! Partition borrowing.
//!
//! Processors never hold an application partition permanently. They borrow
//! it for one unit of work (a command, a batch read, one projector
//! invocation), use the [`AppState`] it exposes, and release it. Each
//! partition has a fixed number of engines per [`ProcessorKind`]; borrowing
//! waits while all engines of that kind are busy.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::{InMemoryAppPartitions, PartitionEngines};
pub use r#trait::{AppState, BorrowError, BorrowedPartition, PartitionBorrower, ProcessorKind};
