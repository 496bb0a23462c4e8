//! Partitioned log (PLog) boundary.
//!
//! The PLog is the source of truth: every command appends exactly one event to
//! the log of its partition, and everything else (views, actualizer offsets)
//! is derived from it.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryPLog;
pub use r#trait::{EventCallback, LogReader, LogWriter, PLogError, ReadLimit};
