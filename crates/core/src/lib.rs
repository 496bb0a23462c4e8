//! `strata-core`: identifiers and names shared by every strata crate.
//!
//! This crate has no runtime or storage concerns.

pub mod error;
pub mod id;
pub mod name;

pub use error::{CoreError, CoreResult};
pub use id::{ChannelId, Offset, PartitionId, WorkspaceId};
pub use name::{AppName, QName, SYS_PACKAGE};
