//! View storage: materialized projector output and engine bookkeeping.
//!
//! Actualizer offsets and workspace descriptors are stored as ordinary view
//! records, so they commit in the same batch as the projection writes they
//! describe.

pub mod in_memory;
pub mod offsets;
pub mod postgres;
pub mod r#trait;
pub mod workspaces;

pub use in_memory::InMemoryViewStorage;
pub use offsets::{actualizer_offset, offset_record, projection_offsets_view, store_actualizer_offset};
pub use postgres::PostgresViewStorage;
pub use r#trait::{ViewStorage, ViewStorageError};
pub use workspaces::{create_workspace, workspace_descriptor_view, workspace_kind};
