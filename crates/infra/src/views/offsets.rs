//! Actualizer offsets, stored as records of the `sys.projection_offsets` view.
//!
//! Key: `(partition: i32, projector: qualified name)`, value: `offset: i64`, in
//! the application-wide workspace. The record is written by every flush in the
//! same batch as the projection writes, so it never runs ahead of them.

use serde_json::json;

use strata_core::{Offset, PartitionId, QName, WorkspaceId};
use strata_events::{ViewKey, ViewRecord};

use super::r#trait::{ViewStorage, ViewStorageError};

const OFFSET_FIELD: &str = "offset";

pub fn projection_offsets_view() -> QName {
    QName::sys("projection_offsets")
}

pub fn offset_key(partition: PartitionId, projector: &QName) -> ViewKey {
    ViewKey::new()
        .with("partition", i32::from(partition.get()))
        .with("projector", projector.as_str())
}

/// The record persisting `offset` for `(partition, projector)`.
pub fn offset_record(partition: PartitionId, projector: &QName, offset: Offset) -> ViewRecord {
    ViewRecord::new(
        projection_offsets_view(),
        WorkspaceId::NULL,
        offset_key(partition, projector),
        json!({ "offset": offset.get() }),
    )
}

/// Last flushed offset of `projector` in `partition`; [`Offset::NULL`] if it never flushed.
pub async fn actualizer_offset(
    views: &dyn ViewStorage,
    partition: PartitionId,
    projector: &QName,
) -> Result<Offset, ViewStorageError> {
    let value = views
        .get(
            &projection_offsets_view(),
            WorkspaceId::NULL,
            &offset_key(partition, projector),
        )
        .await?;

    let Some(value) = value else {
        return Ok(Offset::NULL);
    };
    value
        .get(OFFSET_FIELD)
        .and_then(serde_json::Value::as_i64)
        .and_then(|raw| u64::try_from(raw).ok())
        .map(Offset::new)
        .ok_or_else(|| {
            ViewStorageError::InvalidRecord(format!(
                "offset record of {projector} [{partition}] is malformed: {value}"
            ))
        })
}

/// Overwrite the stored offset, e.g. to seed or rewind an actualizer.
pub async fn store_actualizer_offset(
    views: &dyn ViewStorage,
    partition: PartitionId,
    projector: &QName,
    offset: Offset,
) -> Result<(), ViewStorageError> {
    views
        .put_batch(vec![offset_record(partition, projector, offset)])
        .await
}
