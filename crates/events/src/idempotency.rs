//! Apply-time idempotency for derived records.
//!
//! Actualizers deliver at least once: after a restart, events after the last
//! persisted offset are projected again. Projectors that maintain derived
//! records stamp each record with the log offset of the event that produced
//! it, and skip writes from events that are not newer than the stamp.

use serde_json::Value;

use strata_core::Offset;

use crate::view::ViewValue;

/// Field holding the producing event's offset on a derived record.
pub const OFFSET_FIELD: &str = "sys_offset";

/// Offset stamped on a derived record, if any.
pub fn stamped_offset(value: &ViewValue) -> Option<Offset> {
    value.get(OFFSET_FIELD).and_then(Value::as_u64).map(Offset::new)
}

/// Whether an event at `offset` may overwrite `existing`.
///
/// Records without a stamp are always overwritten.
pub fn should_apply(existing: Option<&ViewValue>, offset: Offset) -> bool {
    match existing.and_then(stamped_offset) {
        Some(stamped) => stamped < offset,
        None => true,
    }
}

/// Stamp `value` with `offset`. Non-object values are wrapped as `{"value": ...}`.
pub fn stamp(value: ViewValue, offset: Offset) -> ViewValue {
    let mut object = match value {
        Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };
    object.insert(OFFSET_FIELD.to_string(), Value::from(offset.get()));
    Value::Object(object)
}
