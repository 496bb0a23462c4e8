//! View records: the materialized state projectors read and write.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use strata_core::{QName, WorkspaceId};

/// Value stored under a view key. Always a JSON object in practice.
pub type ViewValue = Value;

/// Key of a view record: named key fields.
///
/// Fields are kept sorted, so two keys with the same fields compare, hash and
/// serialize identically regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewKey(Map<String, Value>);

impl ViewKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compact JSON form, used as the storage key.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl Hash for ViewKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (field, value) in &self.0 {
            field.hash(state);
            value.to_string().hash(state);
        }
    }
}

impl core::fmt::Display for ViewKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let raw = serde_json::to_string(&self.0).map_err(|_| core::fmt::Error)?;
        f.write_str(&raw)
    }
}

/// A single write addressed to a view in a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRecord {
    pub view: QName,
    pub workspace: WorkspaceId,
    pub key: ViewKey,
    pub value: ViewValue,
}

impl ViewRecord {
    pub fn new(view: QName, workspace: WorkspaceId, key: ViewKey, value: ViewValue) -> Self {
        Self {
            view,
            workspace,
            key,
            value,
        }
    }
}
