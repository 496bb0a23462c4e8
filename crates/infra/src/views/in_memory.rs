use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use strata_core::{QName, WorkspaceId};
use strata_events::{ViewKey, ViewRecord, ViewValue};

use super::r#trait::{ViewStorage, ViewStorageError};

type RecordKey = (QName, WorkspaceId, ViewKey);

/// In-memory view storage for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryViewStorage {
    records: RwLock<HashMap<RecordKey, ViewValue>>,
}

impl InMemoryViewStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records (all views).
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ViewStorage for InMemoryViewStorage {
    async fn get(
        &self,
        view: &QName,
        workspace: WorkspaceId,
        key: &ViewKey,
    ) -> Result<Option<ViewValue>, ViewStorageError> {
        let records = self
            .records
            .read()
            .map_err(|_| ViewStorageError::Storage("lock poisoned".to_string()))?;
        Ok(records
            .get(&(view.clone(), workspace, key.clone()))
            .cloned())
    }

    async fn put_batch(&self, batch: Vec<ViewRecord>) -> Result<(), ViewStorageError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| ViewStorageError::Storage("lock poisoned".to_string()))?;
        for record in batch {
            records.insert((record.view, record.workspace, record.key), record.value);
        }
        Ok(())
    }
}
