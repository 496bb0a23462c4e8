use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use strata_core::{QName, WorkspaceId};
use strata_events::{ViewKey, ViewRecord, ViewValue};

/// View storage operation error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ViewStorageError {
    #[error("view storage unavailable: {0}")]
    Unavailable(String),

    #[error("invalid view record: {0}")]
    InvalidRecord(String),

    #[error("view storage failure: {0}")]
    Storage(String),
}

/// Key/value storage for view records, scoped by view and workspace.
///
/// ## Batch Semantics
///
/// `put_batch()` is all-or-nothing: either every record of the batch is
/// visible afterwards or none is. Actualizers rely on this to commit a
/// bundle of projection writes together with their offset record.
///
/// Later records in a batch win over earlier records with the same key.
#[async_trait]
pub trait ViewStorage: Send + Sync {
    async fn get(
        &self,
        view: &QName,
        workspace: WorkspaceId,
        key: &ViewKey,
    ) -> Result<Option<ViewValue>, ViewStorageError>;

    async fn put_batch(&self, records: Vec<ViewRecord>) -> Result<(), ViewStorageError>;
}

#[async_trait]
impl<S> ViewStorage for Arc<S>
where
    S: ViewStorage + ?Sized,
{
    async fn get(
        &self,
        view: &QName,
        workspace: WorkspaceId,
        key: &ViewKey,
    ) -> Result<Option<ViewValue>, ViewStorageError> {
        (**self).get(view, workspace, key).await
    }

    async fn put_batch(&self, records: Vec<ViewRecord>) -> Result<(), ViewStorageError> {
        (**self).put_batch(records).await
    }
}
