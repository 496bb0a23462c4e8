//! Workspace descriptors: which workspace kind a workspace was created as.

use serde_json::json;

use strata_core::{QName, WorkspaceId};
use strata_events::{ViewKey, ViewRecord};

use super::r#trait::{ViewStorage, ViewStorageError};

pub fn workspace_descriptor_view() -> QName {
    QName::sys("WorkspaceDescriptor")
}

fn descriptor_key() -> ViewKey {
    ViewKey::new().with("descriptor", true)
}

/// Register `workspace` as an instance of `kind`.
pub async fn create_workspace(
    views: &dyn ViewStorage,
    workspace: WorkspaceId,
    kind: &QName,
) -> Result<(), ViewStorageError> {
    views
        .put_batch(vec![ViewRecord::new(
            workspace_descriptor_view(),
            workspace,
            descriptor_key(),
            json!({ "kind": kind.as_str() }),
        )])
        .await
}

/// Kind of `workspace`, or `None` if it was never created.
pub async fn workspace_kind(
    views: &dyn ViewStorage,
    workspace: WorkspaceId,
) -> Result<Option<QName>, ViewStorageError> {
    let Some(value) = views
        .get(&workspace_descriptor_view(), workspace, &descriptor_key())
        .await?
    else {
        return Ok(None);
    };

    value
        .get("kind")
        .and_then(serde_json::Value::as_str)
        .and_then(|raw| raw.parse::<QName>().ok())
        .map(Some)
        .ok_or_else(|| {
            ViewStorageError::InvalidRecord(format!(
                "descriptor of workspace {workspace} is malformed: {value}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::views::InMemoryViewStorage;

    #[tokio::test]
    async fn created_workspace_reports_its_kind() {
        let views = InMemoryViewStorage::new();
        let kind: QName = "test.ws".parse().unwrap();

        create_workspace(&views, WorkspaceId::new(1001), &kind).await.unwrap();

        assert_eq!(workspace_kind(&views, WorkspaceId::new(1001)).await.unwrap(), Some(kind));
        assert_eq!(workspace_kind(&views, WorkspaceId::new(1002)).await.unwrap(), None);
    }
}
