//! Staging of projector writes between an invocation and a flush.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use strata_core::{QName, WorkspaceId};
use strata_events::{ProjectorState, StateError, ViewKey, ViewRecord, ViewValue};

use crate::views::{ViewStorage, ViewStorageError, projection_offsets_view};

type RecordId = (QName, WorkspaceId, ViewKey);

/// Intents of the current invocation plus the bundle of applied, unflushed
/// intents.
///
/// Reads go through the intents first, then the bundle, then storage, so a
/// projector always sees its own unflushed writes.
#[derive(Debug)]
pub struct BundledState {
    intents_limit: usize,
    bundles_limit: usize,
    intents: Vec<ViewRecord>,
    bundle: HashMap<RecordId, ViewValue>,
    offset: Option<ViewRecord>,
}

impl BundledState {
    pub fn new(intents_limit: usize, bundles_limit: usize) -> Self {
        Self {
            intents_limit,
            bundles_limit,
            intents: Vec::new(),
            bundle: HashMap::new(),
            offset: None,
        }
    }

    /// View of this state for one projector invocation.
    pub fn invocation<'a>(&'a mut self, storage: &'a dyn ViewStorage) -> InvocationState<'a> {
        InvocationState {
            storage,
            state: self,
        }
    }

    pub fn intents(&self) -> &[ViewRecord] {
        &self.intents
    }

    fn stage(&mut self, record: ViewRecord) -> Result<(), StateError> {
        if self.intents.len() >= self.intents_limit {
            return Err(StateError::IntentsLimitExceeded {
                limit: self.intents_limit,
            });
        }
        self.intents.push(record);
        Ok(())
    }

    fn lookup(&self, view: &QName, workspace: WorkspaceId, key: &ViewKey) -> Option<&ViewValue> {
        self.intents
            .iter()
            .rev()
            .find(|r| r.view == *view && r.workspace == workspace && r.key == *key)
            .map(|r| &r.value)
            .or_else(|| self.bundle.get(&(view.clone(), workspace, key.clone())))
    }

    /// Move the intents into the bundle. Returns whether the bundle is full.
    pub fn apply_intents(&mut self) -> bool {
        for record in self.intents.drain(..) {
            self.bundle
                .insert((record.view, record.workspace, record.key), record.value);
        }
        self.bundle.len() >= self.bundles_limit
    }

    pub fn clear_intents(&mut self) {
        self.intents.clear();
    }

    /// Drop everything that was not flushed.
    pub fn discard(&mut self) {
        self.intents.clear();
        self.bundle.clear();
        self.offset = None;
    }

    /// Stage the offset record committed with the next flush.
    pub fn stage_offset(&mut self, record: ViewRecord) {
        self.offset = Some(record);
    }

    pub fn is_dirty(&self) -> bool {
        !self.bundle.is_empty() || self.offset.is_some()
    }

    /// Drain the bundle and the staged offset record into storage records.
    pub fn take_records(&mut self) -> Vec<ViewRecord> {
        let mut records: Vec<ViewRecord> = self
            .bundle
            .drain()
            .map(|((view, workspace, key), value)| ViewRecord::new(view, workspace, key, value))
            .collect();
        records.extend(self.offset.take());
        records
    }

    /// Commit the bundle and the staged offset record in one batch.
    ///
    /// Returns the `(view, workspace)` pairs that changed. The bundle is
    /// emptied whether or not the commit succeeds.
    pub async fn flush(
        &mut self,
        storage: &dyn ViewStorage,
    ) -> Result<Vec<(QName, WorkspaceId)>, ViewStorageError> {
        let records = self.take_records();
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let touched = touched_views(&records);
        storage.put_batch(records).await?;
        Ok(touched)
    }
}

/// Distinct `(view, workspace)` pairs of `records`, bookkeeping views excluded.
pub fn touched_views(records: &[ViewRecord]) -> Vec<(QName, WorkspaceId)> {
    let offsets_view = projection_offsets_view();
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| r.view != offsets_view)
        .filter(|r| seen.insert((r.view.clone(), r.workspace)))
        .map(|r| (r.view.clone(), r.workspace))
        .collect()
}

/// [`ProjectorState`] handed to one projector invocation.
pub struct InvocationState<'a> {
    storage: &'a dyn ViewStorage,
    state: &'a mut BundledState,
}

#[async_trait]
impl ProjectorState for InvocationState<'_> {
    async fn read_view(
        &self,
        view: &QName,
        workspace: WorkspaceId,
        key: &ViewKey,
    ) -> Result<Option<ViewValue>, StateError> {
        if let Some(value) = self.state.lookup(view, workspace, key) {
            return Ok(Some(value.clone()));
        }
        self.storage
            .get(view, workspace, key)
            .await
            .map_err(|err| StateError::Storage(err.to_string()))
    }

    fn put_view(
        &mut self,
        view: &QName,
        workspace: WorkspaceId,
        key: ViewKey,
        value: ViewValue,
    ) -> Result<(), StateError> {
        self.state
            .stage(ViewRecord::new(view.clone(), workspace, key, value))
    }
}
