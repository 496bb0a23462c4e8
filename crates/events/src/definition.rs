//! Application definitions: types, workspaces and projectors of one app.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use strata_core::{AppName, QName};

use crate::event::LogEvent;
use crate::filter;
use crate::projector::ProjectorDescriptor;

/// Kind of a type declared by an application.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    CDoc,
    WDoc,
    ODoc,
    CRecord,
    WRecord,
    ORecord,
    Object,
    Command,
    View,
}

impl TypeKind {
    /// Kinds matched by a `sys.<Kind>` trigger name.
    ///
    /// A record trigger also matches the document of the same family.
    pub fn covered_by_global(name: &QName) -> &'static [TypeKind] {
        if !name.is_sys() {
            return &[];
        }
        match name.entity() {
            "CDoc" => &[TypeKind::CDoc],
            "WDoc" => &[TypeKind::WDoc],
            "ODoc" => &[TypeKind::ODoc],
            "CRecord" => &[TypeKind::CDoc, TypeKind::CRecord],
            "WRecord" => &[TypeKind::WDoc, TypeKind::WRecord],
            "ORecord" => &[TypeKind::ODoc, TypeKind::ORecord],
            _ => &[],
        }
    }
}

/// The deployed definition of an application.
#[derive(Debug, Clone)]
pub struct AppDefinition {
    app: AppName,
    types: HashMap<QName, TypeKind>,
    projectors: BTreeMap<QName, ProjectorDescriptor>,
    workspaces: HashMap<QName, BTreeSet<QName>>,
}

impl AppDefinition {
    pub fn builder(app: AppName) -> AppDefinitionBuilder {
        AppDefinitionBuilder {
            definition: AppDefinition {
                app,
                types: HashMap::new(),
                projectors: BTreeMap::new(),
                workspaces: HashMap::new(),
            },
        }
    }

    pub fn app(&self) -> &AppName {
        &self.app
    }

    pub fn projector(&self, name: &QName) -> Option<&ProjectorDescriptor> {
        self.projectors.get(name)
    }

    pub fn async_projectors(&self) -> impl Iterator<Item = &ProjectorDescriptor> {
        self.projectors.values().filter(|p| !p.is_sync())
    }

    pub fn sync_projectors(&self) -> impl Iterator<Item = &ProjectorDescriptor> {
        self.projectors.values().filter(|p| p.is_sync())
    }

    pub fn type_kind(&self, name: &QName) -> Option<TypeKind> {
        self.types.get(name).copied()
    }

    /// Whether `name` (a type or projector) is part of the given workspace kind.
    pub fn workspace_defines(&self, workspace_kind: &QName, name: &QName) -> bool {
        self.workspaces
            .get(workspace_kind)
            .is_some_and(|members| members.contains(name))
    }

    /// Trigger filter: whether `projector` should see `event`.
    pub fn accepts(&self, projector: &ProjectorDescriptor, event: &LogEvent) -> bool {
        filter::is_acceptable(self, projector, event)
    }
}

pub struct AppDefinitionBuilder {
    definition: AppDefinition,
}

impl AppDefinitionBuilder {
    pub fn add_type(mut self, name: QName, kind: TypeKind) -> Self {
        self.definition.types.insert(name, kind);
        self
    }

    pub fn add_projector(mut self, projector: ProjectorDescriptor) -> Self {
        self.definition
            .projectors
            .insert(projector.name().clone(), projector);
        self
    }

    /// Declare a workspace kind and the types and projectors it contains.
    pub fn add_workspace(mut self, kind: QName, members: impl IntoIterator<Item = QName>) -> Self {
        self.definition
            .workspaces
            .entry(kind)
            .or_default()
            .extend(members);
        self
    }

    pub fn build(self) -> AppDefinition {
        self.definition
    }
}
