//! Trigger filter: which events a projector reacts to.

use strata_core::QName;

use crate::definition::{AppDefinition, TypeKind};
use crate::event::{CudKind, LogEvent, error_event_name};
use crate::projector::{ProjectorDescriptor, TriggerKind};

/// Whether `projector` should be invoked for `event`.
///
/// Rejected events reach only projectors that want errors; corrupted events
/// reach nobody. A projector without triggers sees every valid event.
pub fn is_acceptable(
    definition: &AppDefinition,
    projector: &ProjectorDescriptor,
    event: &LogEvent,
) -> bool {
    if !event.is_valid() {
        return projector.wants_errors() && *event.name() == error_event_name();
    }
    if projector.triggers().is_empty() {
        return true;
    }

    projector.triggers().iter().any(|trigger| {
        trigger.kinds.iter().any(|kind| match kind {
            TriggerKind::Execute => *event.name() == trigger.name,
            TriggerKind::ExecuteWithParam => event
                .args()
                .is_some_and(|args| matches_type(definition, &trigger.name, args.name())),
            TriggerKind::Insert => has_cud(definition, event, &trigger.name, CudKind::Insert),
            TriggerKind::Update => has_cud(definition, event, &trigger.name, CudKind::Update),
            TriggerKind::Activate => has_cud(definition, event, &trigger.name, CudKind::Activate),
            TriggerKind::Deactivate => {
                has_cud(definition, event, &trigger.name, CudKind::Deactivate)
            }
        })
    })
}

fn has_cud(definition: &AppDefinition, event: &LogEvent, trigger: &QName, kind: CudKind) -> bool {
    event
        .cuds()
        .iter()
        .any(|cud| cud.kind() == kind && matches_type(definition, trigger, cud.record()))
}

fn matches_type(definition: &AppDefinition, trigger: &QName, type_name: &QName) -> bool {
    if trigger == type_name {
        return true;
    }
    let covered = TypeKind::covered_by_global(trigger);
    !covered.is_empty()
        && definition
            .type_kind(type_name)
            .is_some_and(|kind| covered.contains(&kind))
}
