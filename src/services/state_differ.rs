//! Per-step change detection.
//!
//! The driver snapshots every live entity before draining a tick and again
//! after; entities whose observable state differs get a synthesized
//! ENTITY_CHANGED event for the next tick. Comparison is structural equality
//! on the serialized field values.

use std::collections::HashMap;

use crate::domain::models::entity::{EntityId, EntitySnapshot, LiveEntities};

/// Snapshot every live entity, keyed by id.
pub fn snapshot_all(entities: &LiveEntities) -> HashMap<EntityId, EntitySnapshot> {
    entities
        .iter()
        .map(|(id, entity)| (*id, EntitySnapshot::capture(*id, entity.as_ref())))
        .collect()
}

/// Field names that differ between two snapshots of the same entity.
///
/// Covers all three change shapes: values that changed, fields present only
/// in the new snapshot (added), and fields present only in the old one
/// (removed). Identity never changes after admission, so only the field maps
/// are compared.
pub fn diff(before: &EntitySnapshot, after: &EntitySnapshot) -> Vec<String> {
    let mut changed = Vec::new();
    for (name, value) in &after.fields {
        match before.fields.get(name) {
            Some(old) if old == value => {}
            _ => changed.push(name.clone()),
        }
    }
    for name in before.fields.keys() {
        if !after.fields.contains_key(name) {
            changed.push(name.clone());
        }
    }
    changed
}
