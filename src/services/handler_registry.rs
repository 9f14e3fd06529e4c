//! Entity registration and handler dispatch tables.
//!
//! Registration reads the handler bindings an entity declares and installs
//! them into per-kind tables keyed by subject. Lookup is a straight map
//! probe; insertion order within a table determines execution order when
//! several handlers match the same event.

use std::collections::HashMap;

use tracing::debug;

use crate::domain::errors::{SimError, SimResult};
use crate::domain::models::entity::{EntityId, HandlerBinding, HandlerKind, SimEntity};
use crate::domain::models::event::{Event, EventKind};

/// One installed handler: the owning entity plus the erased callback.
#[derive(Clone)]
pub(crate) struct RegisteredHandler {
    pub owner: EntityId,
    pub binding: HandlerBinding,
}

/// Dispatch tables for every event kind.
///
/// Unregistration sweeps every table for the owner id; that is linear in the
/// total number of bindings, which is fine because entity churn is rare
/// compared to event routing.
#[derive(Default)]
pub struct HandlerRegistry {
    entity_created: HashMap<String, Vec<RegisteredHandler>>,
    entity_changed: HashMap<String, Vec<RegisteredHandler>>,
    entity_destroyed: HashMap<String, Vec<RegisteredHandler>>,
    named: HashMap<String, Vec<RegisteredHandler>>,
    time_updated: Vec<RegisteredHandler>,
    sim_start: Vec<RegisteredHandler>,
    sim_pause: Vec<RegisteredHandler>,
    sim_resume: Vec<RegisteredHandler>,
    sim_shutdown: Vec<RegisteredHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install every handler binding the entity declares.
    ///
    /// Fails with [`SimError::EmptyKindName`] or
    /// [`SimError::SchemaViolation`] without installing anything; admission
    /// is all-or-nothing.
    pub fn register(&mut self, id: EntityId, entity: &dyn SimEntity) -> SimResult<()> {
        if entity.kind_name().is_empty() {
            return Err(SimError::EmptyKindName);
        }
        check_conformance(entity)?;

        for binding in entity.handlers() {
            debug!(entity_kind = entity.kind_name(), entity_id = %id, kind = ?binding.kind, "installing handler");
            let handler = RegisteredHandler { owner: id, binding: binding.clone() };
            match binding.kind {
                HandlerKind::EntityCreated { kind_name } => {
                    self.entity_created.entry(kind_name).or_default().push(handler);
                }
                HandlerKind::EntityChanged { kind_name } => {
                    self.entity_changed.entry(kind_name).or_default().push(handler);
                }
                HandlerKind::EntityDestroyed { kind_name } => {
                    self.entity_destroyed.entry(kind_name).or_default().push(handler);
                }
                HandlerKind::Named { event_name } => {
                    self.named.entry(event_name).or_default().push(handler);
                }
                HandlerKind::TimeUpdated => self.time_updated.push(handler),
                HandlerKind::SimulationStart => self.sim_start.push(handler),
                HandlerKind::SimulationPause => self.sim_pause.push(handler),
                HandlerKind::SimulationResume => self.sim_resume.push(handler),
                HandlerKind::SimulationShutdown => self.sim_shutdown.push(handler),
            }
        }
        Ok(())
    }

    /// Remove every binding owned by the given entity id.
    pub fn unregister(&mut self, id: EntityId) {
        for table in [
            &mut self.entity_created,
            &mut self.entity_changed,
            &mut self.entity_destroyed,
            &mut self.named,
        ] {
            for handlers in table.values_mut() {
                handlers.retain(|h| h.owner != id);
            }
            table.retain(|_, handlers| !handlers.is_empty());
        }
        for list in [
            &mut self.time_updated,
            &mut self.sim_start,
            &mut self.sim_pause,
            &mut self.sim_resume,
            &mut self.sim_shutdown,
        ] {
            list.retain(|h| h.owner != id);
        }
    }

    /// The handlers subscribed to the given event, in execution order.
    pub(crate) fn handlers_for(&self, event: &Event) -> &[RegisteredHandler] {
        fn by_subject<'a>(
            table: &'a HashMap<String, Vec<RegisteredHandler>>,
            subject: &str,
        ) -> &'a [RegisteredHandler] {
            table.get(subject).map_or(&[], Vec::as_slice)
        }

        match &event.kind {
            EventKind::EntityCreated { entity } => {
                by_subject(&self.entity_created, &entity.kind_name)
            }
            EventKind::EntityChanged { entity, .. } => {
                by_subject(&self.entity_changed, &entity.kind_name)
            }
            EventKind::EntityDestroyed { entity } => {
                by_subject(&self.entity_destroyed, &entity.kind_name)
            }
            EventKind::Named { name, .. } => by_subject(&self.named, name),
            EventKind::TimeUpdated { .. } => &self.time_updated,
            EventKind::SimulationStart => &self.sim_start,
            EventKind::SimulationPause => &self.sim_pause,
            EventKind::SimulationResume => &self.sim_resume,
            EventKind::SimulationShutdown => &self.sim_shutdown,
        }
    }

    /// Total number of installed bindings.
    pub fn len(&self) -> usize {
        let keyed: usize = [
            &self.entity_created,
            &self.entity_changed,
            &self.entity_destroyed,
            &self.named,
        ]
        .iter()
        .map(|t| t.values().map(Vec::len).sum::<usize>())
        .sum();
        let flat: usize = [
            &self.time_updated,
            &self.sim_start,
            &self.sim_pause,
            &self.sim_resume,
            &self.sim_shutdown,
        ]
        .iter()
        .map(|l| l.len())
        .sum();
        keyed + flat
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Verify the entity exposes every field its schema declares.
fn check_conformance(entity: &dyn SimEntity) -> SimResult<()> {
    let Some(schema) = entity.conforms_to() else {
        return Ok(());
    };
    let fields = entity.observable_fields();
    let missing: Vec<String> = schema
        .iter()
        .filter(|name| !fields.contains_key(**name))
        .map(|name| (*name).to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(SimError::SchemaViolation { kind_name: entity.kind_name().to_string(), missing })
    }
}
