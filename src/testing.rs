//! Synchronous testing harness for entities.
//!
//! [`TestSimulation`] is a simplified, sink-less simulation for unit-testing
//! entity behavior: everything is synchronous, events route the moment they
//! are sent, and every delivered event is recorded for assertions.
//!
//! What it does:
//! - admit entities (their ENTITY_CREATED routes immediately, not queued);
//! - send any event kind directly, with helpers per standard kind;
//! - step the clock one tick at a time.
//!
//! What it does not do: WebSocket streaming, pacing, multi-step runs, or
//! change detection — drive those through [`Simulation`](crate::Simulation).

use crate::domain::errors::SimResult;
use crate::domain::models::entity::{
    EntityId, EntitySnapshot, LiveEntities, SimEntity,
};
use crate::domain::models::event::{Event, EventKind, SimTime};
use crate::services::event_router::EventRouter;

/// A minimal synchronous simulation for entity tests.
#[derive(Default)]
pub struct TestSimulation {
    entities: LiveEntities,
    router: EventRouter,
    clock: SimTime,
    delivered: Vec<Event>,
}

impl TestSimulation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time(&self) -> SimTime {
        self.clock
    }

    /// Every event routed so far, in delivery order.
    pub fn delivered(&self) -> &[Event] {
        &self.delivered
    }

    /// Admit an entity and immediately route its ENTITY_CREATED event.
    pub fn add_entity(&mut self, entity: Box<dyn SimEntity>) -> SimResult<EntityId> {
        let id = EntityId::new();
        self.router.register_entity(id, entity.as_ref())?;
        let snapshot = EntitySnapshot::capture(id, entity.as_ref());
        self.entities.insert(id, entity);
        self.route(Event::entity_created(snapshot));
        Ok(id)
    }

    /// Borrow an admitted entity downcast to its concrete type.
    pub fn entity_ref<E: SimEntity>(&self, id: EntityId) -> Option<&E> {
        self.entities.get(&id)?.as_any().downcast_ref::<E>()
    }

    /// Snapshot an admitted entity's observable state.
    pub fn snapshot(&self, id: EntityId) -> Option<EntitySnapshot> {
        self.entities.get(&id).map(|entity| EntitySnapshot::capture(id, entity.as_ref()))
    }

    /// Route an event synchronously. Unstamped events get the current time.
    pub fn route(&mut self, mut event: Event) {
        if event.time.is_none() {
            event.time = Some(self.clock);
        }
        self.router.dispatch(&mut self.entities, &event);
        self.delivered.push(event);
    }

    /// Advance the clock one tick and route the TIME_UPDATED event.
    pub fn step(&mut self) {
        self.clock += 1;
        self.route(Event::time_updated(self.clock, self.clock - 1));
    }

    // -- Direct send helpers for the standard event kinds. --

    /// Route an ENTITY_CHANGED for the entity, naming the changed fields.
    /// The caller is responsible for the field list being right.
    pub fn send_entity_changed(&mut self, id: EntityId, changed: &[&str]) {
        if let Some(snapshot) = self.snapshot(id) {
            let changed = changed.iter().map(|s| (*s).to_string()).collect();
            self.route(Event::entity_changed(snapshot, changed));
        }
    }

    /// Route an ENTITY_DESTROYED for the entity and drop it from the live
    /// set.
    pub fn send_entity_destroyed(&mut self, id: EntityId) {
        if let Some(entity) = self.entities.shift_remove(&id) {
            self.router.unregister_entity(id);
            let snapshot = EntitySnapshot::capture(id, entity.as_ref());
            self.route(Event::entity_destroyed(snapshot));
        }
    }

    pub fn send_simulation_start(&mut self) {
        self.route(Event::at(EventKind::SimulationStart, self.clock));
    }

    pub fn send_simulation_pause(&mut self) {
        self.route(Event::at(EventKind::SimulationPause, self.clock));
    }

    pub fn send_simulation_resume(&mut self) {
        self.route(Event::at(EventKind::SimulationResume, self.clock));
    }

    pub fn send_simulation_shutdown(&mut self) {
        self.route(Event::at(EventKind::SimulationShutdown, self.clock));
    }
}
