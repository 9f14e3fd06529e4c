//! Simulation events and their wire form.
//!
//! Internally an event is an [`Event`] carrying a typed [`EventKind`]
//! payload. On the wire every event becomes a single flat [`WireEvent`]
//! record; the conversions in both directions live here so that the trace a
//! client reads parses back into structurally equal events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::{SimError, SimResult};

use super::entity::{EntityId, EntitySnapshot};

/// Virtual simulation time. Monotonic, starts at 0, advances by one per step.
pub type SimTime = u64;

/// Reserved wire names for the standard event kinds. Named events travel
/// under their own user-chosen name.
pub mod event_names {
    pub const ENTITY_CREATED: &str = "scarab.entity.created";
    pub const ENTITY_CHANGED: &str = "scarab.entity.changed";
    pub const ENTITY_DESTROYED: &str = "scarab.entity.destroyed";
    pub const TIME_UPDATED: &str = "scarab.time.updated";
    pub const SIMULATION_START: &str = "scarab.simulation.start";
    pub const SIMULATION_PAUSE: &str = "scarab.simulation.pause";
    pub const SIMULATION_RESUME: &str = "scarab.simulation.resume";
    pub const SIMULATION_SHUTDOWN: &str = "scarab.simulation.shutdown";
    pub const NAMED_EVENT: &str = "scarab.named-event";
}

/// Number of priority bands the queue orders events into within one time.
pub(crate) const PRIORITY_BANDS: usize = 4;

/// Typed event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    EntityCreated {
        entity: EntitySnapshot,
    },
    EntityChanged {
        entity: EntitySnapshot,
        changed_properties: Vec<String>,
    },
    EntityDestroyed {
        entity: EntitySnapshot,
    },
    TimeUpdated {
        previous_time: SimTime,
    },
    SimulationStart,
    SimulationPause,
    SimulationResume,
    SimulationShutdown,
    /// A user-defined event with an opaque body.
    Named {
        name: String,
        body: Value,
    },
}

impl EventKind {
    /// The `event_name` this kind travels under on the wire.
    pub fn wire_name(&self) -> &str {
        match self {
            Self::EntityCreated { .. } => event_names::ENTITY_CREATED,
            Self::EntityChanged { .. } => event_names::ENTITY_CHANGED,
            Self::EntityDestroyed { .. } => event_names::ENTITY_DESTROYED,
            Self::TimeUpdated { .. } => event_names::TIME_UPDATED,
            Self::SimulationStart => event_names::SIMULATION_START,
            Self::SimulationPause => event_names::SIMULATION_PAUSE,
            Self::SimulationResume => event_names::SIMULATION_RESUME,
            Self::SimulationShutdown => event_names::SIMULATION_SHUTDOWN,
            Self::Named { name, .. } => name,
        }
    }

    /// Immediate events bypass the queue and are routed with the current
    /// clock value: their purpose is to synchronize handlers with the
    /// driver's present state, not a future one.
    pub fn is_immediate(&self) -> bool {
        matches!(
            self,
            Self::TimeUpdated { .. }
                | Self::SimulationStart
                | Self::SimulationPause
                | Self::SimulationResume
                | Self::SimulationShutdown
        )
    }

    /// Whether this is one of the three entity-lifecycle kinds.
    pub fn is_entity_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::EntityCreated { .. } | Self::EntityChanged { .. } | Self::EntityDestroyed { .. }
        )
    }

    /// The subject entity of an entity-lifecycle event.
    pub fn subject(&self) -> Option<&EntitySnapshot> {
        match self {
            Self::EntityCreated { entity }
            | Self::EntityChanged { entity, .. }
            | Self::EntityDestroyed { entity } => Some(entity),
            _ => None,
        }
    }

    /// Queue band within one time: observers learn of existence before
    /// updates, and of updates before removal. Everything non-immediate and
    /// non-lifecycle shares the last band.
    pub(crate) fn priority_band(&self) -> usize {
        match self {
            Self::EntityCreated { .. } => 0,
            Self::EntityChanged { .. } => 1,
            Self::EntityDestroyed { .. } => 2,
            _ => 3,
        }
    }
}

/// A simulation event.
///
/// `time` is `None` until the driver stamps it: queued events default to the
/// next tick, immediate events to the current one.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub time: Option<SimTime>,
    /// The entity that sent the event, when one did. Metadata only.
    pub sender_id: Option<EntityId>,
    /// The entity the sender addressed, when it named one. Metadata only:
    /// delivery is always by kind and subject.
    pub target_id: Option<EntityId>,
}

impl Event {
    /// An event with no time assigned yet.
    pub fn new(kind: EventKind) -> Self {
        Self { kind, time: None, sender_id: None, target_id: None }
    }

    /// An event stamped with an explicit sim time.
    pub fn at(kind: EventKind, time: SimTime) -> Self {
        Self { kind, time: Some(time), sender_id: None, target_id: None }
    }

    /// A named event scheduled by the driver for the next tick.
    pub fn named(name: impl Into<String>, body: Value) -> Self {
        Self::new(EventKind::Named { name: name.into(), body })
    }

    /// An ENTITY_CREATED event for the given snapshot.
    pub fn entity_created(entity: EntitySnapshot) -> Self {
        Self::new(EventKind::EntityCreated { entity })
    }

    /// An ENTITY_CHANGED event for the given snapshot and changed fields.
    pub fn entity_changed(entity: EntitySnapshot, changed_properties: Vec<String>) -> Self {
        Self::new(EventKind::EntityChanged { entity, changed_properties })
    }

    /// An ENTITY_DESTROYED event for the given snapshot.
    pub fn entity_destroyed(entity: EntitySnapshot) -> Self {
        Self::new(EventKind::EntityDestroyed { entity })
    }

    /// A TIME_UPDATED event moving from `previous_time` to `time`.
    ///
    /// # Panics
    ///
    /// Panics if `previous_time` is not strictly less than `time`: a clock
    /// moving backwards is a broken engine invariant, not a recoverable
    /// condition.
    pub fn time_updated(time: SimTime, previous_time: SimTime) -> Self {
        assert!(
            previous_time < time,
            "time update from {previous_time} to {time} does not advance the clock"
        );
        Self::at(EventKind::TimeUpdated { previous_time }, time)
    }

    pub fn with_time(mut self, time: SimTime) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_sender(mut self, sender_id: EntityId) -> Self {
        self.sender_id = Some(sender_id);
        self
    }

    /// Stamp the id of the entity this event addresses. Carried on the wire
    /// for observers; routing ignores it.
    pub fn with_target(mut self, target_id: EntityId) -> Self {
        self.target_id = Some(target_id);
        self
    }

    /// The `event_name` this event travels under on the wire.
    pub fn wire_name(&self) -> &str {
        self.kind.wire_name()
    }
}

/// The flat record exchanged with external observers: one JSON object per
/// event, `event_name` plus `sim_time` plus the kind-specific members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    pub event_name: String,
    pub sim_time: SimTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_properties: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_time: Option<SimTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl TryFrom<&Event> for WireEvent {
    type Error = SimError;

    fn try_from(event: &Event) -> SimResult<Self> {
        let sim_time = event.time.ok_or_else(|| SimError::MissingEventTime {
            name: event.wire_name().to_string(),
        })?;
        let mut wire = Self {
            event_name: event.wire_name().to_string(),
            sim_time,
            sender_id: event.sender_id,
            target_id: event.target_id,
            entity: None,
            changed_properties: None,
            previous_time: None,
            body: None,
        };
        match &event.kind {
            EventKind::EntityCreated { entity } | EventKind::EntityDestroyed { entity } => {
                wire.entity = Some(entity.to_wire_value());
            }
            EventKind::EntityChanged { entity, changed_properties } => {
                wire.entity = Some(entity.to_wire_value());
                wire.changed_properties = Some(changed_properties.clone());
            }
            EventKind::TimeUpdated { previous_time } => {
                wire.previous_time = Some(*previous_time);
            }
            EventKind::Named { body, .. } => {
                if !body.is_null() {
                    wire.body = Some(body.clone());
                }
            }
            _ => {}
        }
        Ok(wire)
    }
}

/// Parse a wire record back into an event.
///
/// Reserved names map to their typed kinds; anything else, and any reserved
/// record missing its kind-specific members, falls back to a named event.
impl From<WireEvent> for Event {
    fn from(wire: WireEvent) -> Self {
        let entity = wire.entity.as_ref().and_then(EntitySnapshot::from_wire_value);
        let kind = match (wire.event_name.as_str(), entity) {
            (event_names::ENTITY_CREATED, Some(entity)) => EventKind::EntityCreated { entity },
            (event_names::ENTITY_CHANGED, Some(entity)) => EventKind::EntityChanged {
                entity,
                changed_properties: wire.changed_properties.clone().unwrap_or_default(),
            },
            (event_names::ENTITY_DESTROYED, Some(entity)) => {
                EventKind::EntityDestroyed { entity }
            }
            (event_names::TIME_UPDATED, _) => EventKind::TimeUpdated {
                previous_time: wire.previous_time.unwrap_or(wire.sim_time.saturating_sub(1)),
            },
            (event_names::SIMULATION_START, _) => EventKind::SimulationStart,
            (event_names::SIMULATION_PAUSE, _) => EventKind::SimulationPause,
            (event_names::SIMULATION_RESUME, _) => EventKind::SimulationResume,
            (event_names::SIMULATION_SHUTDOWN, _) => EventKind::SimulationShutdown,
            (name, _) => EventKind::Named {
                name: name.to_string(),
                body: wire.body.clone().unwrap_or(Value::Null),
            },
        };
        Self {
            kind,
            time: Some(wire.sim_time),
            sender_id: wire.sender_id,
            target_id: wire.target_id,
        }
    }
}
