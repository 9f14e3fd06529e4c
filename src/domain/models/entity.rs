//! Entities and their handler bindings.
//!
//! An entity is a plain user type admitted to the simulation. At admission
//! the engine assigns it an [`EntityId`], checks its conformance schema, and
//! installs the handler bindings the type declares. Bindings are plain data
//! resolved once at registration; no field-name lookup happens in the hot
//! loop.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::event::Event;

/// Unique identifier for an admitted entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observable fields of an entity, keyed by field name.
pub type FieldMap = BTreeMap<String, Value>;

/// The live-entity set, in admission order. Mutated only by the driver.
pub type LiveEntities = IndexMap<EntityId, Box<dyn SimEntity>>;

/// Outcome of a single handler invocation. An `Err` is a handler fault: the
/// router logs it and moves on to the next handler.
pub type HandlerResult = Result<(), String>;

type HandlerFn = Arc<dyn Fn(&mut dyn SimEntity, &Event) -> HandlerResult + Send + Sync>;

/// A user type that can be admitted to a simulation.
///
/// Implementations supply a kind name, their observable state, and the list
/// of handler bindings. [`observable_fields_of`] turns any `Serialize` type
/// into a [`FieldMap`], so most implementations are a handful of lines:
///
/// ```
/// use scarab::domain::models::entity::{
///     observable_fields_of, FieldMap, HandlerBinding, SimEntity,
/// };
/// use scarab::domain::models::event::Event;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct Thermometer {
///     temp: i64,
/// }
///
/// impl Thermometer {
///     fn on_tick(&mut self, _event: &Event) -> Result<(), String> {
///         self.temp += 1;
///         Ok(())
///     }
/// }
///
/// impl SimEntity for Thermometer {
///     fn kind_name(&self) -> &str {
///         "thermometer"
///     }
///
///     fn observable_fields(&self) -> FieldMap {
///         observable_fields_of(self)
///     }
///
///     fn handlers(&self) -> Vec<HandlerBinding> {
///         vec![HandlerBinding::time_updated(Thermometer::on_tick)]
///     }
///
///     fn as_any(&self) -> &dyn std::any::Any {
///         self
///     }
///
///     fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
///         self
///     }
/// }
/// ```
pub trait SimEntity: Any + Send + Sync {
    /// Stable symbolic kind name, e.g. `"bee"`. Must be non-empty.
    fn kind_name(&self) -> &str;

    /// The entity's observable state. Keys starting with `_` are stripped
    /// again downstream, so implementations may simply serialize themselves.
    fn observable_fields(&self) -> FieldMap;

    /// Optional conformance schema: field names this entity guarantees to
    /// expose. Admission fails if any is missing from the observable state.
    fn conforms_to(&self) -> Option<&[&str]> {
        None
    }

    /// Handler bindings installed at registration.
    fn handlers(&self) -> Vec<HandlerBinding> {
        Vec::new()
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Serialize an entity into its observable [`FieldMap`].
///
/// Fields whose names begin with an underscore are considered private and
/// are excluded. Non-struct serializations yield an empty map.
pub fn observable_fields_of<T: Serialize>(entity: &T) -> FieldMap {
    match serde_json::to_value(entity) {
        Ok(Value::Object(map)) => map
            .into_iter()
            .filter(|(name, _)| !name.starts_with('_'))
            .collect(),
        _ => FieldMap::new(),
    }
}

/// What a handler subscribes to: the event kind plus its subject, where the
/// kind has one (the target entity's kind name, or the event name for named
/// events).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    EntityCreated { kind_name: String },
    EntityChanged { kind_name: String },
    EntityDestroyed { kind_name: String },
    Named { event_name: String },
    TimeUpdated,
    SimulationStart,
    SimulationPause,
    SimulationResume,
    SimulationShutdown,
}

/// A handler binding: the subscription key plus a type-erased callback.
///
/// Constructors take a typed method on the declaring entity and erase it
/// through a downcast; a binding invoked against the wrong receiver type
/// reports a handler fault instead of being called.
#[derive(Clone)]
pub struct HandlerBinding {
    pub(crate) kind: HandlerKind,
    pub(crate) invoke: HandlerFn,
}

impl HandlerBinding {
    fn erase<E: SimEntity>(f: fn(&mut E, &Event) -> HandlerResult) -> HandlerFn {
        Arc::new(move |entity, event| match entity.as_any_mut().downcast_mut::<E>() {
            Some(receiver) => f(receiver, event),
            None => Err(format!(
                "handler receiver type {} does not match the registered entity",
                std::any::type_name::<E>()
            )),
        })
    }

    /// Handle ENTITY_CREATED events for entities of the given kind.
    pub fn entity_created<E: SimEntity>(
        kind_name: impl Into<String>,
        f: fn(&mut E, &Event) -> HandlerResult,
    ) -> Self {
        Self {
            kind: HandlerKind::EntityCreated { kind_name: kind_name.into() },
            invoke: Self::erase(f),
        }
    }

    /// Handle ENTITY_CHANGED events for entities of the given kind.
    pub fn entity_changed<E: SimEntity>(
        kind_name: impl Into<String>,
        f: fn(&mut E, &Event) -> HandlerResult,
    ) -> Self {
        Self {
            kind: HandlerKind::EntityChanged { kind_name: kind_name.into() },
            invoke: Self::erase(f),
        }
    }

    /// Handle ENTITY_DESTROYED events for entities of the given kind.
    pub fn entity_destroyed<E: SimEntity>(
        kind_name: impl Into<String>,
        f: fn(&mut E, &Event) -> HandlerResult,
    ) -> Self {
        Self {
            kind: HandlerKind::EntityDestroyed { kind_name: kind_name.into() },
            invoke: Self::erase(f),
        }
    }

    /// Handle named events with the given event name.
    pub fn named<E: SimEntity>(
        event_name: impl Into<String>,
        f: fn(&mut E, &Event) -> HandlerResult,
    ) -> Self {
        Self {
            kind: HandlerKind::Named { event_name: event_name.into() },
            invoke: Self::erase(f),
        }
    }

    /// Handle TIME_UPDATED events.
    pub fn time_updated<E: SimEntity>(f: fn(&mut E, &Event) -> HandlerResult) -> Self {
        Self { kind: HandlerKind::TimeUpdated, invoke: Self::erase(f) }
    }

    /// Handle SIMULATION_START events.
    pub fn sim_start<E: SimEntity>(f: fn(&mut E, &Event) -> HandlerResult) -> Self {
        Self { kind: HandlerKind::SimulationStart, invoke: Self::erase(f) }
    }

    /// Handle SIMULATION_PAUSE events.
    pub fn sim_pause<E: SimEntity>(f: fn(&mut E, &Event) -> HandlerResult) -> Self {
        Self { kind: HandlerKind::SimulationPause, invoke: Self::erase(f) }
    }

    /// Handle SIMULATION_RESUME events.
    pub fn sim_resume<E: SimEntity>(f: fn(&mut E, &Event) -> HandlerResult) -> Self {
        Self { kind: HandlerKind::SimulationResume, invoke: Self::erase(f) }
    }

    /// Handle SIMULATION_SHUTDOWN events.
    pub fn sim_shutdown<E: SimEntity>(f: fn(&mut E, &Event) -> HandlerResult) -> Self {
        Self { kind: HandlerKind::SimulationShutdown, invoke: Self::erase(f) }
    }
}

impl fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerBinding").field("kind", &self.kind).finish_non_exhaustive()
    }
}

/// A deep copy of an entity's observable state at a single moment, plus its
/// identity. Snapshots are the payload of entity-lifecycle events and the
/// input to change detection.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub kind_name: String,
    pub fields: FieldMap,
}

impl EntitySnapshot {
    /// Capture the entity's observable state right now. When a schema is
    /// declared, the snapshot is restricted to the declared fields.
    pub fn capture(id: EntityId, entity: &dyn SimEntity) -> Self {
        let mut fields = entity.observable_fields();
        fields.retain(|name, _| !name.starts_with('_'));
        if let Some(schema) = entity.conforms_to() {
            fields.retain(|name, _| schema.contains(&name.as_str()));
        }
        Self { id, kind_name: entity.kind_name().to_string(), fields }
    }

    /// Look up a single observable field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// The flat wire object: observable fields plus `kind_name` and `id`.
    pub fn to_wire_value(&self) -> Value {
        let mut object = serde_json::Map::new();
        for (name, value) in &self.fields {
            object.insert(name.clone(), value.clone());
        }
        object.insert("kind_name".to_string(), Value::String(self.kind_name.clone()));
        object.insert("id".to_string(), Value::String(self.id.to_string()));
        Value::Object(object)
    }

    /// Parse the wire object back into a snapshot. Returns `None` when the
    /// identity fields are missing or malformed.
    pub fn from_wire_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let kind_name = object.get("kind_name")?.as_str()?.to_string();
        let id = EntityId(Uuid::parse_str(object.get("id")?.as_str()?).ok()?);
        let fields = object
            .iter()
            .filter(|(name, _)| name.as_str() != "kind_name" && name.as_str() != "id")
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Some(Self { id, kind_name, fields })
    }
}
