//! Domain models
//!
//! Pure domain types: entities, events, and configuration. These carry no
//! infrastructure concerns.

pub mod config;
pub mod entity;
pub mod event;

pub use config::{Config, LogFormat, LoggingConfig, RotationPolicy, SimulationConfig, SinkConfig};
pub use entity::{
    observable_fields_of, EntityId, EntitySnapshot, FieldMap, HandlerBinding, HandlerKind,
    HandlerResult, LiveEntities, SimEntity,
};
pub use event::{event_names, Event, EventKind, SimTime, WireEvent};
