//! Scarab - entity-based discrete-event simulation framework
//!
//! Modelers declare entities — plain data types with behavior — and bind
//! methods as handlers for specific event kinds. The framework provides:
//! - A virtual clock advanced one step at a time, paced against wall-clock
//! - Deterministic event delivery: time order, kind priority, insertion order
//! - Per-step state diffing that synthesizes entity-changed events
//! - A WebSocket sink streaming the event trace to external observers,
//!   which can steer the simulation with start/pause/resume/shutdown
//!
//! ```no_run
//! use scarab::{Simulation, SimulationConfig};
//! use std::time::Duration;
//!
//! # async fn demo() -> scarab::SimResult<()> {
//! let mut sim = Simulation::new(SimulationConfig::default());
//! // sim.add_entity(...) your entities here.
//! sim.run(Some(100), Duration::from_secs(1), false).await?;
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;
pub mod testing;

// Re-export key types for convenience
pub use domain::errors::{SimError, SimResult, SinkError};
pub use domain::models::config::{Config, LoggingConfig, SimulationConfig, SinkConfig};
pub use domain::models::entity::{
    observable_fields_of, EntityId, EntitySnapshot, FieldMap, HandlerBinding, HandlerResult,
    SimEntity,
};
pub use domain::models::event::{event_names, Event, EventKind, SimTime, WireEvent};
pub use services::event_router::EventSink;
pub use services::simulation::{SimState, Simulation, SimulationControl};
