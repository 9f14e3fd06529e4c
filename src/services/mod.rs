//! Core engine services: the queue, the registry, the router, the differ,
//! and the driver that ties them together.

pub mod event_queue;
pub mod event_router;
pub mod handler_registry;
pub mod simulation;
pub mod state_differ;

pub use event_queue::OrderedEventQueue;
pub use event_router::{EventRouter, EventSink};
pub use handler_registry::HandlerRegistry;
pub use simulation::{
    ControlRequest, SharedSimView, SimState, SimView, Simulation, SimulationControl,
};
