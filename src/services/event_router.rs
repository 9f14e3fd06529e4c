//! Event routing: handler dispatch plus sink forwarding.
//!
//! The router looks up subscribers in the [`HandlerRegistry`] and invokes
//! them serially against the live-entity set. Handler faults are logged and
//! contained. After internal dispatch the event is forwarded exactly once to
//! every attached [`EventSink`]; sink errors are logged and never fail
//! dispatch.
//!
//! `dispatch` is fully synchronous, so a simulation with no sinks attached
//! works without an async runtime at all — that is what the testing harness
//! uses. `route` adds the async forwarding leg.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::domain::errors::SinkError;
use crate::domain::models::entity::{EntityId, LiveEntities, SimEntity};
use crate::domain::models::event::Event;

use super::handler_registry::HandlerRegistry;

/// An external collaborator that receives every delivered event.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Name used in log lines when the sink fails.
    fn name(&self) -> &str;

    /// Push one event to the sink.
    async fn forward(&self, event: &Event) -> Result<(), SinkError>;
}

/// Routes events to subscribed handlers and forwards them to sinks.
#[derive(Default)]
pub struct EventRouter {
    registry: HandlerRegistry,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a sink. Every event routed from now on is forwarded to it.
    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Register an entity's handlers. See [`HandlerRegistry::register`].
    pub fn register_entity(
        &mut self,
        id: EntityId,
        entity: &dyn SimEntity,
    ) -> crate::domain::errors::SimResult<()> {
        self.registry.register(id, entity)
    }

    /// Remove all of an entity's handlers.
    pub fn unregister_entity(&mut self, id: EntityId) {
        self.registry.unregister(id);
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Deliver the event to every subscribed handler, serially, in
    /// registration order.
    ///
    /// Skipped subscribers:
    /// - the subject entity itself, for entity-lifecycle events (an entity
    ///   never observes its own created/changed/destroyed);
    /// - owners no longer in the live set.
    pub fn dispatch(&self, entities: &mut LiveEntities, event: &Event) {
        let subject_id = event.kind.subject().map(|entity| entity.id);

        for handler in self.registry.handlers_for(event) {
            if subject_id == Some(handler.owner) {
                continue;
            }
            let Some(entity) = entities.get_mut(&handler.owner) else {
                continue;
            };
            if let Err(cause) = (handler.binding.invoke)(entity.as_mut(), event) {
                warn!(
                    event = event.wire_name(),
                    entity_id = %handler.owner,
                    %cause,
                    "handler fault contained"
                );
            }
        }
    }

    /// Dispatch to handlers, then forward the event to every sink.
    pub async fn route(&self, entities: &mut LiveEntities, event: &Event) {
        self.dispatch(entities, event);
        self.forward(event).await;
    }

    /// Forward an event to every sink without dispatching it.
    pub async fn forward(&self, event: &Event) {
        for sink in &self.sinks {
            if let Err(error) = sink.forward(event).await {
                warn!(sink = sink.name(), %error, event = event.wire_name(), "sink fault");
            }
        }
    }
}
