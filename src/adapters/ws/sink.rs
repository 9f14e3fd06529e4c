//! Broadcast-channel event sink.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::errors::SinkError;
use crate::domain::models::event::{Event, WireEvent};
use crate::services::event_router::EventSink;

/// Serializes events into their wire form and publishes them on a broadcast
/// channel. The WebSocket server subscribes on behalf of each client; with
/// no clients connected the send is a cheap no-op.
pub struct BroadcastSink {
    events: broadcast::Sender<WireEvent>,
}

impl BroadcastSink {
    pub fn new(events: broadcast::Sender<WireEvent>) -> Self {
        Self { events }
    }

    /// Number of currently subscribed receivers.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

#[async_trait]
impl EventSink for BroadcastSink {
    fn name(&self) -> &str {
        "websocket-broadcast"
    }

    async fn forward(&self, event: &Event) -> Result<(), SinkError> {
        let wire = WireEvent::try_from(event).map_err(|_| SinkError::MissingWireForm {
            name: event.wire_name().to_string(),
        })?;
        // Send errors only mean nobody is listening right now.
        let _ = self.events.send(wire);
        Ok(())
    }
}
