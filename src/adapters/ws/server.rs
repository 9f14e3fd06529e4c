//! WebSocket server streaming the event trace to external observers.
//!
//! One endpoint, `/ws`. On connect a client first receives one
//! ENTITY_CREATED record for every currently live entity, then the live
//! stream. Text frames from the client are control messages (`start`,
//! `pause`, `resume`, `shutdown`); unknown messages are logged and ignored.
//!
//! Shutdown is cooperative: the driver flips a watch flag, every connection
//! drains what is already in its channel, closes, and the serve task is
//! awaited.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::domain::errors::SinkError;
use crate::domain::models::event::{event_names, WireEvent};
use crate::services::simulation::{ControlRequest, SharedSimView};

/// Shared state for every client connection.
struct WsState {
    events: broadcast::Sender<WireEvent>,
    control: mpsc::UnboundedSender<ControlRequest>,
    view: SharedSimView,
    shutdown: watch::Receiver<bool>,
}

/// The WebSocket event server. Built by the driver, bound with [`spawn`].
///
/// [`spawn`]: WsEventServer::spawn
pub struct WsEventServer {
    host: String,
    port: u16,
    events: broadcast::Sender<WireEvent>,
    control: mpsc::UnboundedSender<ControlRequest>,
    view: SharedSimView,
}

impl WsEventServer {
    pub fn new(
        host: &str,
        port: u16,
        events: broadcast::Sender<WireEvent>,
        control: mpsc::UnboundedSender<ControlRequest>,
        view: SharedSimView,
    ) -> Self {
        Self { host: host.to_string(), port, events, control, view }
    }

    /// Bind the listener and start serving in a background task.
    pub async fn spawn(self) -> Result<WsServerHandle, SinkError> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(WsState {
            events: self.events,
            control: self.control,
            view: self.view,
            shutdown: shutdown_rx.clone(),
        });

        let router = Router::new()
            .route("/ws", get(ws_upgrade))
            .with_state(state)
            .layer(TraceLayer::new_for_http());

        let mut serve_shutdown = shutdown_rx;
        let join = tokio::spawn(async move {
            let shutdown = async move {
                let _ = serve_shutdown.changed().await;
            };
            if let Err(error) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(%error, "event sink server exited with an error");
            }
        });

        Ok(WsServerHandle { local_addr, shutdown: shutdown_tx, join })
    }
}

/// Handle to a running server: its bound address plus the means to stop it.
pub struct WsServerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WsServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Ask every connection to close, then wait for the server task.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(error) = self.join.await {
            warn!(%error, "event sink server task failed");
        }
    }
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<WsState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_client(socket, state))
}

async fn handle_client(mut socket: WebSocket, state: Arc<WsState>) {
    // Subscribe before replaying the live set so no event falls between.
    let mut receiver = state.events.subscribe();
    let mut shutdown = state.shutdown.clone();

    {
        let view = state.view.read().await;
        for snapshot in &view.entities {
            let wire = WireEvent {
                event_name: event_names::ENTITY_CREATED.to_string(),
                sim_time: view.time,
                sender_id: None,
                target_id: None,
                entity: Some(snapshot.to_wire_value()),
                changed_properties: None,
                previous_time: None,
                body: None,
            };
            if send_wire(&mut socket, &wire).await.is_err() {
                return;
            }
        }
    }
    debug!("event sink client connected");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    // Flush anything already published, then close.
                    while let Ok(wire) = receiver.try_recv() {
                        if send_wire(&mut socket, &wire).await.is_err() {
                            return;
                        }
                    }
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                }
            }
            result = receiver.recv() => {
                match result {
                    Ok(wire) => {
                        if send_wire(&mut socket, &wire).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "event sink client lagged; events dropped");
                    }
                }
            }
            message = socket.recv() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        match ControlRequest::parse(text.as_str()) {
                            Some(request) => {
                                debug!(?request, "control message from client");
                                let _ = state.control.send(request);
                            }
                            None => {
                                warn!(message = text.as_str(), "ignoring unknown control message");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("event sink client disconnected");
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) => return,
                }
            }
        }
    }
}

async fn send_wire(socket: &mut WebSocket, wire: &WireEvent) -> Result<(), axum::Error> {
    let json = serde_json::to_string(wire).unwrap_or_default();
    socket.send(Message::Text(json.into())).await
}
