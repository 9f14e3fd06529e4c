//! The simulation driver.
//!
//! Owns the virtual clock, the lifecycle state machine, the ordered event
//! queue, the router, and the live-entity set. One step advances the clock
//! by one, routes a TIME_UPDATED event, drains every queued event at the new
//! time, then diffs entity state and queues synthesized ENTITY_CHANGED
//! events for the next tick.
//!
//! Control from other tasks (the WebSocket sink, embedding code holding a
//! [`SimulationControl`]) arrives on a channel drained at the top of each
//! loop iteration and is translated into SIM_* lifecycle events before the
//! observable state changes, so handlers always see the prior state.

mod control;

pub use control::{ControlRequest, SimState, SimulationControl};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::adapters::ws::server::{WsEventServer, WsServerHandle};
use crate::adapters::ws::sink::BroadcastSink;
use crate::domain::errors::{SimError, SimResult};
use crate::domain::models::config::{SimulationConfig, SinkConfig};
use crate::domain::models::entity::{EntityId, EntitySnapshot, LiveEntities, SimEntity};
use crate::domain::models::event::{Event, EventKind, SimTime, WireEvent};

use super::event_queue::OrderedEventQueue;
use super::event_router::{EventRouter, EventSink};
use super::state_differ;

/// Read-only view of the live simulation, refreshed by the driver at
/// admission, removal, and the end of every step. The sink reads it once
/// per new client connection to replay the current population.
#[derive(Debug, Clone, Default)]
pub struct SimView {
    pub time: SimTime,
    pub entities: Vec<EntitySnapshot>,
}

pub type SharedSimView = Arc<RwLock<SimView>>;

/// An entity-based, time-stepped discrete-event simulation.
pub struct Simulation {
    config: SimulationConfig,
    state: SimState,
    /// Whether the simulation has ever entered `running`; decides between
    /// SIM_START and SIM_RESUME on the next transition into it.
    started: bool,
    clock: SimTime,
    run_to: Option<SimTime>,
    entities: LiveEntities,
    queue: OrderedEventQueue,
    router: EventRouter,
    control_tx: mpsc::UnboundedSender<ControlRequest>,
    control_rx: mpsc::UnboundedReceiver<ControlRequest>,
    state_tx: watch::Sender<SimState>,
    time_tx: watch::Sender<SimTime>,
    events_tx: Option<broadcast::Sender<WireEvent>>,
    view: SharedSimView,
    ws: Option<WsServerHandle>,
    sink_addr: Option<SocketAddr>,
}

impl Simulation {
    /// Create a simulation from the given configuration. The WebSocket sink
    /// is started lazily on the first `start`/`run` call.
    pub fn new(config: SimulationConfig) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(SimState::NotStarted);
        let (time_tx, _) = watch::channel(0);

        let mut router = EventRouter::new();
        let events_tx = if config.sink.enabled {
            let (tx, _) = broadcast::channel(config.event_channel_capacity);
            router.add_sink(Arc::new(BroadcastSink::new(tx.clone())));
            Some(tx)
        } else {
            None
        };

        Self {
            config,
            state: SimState::NotStarted,
            started: false,
            clock: 0,
            run_to: None,
            entities: LiveEntities::new(),
            queue: OrderedEventQueue::new(),
            router,
            control_tx,
            control_rx,
            state_tx,
            time_tx,
            events_tx,
            view: SharedSimView::default(),
            ws: None,
            sink_addr: None,
        }
    }

    /// A simulation with no external sink: a fully functional in-process
    /// simulator, convenient for tests and embedding.
    pub fn without_sink() -> Self {
        Self::new(SimulationConfig {
            sink: SinkConfig { enabled: false, ..SinkConfig::default() },
            ..SimulationConfig::default()
        })
    }

    /// Attach an additional event sink, e.g. an event log.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.router.add_sink(sink);
        self
    }

    /// A clonable control handle usable from other tasks.
    pub fn control(&self) -> SimulationControl {
        SimulationControl::new(
            self.control_tx.clone(),
            self.state_tx.subscribe(),
            self.time_tx.subscribe(),
        )
    }

    pub fn state(&self) -> SimState {
        self.state
    }

    pub fn time(&self) -> SimTime {
        self.clock
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// The address the WebSocket sink is bound to, once started.
    pub fn sink_addr(&self) -> Option<SocketAddr> {
        self.sink_addr
    }

    /// Borrow an admitted entity by id, downcast to its concrete type.
    pub fn entity_ref<E: SimEntity>(&self, id: EntityId) -> Option<&E> {
        self.entities.get(&id)?.as_any().downcast_ref::<E>()
    }

    /// Snapshot an admitted entity's observable state.
    pub fn snapshot(&self, id: EntityId) -> Option<EntitySnapshot> {
        self.entities.get(&id).map(|entity| EntitySnapshot::capture(id, entity.as_ref()))
    }

    // ========================================================================
    // Admission and removal
    // ========================================================================

    /// Admit an entity: assign it a fresh id, check its schema, install its
    /// handlers, and queue its ENTITY_CREATED event for the next tick.
    pub async fn add_entity(&mut self, entity: Box<dyn SimEntity>) -> SimResult<EntityId> {
        let id = EntityId::new();
        self.router.register_entity(id, entity.as_ref())?;
        let snapshot = EntitySnapshot::capture(id, entity.as_ref());
        self.entities.insert(id, entity);
        self.queue.put(Event::entity_created(snapshot).with_time(self.clock + 1))?;
        self.refresh_view().await;
        Ok(id)
    }

    /// Remove an entity: unregister its handlers and queue its
    /// ENTITY_DESTROYED event for the next tick. Unknown ids are logged and
    /// ignored.
    pub async fn destroy_entity(&mut self, id: EntityId) -> SimResult<()> {
        let Some(entity) = self.entities.shift_remove(&id) else {
            warn!(entity_id = %id, "attempted to destroy an unknown entity");
            return Ok(());
        };
        self.router.unregister_entity(id);
        let snapshot = EntitySnapshot::capture(id, entity.as_ref());
        self.queue.put(Event::entity_destroyed(snapshot).with_time(self.clock + 1))?;
        self.refresh_view().await;
        Ok(())
    }

    /// Send an event into the simulation. TIME_UPDATED and SIM_* events are
    /// immediate: they route now, stamped with the current time. Everything
    /// else is queued, defaulting to the next tick when unstamped.
    pub async fn send_event(&mut self, mut event: Event) -> SimResult<()> {
        if event.kind.is_immediate() {
            event.time = Some(self.clock);
            self.route_now(&event).await;
            Ok(())
        } else {
            if event.time.is_none() {
                event.time = Some(self.clock + 1);
            }
            self.queue.put(event)
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the external sink and move to `paused` without running any
    /// steps. Idempotent; `run` calls this itself.
    pub async fn start(&mut self) -> SimResult<()> {
        if self.state != SimState::NotStarted {
            return Ok(());
        }
        if let Some(events) = &self.events_tx {
            let server = WsEventServer::new(
                &self.config.sink.host,
                self.config.sink.port,
                events.clone(),
                self.control_tx.clone(),
                self.view.clone(),
            );
            let handle = server.spawn().await?;
            info!(addr = %handle.local_addr(), "event sink listening");
            self.sink_addr = Some(handle.local_addr());
            self.ws = Some(handle);
        }
        self.set_state(SimState::Paused);
        Ok(())
    }

    /// Pause a running simulation. Emits SIM_PAUSE before the state changes;
    /// a no-op in any other state.
    pub async fn pause(&mut self) {
        if self.state != SimState::Running {
            return;
        }
        let event = Event::at(EventKind::SimulationPause, self.clock);
        self.route_now(&event).await;
        self.set_state(SimState::Paused);
    }

    /// Move a paused simulation to running. The first transition ever emits
    /// SIM_START, later ones SIM_RESUME; a no-op in any other state.
    pub async fn resume(&mut self) {
        if self.state != SimState::Paused {
            return;
        }
        let kind = if self.started {
            EventKind::SimulationResume
        } else {
            EventKind::SimulationStart
        };
        let event = Event::at(kind, self.clock);
        self.route_now(&event).await;
        self.started = true;
        self.set_state(SimState::Running);
    }

    /// Shut the simulation down. SIM_SHUTDOWN is the last event any handler
    /// observes; the sink closes its transport and its task is awaited.
    pub async fn shutdown(&mut self) {
        if self.state == SimState::ShuttingDown {
            return;
        }
        let event = Event::at(EventKind::SimulationShutdown, self.clock);
        self.route_now(&event).await;
        self.set_state(SimState::ShuttingDown);
        self.finish_shutdown().await;
    }

    // ========================================================================
    // The step loop
    // ========================================================================

    /// Run the simulation.
    ///
    /// With `steps = Some(n)` the run is bounded: the call returns once the
    /// clock has advanced `n` steps and the driver has paused. With `None`
    /// it runs until shut down. `step_length` paces each step against
    /// wall-clock; zero means as fast as possible. With `start_paused` the
    /// loop idles until an external start/resume arrives.
    pub async fn run(
        &mut self,
        steps: Option<u64>,
        step_length: Duration,
        start_paused: bool,
    ) -> SimResult<()> {
        if self.state == SimState::ShuttingDown {
            return Err(SimError::RunAfterShutdown);
        }
        self.run_to = match steps {
            Some(0) => return Err(SimError::ZeroStepRun),
            Some(n) => Some(self.clock + n),
            None => None,
        };
        self.start().await?;
        if !start_paused {
            self.resume().await;
        }
        self.run_loop(step_length).await;
        Ok(())
    }

    async fn run_loop(&mut self, step_length: Duration) {
        loop {
            self.drain_control().await;
            match self.state {
                SimState::ShuttingDown => {
                    self.finish_shutdown().await;
                    return;
                }
                SimState::Running => {
                    if self.run_to.is_some_and(|limit| self.clock >= limit) {
                        // Bounded run complete: pause and hand control back.
                        self.pause().await;
                        return;
                    }
                    let step_started = Instant::now();
                    self.step().await;
                    self.pace(step_started, step_length).await;
                }
                SimState::Paused | SimState::NotStarted => self.idle_wait().await,
            }
        }
    }

    /// One step: advance the clock, route TIME_UPDATED, drain the queue at
    /// the new time, then synthesize change events for the next tick.
    ///
    /// Every handler in this step observes changes computed against the same
    /// pre-step snapshot. The synthesized events are not re-diffed at the
    /// next tick; a handler reacting to them queues explicit events if it
    /// needs a further wave.
    async fn step(&mut self) {
        self.clock += 1;
        let _ = self.time_tx.send(self.clock);

        let event = Event::time_updated(self.clock, self.clock - 1);
        self.route_now(&event).await;

        let before = state_differ::snapshot_all(&self.entities);
        while self.queue.peek_next_time() == Some(self.clock) {
            let Some(event) = self.queue.take_next() else {
                break;
            };
            self.route_now(&event).await;
        }
        let after = state_differ::snapshot_all(&self.entities);

        let ids: Vec<EntityId> = self.entities.keys().copied().collect();
        let mut ordered = Vec::with_capacity(ids.len());
        for id in ids {
            let (Some(old), Some(new)) = (before.get(&id), after.get(&id)) else {
                continue;
            };
            let changed = state_differ::diff(old, new);
            if !changed.is_empty() {
                let event = Event::entity_changed(new.clone(), changed).with_time(self.clock + 1);
                if let Err(err) = self.queue.put(event) {
                    error!(error = %err, "failed to queue a synthesized change event");
                }
            }
            ordered.push(new.clone());
        }
        self.publish_view(ordered).await;
    }

    /// Sleep out the remainder of the step budget. Long steps are not
    /// caught up.
    async fn pace(&self, step_started: Instant, step_length: Duration) {
        if step_length.is_zero() {
            tokio::task::yield_now().await;
            return;
        }
        tokio::time::sleep_until(step_started + step_length).await;
    }

    /// While paused, wait for a control request or the next poll interval.
    async fn idle_wait(&mut self) {
        let poll = Duration::from_millis(self.config.idle_poll_ms);
        let received = tokio::time::timeout(poll, self.control_rx.recv()).await;
        if let Ok(Some(request)) = received {
            self.apply_control(request).await;
        }
    }

    async fn drain_control(&mut self) {
        loop {
            let received = self.control_rx.try_recv();
            match received {
                Ok(request) => self.apply_control(request).await,
                Err(_) => break,
            }
        }
    }

    async fn apply_control(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::Start | ControlRequest::Resume => self.resume().await,
            ControlRequest::Pause => self.pause().await,
            ControlRequest::Shutdown => self.shutdown().await,
        }
    }

    async fn finish_shutdown(&mut self) {
        if let Some(handle) = self.ws.take() {
            handle.shutdown().await;
        }
    }

    fn set_state(&mut self, state: SimState) {
        self.state = state;
        let _ = self.state_tx.send(state);
    }

    async fn route_now(&mut self, event: &Event) {
        self.router.route(&mut self.entities, event).await;
    }

    async fn refresh_view(&self) {
        let snapshots = self
            .entities
            .iter()
            .map(|(id, entity)| EntitySnapshot::capture(*id, entity.as_ref()))
            .collect();
        self.publish_view(snapshots).await;
    }

    async fn publish_view(&self, entities: Vec<EntitySnapshot>) {
        let mut view = self.view.write().await;
        view.time = self.clock;
        view.entities = entities;
    }
}
