//! Integration tests for the simulation driver.
//!
//! These drive a full `Simulation` (no WebSocket transport; a recording
//! sink stands in for it) and verify:
//! 1. Lifecycle events around bounded runs
//! 2. Entity admission, creation delivery, and change detection
//! 3. Delivery ordering: time order, kind priority, insertion order
//! 4. Self-notification exclusion and handler fault containment

use std::any::Any;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use scarab::{
    event_names, observable_fields_of, EntityId, EntitySnapshot, Event, EventKind, EventSink,
    FieldMap, HandlerBinding, HandlerResult, SimEntity, SimState, Simulation, SinkError,
    WireEvent,
};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Sink that records every forwarded event in wire form.
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<WireEvent>>,
}

impl RecordingSink {
    fn recorded(&self) -> Vec<WireEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn forward(&self, event: &Event) -> Result<(), SinkError> {
        let wire = WireEvent::try_from(event).expect("routed events are stamped");
        self.events.lock().unwrap().push(wire);
        Ok(())
    }
}

fn recorded_sim() -> (Simulation, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let sim = Simulation::without_sink().with_sink(sink.clone());
    (sim, sink)
}

fn loose_snapshot(kind: &str) -> EntitySnapshot {
    EntitySnapshot { id: EntityId::new(), kind_name: kind.to_string(), fields: FieldMap::new() }
}

/// A gauge with one observable field. Bookkeeping fields are
/// underscore-prefixed so they stay out of snapshots and diffs.
#[derive(Serialize, Default)]
struct Gauge {
    temp: i64,
    _self_changed: u32,
}

impl Gauge {
    fn on_set_temp(&mut self, event: &Event) -> HandlerResult {
        let EventKind::Named { body, .. } = &event.kind else {
            return Err("set-temp requires a named event".to_string());
        };
        self.temp = body["temp"].as_i64().ok_or("set-temp carries no temp")?;
        Ok(())
    }

    fn on_gauge_changed(&mut self, _event: &Event) -> HandlerResult {
        self._self_changed += 1;
        Ok(())
    }
}

impl SimEntity for Gauge {
    fn kind_name(&self) -> &str {
        "gauge"
    }

    fn observable_fields(&self) -> FieldMap {
        observable_fields_of(self)
    }

    fn handlers(&self) -> Vec<HandlerBinding> {
        vec![
            HandlerBinding::named("set-temp", Gauge::on_set_temp),
            HandlerBinding::entity_changed("gauge", Gauge::on_gauge_changed),
        ]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Observes gauge lifecycle events.
#[derive(Serialize, Default)]
struct Observer {
    _created_seen: u32,
    _created_temp: Option<i64>,
    _changed_temps: Vec<i64>,
}

impl Observer {
    fn on_gauge_created(&mut self, event: &Event) -> HandlerResult {
        let entity = event.kind.subject().ok_or("created event without subject")?;
        self._created_seen += 1;
        self._created_temp = entity.get("temp").and_then(Value::as_i64);
        Ok(())
    }

    fn on_gauge_changed(&mut self, event: &Event) -> HandlerResult {
        let entity = event.kind.subject().ok_or("changed event without subject")?;
        if let Some(temp) = entity.get("temp").and_then(Value::as_i64) {
            self._changed_temps.push(temp);
        }
        Ok(())
    }
}

impl SimEntity for Observer {
    fn kind_name(&self) -> &str {
        "observer"
    }

    fn observable_fields(&self) -> FieldMap {
        observable_fields_of(self)
    }

    fn handlers(&self) -> Vec<HandlerBinding> {
        vec![
            HandlerBinding::entity_created("gauge", Observer::on_gauge_created),
            HandlerBinding::entity_changed("gauge", Observer::on_gauge_changed),
        ]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_step_run_emits_start_then_one_time_update() {
    let (mut sim, sink) = recorded_sim();
    sim.run(Some(1), Duration::ZERO, false).await.unwrap();

    let events = sink.recorded();
    let starts: Vec<&WireEvent> =
        events.iter().filter(|e| e.event_name == event_names::SIMULATION_START).collect();
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].sim_time, 0);

    let updates: Vec<&WireEvent> =
        events.iter().filter(|e| e.event_name == event_names::TIME_UPDATED).collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].sim_time, 1);
    assert_eq!(updates[0].previous_time, Some(0));

    assert_eq!(sim.state(), SimState::Paused);
    assert_eq!(sim.time(), 1);
}

#[tokio::test]
async fn empty_simulation_still_ticks() {
    let (mut sim, sink) = recorded_sim();
    sim.run(Some(3), Duration::ZERO, false).await.unwrap();

    let updates: Vec<u64> = sink
        .recorded()
        .iter()
        .filter(|e| e.event_name == event_names::TIME_UPDATED)
        .map(|e| e.sim_time)
        .collect();
    assert_eq!(updates, vec![1, 2, 3]);
    assert_eq!(sim.time(), 3);
}

#[tokio::test]
async fn second_run_resumes_instead_of_starting() {
    let (mut sim, sink) = recorded_sim();
    sim.run(Some(1), Duration::ZERO, false).await.unwrap();
    sim.run(Some(1), Duration::ZERO, false).await.unwrap();

    let events = sink.recorded();
    let starts =
        events.iter().filter(|e| e.event_name == event_names::SIMULATION_START).count();
    let resumes =
        events.iter().filter(|e| e.event_name == event_names::SIMULATION_RESUME).count();
    assert_eq!(starts, 1);
    assert_eq!(resumes, 1);
    assert_eq!(sim.time(), 2);
}

#[tokio::test]
async fn pausing_an_already_paused_simulation_emits_nothing() {
    let (mut sim, sink) = recorded_sim();
    sim.run(Some(1), Duration::ZERO, false).await.unwrap();
    assert_eq!(sim.state(), SimState::Paused);

    sim.pause().await;
    sim.pause().await;

    let pauses = sink
        .recorded()
        .iter()
        .filter(|e| e.event_name == event_names::SIMULATION_PAUSE)
        .count();
    assert_eq!(pauses, 1);
}

#[tokio::test]
async fn shutdown_event_is_the_last_delivered() {
    let (mut sim, sink) = recorded_sim();
    sim.add_entity(Box::new(Gauge::default())).await.unwrap();
    sim.run(Some(2), Duration::ZERO, false).await.unwrap();
    sim.shutdown().await;

    let events = sink.recorded();
    assert_eq!(
        events.last().map(|e| e.event_name.clone()),
        Some(event_names::SIMULATION_SHUTDOWN.to_string())
    );
    assert_eq!(sim.state(), SimState::ShuttingDown);
}

// ---------------------------------------------------------------------------
// Admission and creation delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn created_entity_is_observed_next_step_with_its_snapshot() {
    let mut sim = Simulation::without_sink();
    sim.add_entity(Box::new(Gauge { temp: 50, ..Gauge::default() })).await.unwrap();
    let observer = sim.add_entity(Box::new(Observer::default())).await.unwrap();

    sim.run(Some(1), Duration::ZERO, false).await.unwrap();

    let observer = sim.entity_ref::<Observer>(observer).unwrap();
    assert_eq!(observer._created_seen, 1);
    assert_eq!(observer._created_temp, Some(50));
}

#[tokio::test]
async fn admission_at_time_k_delivers_creation_at_k_plus_one() {
    let (mut sim, sink) = recorded_sim();
    sim.run(Some(1), Duration::ZERO, false).await.unwrap();
    assert_eq!(sim.time(), 1);

    sim.add_entity(Box::new(Gauge::default())).await.unwrap();
    sim.run(Some(1), Duration::ZERO, false).await.unwrap();

    let created: Vec<u64> = sink
        .recorded()
        .iter()
        .filter(|e| e.event_name == event_names::ENTITY_CREATED)
        .map(|e| e.sim_time)
        .collect();
    assert_eq!(created, vec![2]);
}

#[tokio::test]
async fn destroyed_entity_is_announced_and_gone() {
    let (mut sim, sink) = recorded_sim();
    let gauge = sim.add_entity(Box::new(Gauge::default())).await.unwrap();
    sim.run(Some(1), Duration::ZERO, false).await.unwrap();

    sim.destroy_entity(gauge).await.unwrap();
    sim.run(Some(1), Duration::ZERO, false).await.unwrap();

    assert_eq!(sim.entity_count(), 0);
    let destroyed: Vec<u64> = sink
        .recorded()
        .iter()
        .filter(|e| e.event_name == event_names::ENTITY_DESTROYED)
        .map(|e| e.sim_time)
        .collect();
    assert_eq!(destroyed, vec![2]);
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn kind_priority_orders_events_within_a_tick() {
    let (mut sim, sink) = recorded_sim();
    sim.send_event(Event::named("x", Value::Null).with_time(2)).await.unwrap();
    sim.send_event(Event::entity_destroyed(loose_snapshot("a")).with_time(2)).await.unwrap();
    sim.send_event(Event::entity_created(loose_snapshot("c")).with_time(2)).await.unwrap();

    sim.run(Some(2), Duration::ZERO, false).await.unwrap();

    let at_two: Vec<String> = sink
        .recorded()
        .iter()
        .filter(|e| e.sim_time == 2 && e.event_name != event_names::TIME_UPDATED)
        .filter(|e| e.event_name != event_names::SIMULATION_PAUSE)
        .map(|e| e.event_name.clone())
        .collect();
    assert_eq!(
        at_two,
        vec![
            event_names::ENTITY_CREATED.to_string(),
            event_names::ENTITY_DESTROYED.to_string(),
            "x".to_string(),
        ]
    );
}

#[tokio::test]
async fn delivery_times_never_decrease_and_each_tick_opens_with_a_time_update() {
    let (mut sim, sink) = recorded_sim();
    sim.add_entity(Box::new(Gauge { temp: 1, ..Gauge::default() })).await.unwrap();
    sim.add_entity(Box::new(Observer::default())).await.unwrap();
    sim.send_event(Event::named("set-temp", json!({"temp": 9})).with_time(2)).await.unwrap();
    sim.send_event(Event::named("noise", Value::Null).with_time(4)).await.unwrap();

    sim.run(Some(5), Duration::ZERO, false).await.unwrap();

    let events = sink.recorded();
    let mut last_time = 0;
    for event in &events {
        assert!(event.sim_time >= last_time, "time went backwards at {}", event.event_name);
        last_time = event.sim_time;
    }
    for t in 1..=5u64 {
        let first_at_t = events.iter().find(|e| e.sim_time == t).unwrap();
        assert_eq!(
            first_at_t.event_name,
            event_names::TIME_UPDATED,
            "tick {t} did not open with a time update"
        );
    }
}

// ---------------------------------------------------------------------------
// Change detection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn field_change_synthesizes_changed_event_for_next_tick() {
    let (mut sim, sink) = recorded_sim();
    sim.add_entity(Box::new(Gauge { temp: 50, ..Gauge::default() })).await.unwrap();
    let observer = sim.add_entity(Box::new(Observer::default())).await.unwrap();
    sim.send_event(Event::named("set-temp", json!({"temp": 75})).with_time(1)).await.unwrap();

    sim.run(Some(2), Duration::ZERO, false).await.unwrap();

    let recorded = sink.recorded();
    let changed: Vec<&WireEvent> =
        recorded.iter().filter(|e| e.event_name == event_names::ENTITY_CHANGED).collect();
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].sim_time, 2);
    assert_eq!(changed[0].changed_properties, Some(vec!["temp".to_string()]));
    assert_eq!(changed[0].entity.as_ref().unwrap()["temp"], json!(75));

    let observer = sim.entity_ref::<Observer>(observer).unwrap();
    assert_eq!(observer._changed_temps, vec![75]);
}

#[tokio::test]
async fn unchanged_entities_produce_no_changed_events() {
    let (mut sim, sink) = recorded_sim();
    sim.add_entity(Box::new(Gauge { temp: 50, ..Gauge::default() })).await.unwrap();
    sim.run(Some(3), Duration::ZERO, false).await.unwrap();

    let changed = sink
        .recorded()
        .iter()
        .filter(|e| e.event_name == event_names::ENTITY_CHANGED)
        .count();
    assert_eq!(changed, 0);
}

#[tokio::test]
async fn entity_never_observes_its_own_change() {
    let mut sim = Simulation::without_sink();
    let gauge = sim.add_entity(Box::new(Gauge { temp: 50, ..Gauge::default() })).await.unwrap();
    let observer = sim.add_entity(Box::new(Observer::default())).await.unwrap();
    sim.send_event(Event::named("set-temp", json!({"temp": 75})).with_time(1)).await.unwrap();

    sim.run(Some(3), Duration::ZERO, false).await.unwrap();

    assert_eq!(sim.entity_ref::<Gauge>(gauge).unwrap()._self_changed, 0);
    assert_eq!(sim.entity_ref::<Observer>(observer).unwrap()._changed_temps, vec![75]);
}

// ---------------------------------------------------------------------------
// Fault containment
// ---------------------------------------------------------------------------

#[derive(Serialize, Default)]
struct Bomb {
    _calls: u32,
}

impl Bomb {
    fn on_boom(&mut self, _event: &Event) -> HandlerResult {
        self._calls += 1;
        Err("kaboom".to_string())
    }
}

impl SimEntity for Bomb {
    fn kind_name(&self) -> &str {
        "bomb"
    }

    fn observable_fields(&self) -> FieldMap {
        observable_fields_of(self)
    }

    fn handlers(&self) -> Vec<HandlerBinding> {
        vec![HandlerBinding::named("boom", Bomb::on_boom)]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Serialize, Default)]
struct Bystander {
    _calls: u32,
}

impl Bystander {
    fn on_boom(&mut self, _event: &Event) -> HandlerResult {
        self._calls += 1;
        Ok(())
    }
}

impl SimEntity for Bystander {
    fn kind_name(&self) -> &str {
        "bystander"
    }

    fn observable_fields(&self) -> FieldMap {
        observable_fields_of(self)
    }

    fn handlers(&self) -> Vec<HandlerBinding> {
        vec![HandlerBinding::named("boom", Bystander::on_boom)]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[tokio::test]
async fn a_failing_handler_does_not_take_down_the_step() {
    let mut sim = Simulation::without_sink();
    let bomb = sim.add_entity(Box::new(Bomb::default())).await.unwrap();
    let bystander = sim.add_entity(Box::new(Bystander::default())).await.unwrap();
    sim.send_event(Event::named("boom", Value::Null).with_time(1)).await.unwrap();

    sim.run(Some(1), Duration::ZERO, false).await.unwrap();

    assert_eq!(sim.entity_ref::<Bomb>(bomb).unwrap()._calls, 1);
    assert_eq!(sim.entity_ref::<Bystander>(bystander).unwrap()._calls, 1);
    assert_eq!(sim.state(), SimState::Paused);
    assert_eq!(sim.time(), 1);
}

// ---------------------------------------------------------------------------
// Change waves
// ---------------------------------------------------------------------------

/// Mirrors a gauge's temperature when told about changes; its own mutation
/// is then picked up by the next step's diff.
#[derive(Serialize, Default)]
struct Echo {
    copied_temp: i64,
}

impl Echo {
    fn on_gauge_changed(&mut self, event: &Event) -> HandlerResult {
        let entity = event.kind.subject().ok_or("changed event without subject")?;
        self.copied_temp = entity.get("temp").and_then(Value::as_i64).unwrap_or_default();
        Ok(())
    }
}

impl SimEntity for Echo {
    fn kind_name(&self) -> &str {
        "echo"
    }

    fn observable_fields(&self) -> FieldMap {
        observable_fields_of(self)
    }

    fn handlers(&self) -> Vec<HandlerBinding> {
        vec![HandlerBinding::entity_changed("gauge", Echo::on_gauge_changed)]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[tokio::test]
async fn a_change_wave_propagates_one_tick_per_hop() {
    let (mut sim, sink) = recorded_sim();
    sim.add_entity(Box::new(Gauge { temp: 10, ..Gauge::default() })).await.unwrap();
    sim.add_entity(Box::new(Echo::default())).await.unwrap();
    sim.send_event(Event::named("set-temp", json!({"temp": 42})).with_time(1)).await.unwrap();

    sim.run(Some(3), Duration::ZERO, false).await.unwrap();

    // t=1: gauge mutates. t=2: gauge-changed delivered, echo mutates.
    // t=3: echo-changed delivered.
    let changed: Vec<(u64, String)> = sink
        .recorded()
        .iter()
        .filter(|e| e.event_name == event_names::ENTITY_CHANGED)
        .map(|e| {
            let kind = e.entity.as_ref().unwrap()["kind_name"].as_str().unwrap().to_string();
            (e.sim_time, kind)
        })
        .collect();
    assert_eq!(
        changed,
        vec![(2, "gauge".to_string()), (3, "echo".to_string())]
    );
}
