//! Time-and-priority ordered event queue.
//!
//! Events are stamped with a virtual time and returned in (time, kind
//! priority, insertion) order. Within a single time, entity creations drain
//! before changes, changes before destructions, and everything else last, so
//! observers learn of existence before updates and of updates before
//! removal.
//!
//! The queue tracks the last time it handed out. Once events at time τ have
//! been returned, the bucket at τ is sealed: a `put` at or before τ fails.
//! Handlers executing during tick τ may therefore still queue events for
//! τ + 1 and later.

use std::collections::{BTreeMap, VecDeque};

use crate::domain::errors::{SimError, SimResult};
use crate::domain::models::event::{Event, SimTime, PRIORITY_BANDS};

/// One priority band: a time-ordered map of FIFO buckets.
#[derive(Debug, Default)]
struct TimeBand {
    buckets: BTreeMap<SimTime, VecDeque<Event>>,
}

impl TimeBand {
    fn push(&mut self, time: SimTime, event: Event) {
        self.buckets.entry(time).or_default().push_back(event);
    }

    /// The smallest time with a pending event in this band.
    fn next_time(&self) -> Option<SimTime> {
        self.buckets.keys().next().copied()
    }

    /// Pop the oldest event at exactly `time`, dropping the bucket once empty.
    fn pop_at(&mut self, time: SimTime) -> Option<Event> {
        let bucket = self.buckets.get_mut(&time)?;
        let event = bucket.pop_front();
        if bucket.is_empty() {
            self.buckets.remove(&time);
        }
        event
    }
}

/// The ordered event queue used by the simulation driver.
#[derive(Debug, Default)]
pub struct OrderedEventQueue {
    bands: [TimeBand; PRIORITY_BANDS],
    last_returned: Option<SimTime>,
    len: usize,
}

impl OrderedEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event at its stamped time.
    ///
    /// Fails with [`SimError::TimeInThePast`] when the time is at or before
    /// the last returned time, and with [`SimError::MissingEventTime`] when
    /// the driver failed to stamp the event.
    pub fn put(&mut self, event: Event) -> SimResult<()> {
        let time = event.time.ok_or_else(|| SimError::MissingEventTime {
            name: event.wire_name().to_string(),
        })?;
        if let Some(last) = self.last_returned {
            if time <= last {
                return Err(SimError::TimeInThePast { time, last });
            }
        }
        let band = event.kind.priority_band();
        self.bands[band].push(time, event);
        self.len += 1;
        Ok(())
    }

    /// The smallest time of any pending event.
    pub fn peek_next_time(&self) -> Option<SimTime> {
        self.bands.iter().filter_map(TimeBand::next_time).min()
    }

    /// The next event in (time, priority, insertion) order.
    pub fn take_next(&mut self) -> Option<Event> {
        let time = self.peek_next_time()?;
        for band in &mut self.bands {
            if band.next_time() == Some(time) {
                let event = band.pop_at(time)?;
                self.last_returned = Some(time);
                self.len -= 1;
                return Some(event);
            }
        }
        None
    }

    /// The time of the most recently returned event, if any.
    pub fn last_returned_time(&self) -> Option<SimTime> {
        self.last_returned
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::entity::{EntityId, EntitySnapshot, FieldMap};
    use serde_json::{json, Value};

    fn snapshot(kind: &str) -> EntitySnapshot {
        EntitySnapshot {
            id: EntityId::new(),
            kind_name: kind.to_string(),
            fields: FieldMap::new(),
        }
    }

    fn named(tag: u64, time: SimTime) -> Event {
        Event::named("tick", json!({ "tag": tag })).with_time(time)
    }

    #[test]
    fn events_come_back_in_time_order() {
        let mut queue = OrderedEventQueue::new();
        queue.put(named(1, 5)).unwrap();
        queue.put(named(2, 2)).unwrap();
        queue.put(named(3, 9)).unwrap();

        let times: Vec<SimTime> = std::iter::from_fn(|| queue.take_next())
            .map(|e| e.time.unwrap())
            .collect();
        assert_eq!(times, vec![2, 5, 9]);
        assert!(queue.is_empty());
    }

    #[test]
    fn insertion_order_is_preserved_within_a_time() {
        let mut queue = OrderedEventQueue::new();
        for tag in 0..4 {
            queue.put(named(tag, 1)).unwrap();
        }
        for expected in 0..4 {
            let event = queue.take_next().unwrap();
            match event.kind {
                crate::domain::models::event::EventKind::Named { body, .. } => {
                    assert_eq!(body["tag"], json!(expected));
                }
                _ => panic!("expected named event"),
            }
        }
    }

    #[test]
    fn lifecycle_priority_applies_within_a_time() {
        let mut queue = OrderedEventQueue::new();
        queue.put(Event::named("x", Value::Null).with_time(2)).unwrap();
        queue.put(Event::entity_destroyed(snapshot("a")).with_time(2)).unwrap();
        queue.put(Event::entity_changed(snapshot("a"), vec![]).with_time(2)).unwrap();
        queue.put(Event::entity_created(snapshot("c")).with_time(2)).unwrap();

        let bands: Vec<usize> = std::iter::from_fn(|| queue.take_next())
            .map(|e| e.kind.priority_band())
            .collect();
        assert_eq!(bands, vec![0, 1, 2, 3]);
    }

    #[test]
    fn earlier_time_wins_over_higher_priority() {
        let mut queue = OrderedEventQueue::new();
        queue.put(Event::entity_created(snapshot("c")).with_time(5)).unwrap();
        queue.put(Event::named("x", Value::Null).with_time(3)).unwrap();

        assert_eq!(queue.take_next().unwrap().time, Some(3));
        assert_eq!(queue.take_next().unwrap().time, Some(5));
    }

    #[test]
    fn put_at_or_before_last_returned_time_is_rejected() {
        let mut queue = OrderedEventQueue::new();
        queue.put(named(0, 3)).unwrap();
        queue.take_next().unwrap();

        assert!(matches!(
            queue.put(named(1, 3)),
            Err(SimError::TimeInThePast { time: 3, last: 3 })
        ));
        assert!(matches!(
            queue.put(named(2, 2)),
            Err(SimError::TimeInThePast { time: 2, last: 3 })
        ));
        queue.put(named(3, 4)).unwrap();
    }

    #[test]
    fn unstamped_events_are_rejected() {
        let mut queue = OrderedEventQueue::new();
        let result = queue.put(Event::named("later", Value::Null));
        assert!(matches!(result, Err(SimError::MissingEventTime { .. })));
        assert!(queue.is_empty());
    }

    #[test]
    fn peek_does_not_consume() {
        let mut queue = OrderedEventQueue::new();
        assert_eq!(queue.peek_next_time(), None);
        queue.put(named(0, 7)).unwrap();
        assert_eq!(queue.peek_next_time(), Some(7));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn draining_one_time_leaves_later_events() {
        let mut queue = OrderedEventQueue::new();
        queue.put(named(0, 1)).unwrap();
        queue.put(named(1, 1)).unwrap();
        queue.put(named(2, 2)).unwrap();

        while queue.peek_next_time() == Some(1) {
            queue.take_next().unwrap();
        }
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek_next_time(), Some(2));
    }
}
