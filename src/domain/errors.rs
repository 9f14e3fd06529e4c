//! Domain errors for the Scarab simulation engine.

use thiserror::Error;

use super::models::event::SimTime;

/// Errors the engine surfaces to embedding code.
///
/// Handler faults are deliberately absent: a failing handler is logged and
/// contained by the router, never propagated to the caller.
#[derive(Debug, Error)]
pub enum SimError {
    /// An entity declared a conformance schema but does not expose every
    /// declared field. Raised at admission; the entity is not added.
    #[error("entity kind '{kind_name}' is missing declared fields: {missing:?}")]
    SchemaViolation {
        kind_name: String,
        missing: Vec<String>,
    },

    /// Entities must carry a non-empty kind name to be routable.
    #[error("entity kind name must not be empty")]
    EmptyKindName,

    /// The queue rejected an event dated at or before the last delivered time.
    #[error("event time {time} is at or before the last delivered time {last}")]
    TimeInThePast { time: SimTime, last: SimTime },

    /// An event reached the queue without a sim time. The driver stamps
    /// unstamped events before queueing, so this indicates engine misuse.
    #[error("event '{name}' reached the queue without a sim time")]
    MissingEventTime { name: String },

    /// `run` was called on a simulation that is shutting down.
    #[error("cannot run a simulation that is shutting down")]
    RunAfterShutdown,

    /// `run` was called with a step count of zero.
    #[error("a bounded run must be at least one step")]
    ZeroStepRun,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

pub type SimResult<T> = Result<T, SimError>;

/// Errors raised by event sinks. The router logs these and continues; a
/// broken sink never fails dispatch.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink transport is closed")]
    Closed,

    #[error("event '{name}' has no wire form")]
    MissingWireForm { name: String },

    #[error("failed to serialize event for the wire: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("sink i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_in_the_past_mentions_both_times() {
        let err = SimError::TimeInThePast { time: 3, last: 5 };
        let msg = err.to_string();
        assert!(msg.contains('3') && msg.contains('5'));
    }

    #[test]
    fn sink_error_converts_into_sim_error() {
        let sink = SinkError::Closed;
        let err: SimError = sink.into();
        assert!(matches!(err, SimError::Sink(SinkError::Closed)));
    }
}
