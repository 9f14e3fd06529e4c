//! Lifecycle state and external control plumbing.
//!
//! Control requests from other tasks (the WebSocket sink, embedding code)
//! are posted into an unbounded channel the driver drains at the top of
//! every loop iteration. A request is therefore observed no later than the
//! step after the one in flight when it was sent. The driver publishes its
//! observable state on a watch channel.

use std::fmt;

use tokio::sync::{mpsc, watch};

use crate::domain::models::event::SimTime;

/// Observable lifecycle state of a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimState {
    /// Constructed, sink not yet started.
    NotStarted,
    Paused,
    Running,
    /// Terminal; the driver loop exits after the current step.
    ShuttingDown,
}

impl fmt::Display for SimState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not-started"),
            Self::Paused => write!(f, "paused"),
            Self::Running => write!(f, "running"),
            Self::ShuttingDown => write!(f, "shutting-down"),
        }
    }
}

/// A control intent posted to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    Start,
    Pause,
    Resume,
    Shutdown,
}

impl ControlRequest {
    /// Parse a wire control message. Unknown strings yield `None`; the sink
    /// logs and ignores them.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "start" => Some(Self::Start),
            "pause" => Some(Self::Pause),
            "resume" => Some(Self::Resume),
            "shutdown" => Some(Self::Shutdown),
            _ => None,
        }
    }
}

/// Clonable handle for controlling a running simulation from another task.
///
/// `run` borrows the driver exclusively, so anything that wants to pause,
/// resume, or shut the simulation down while it runs goes through this
/// handle. Requests are fire-and-forget; a handle whose simulation is gone
/// simply has no effect.
#[derive(Debug, Clone)]
pub struct SimulationControl {
    requests: mpsc::UnboundedSender<ControlRequest>,
    state: watch::Receiver<SimState>,
    time: watch::Receiver<SimTime>,
}

impl SimulationControl {
    pub(crate) fn new(
        requests: mpsc::UnboundedSender<ControlRequest>,
        state: watch::Receiver<SimState>,
        time: watch::Receiver<SimTime>,
    ) -> Self {
        Self { requests, state, time }
    }

    pub fn start(&self) {
        let _ = self.requests.send(ControlRequest::Start);
    }

    pub fn pause(&self) {
        let _ = self.requests.send(ControlRequest::Pause);
    }

    pub fn resume(&self) {
        let _ = self.requests.send(ControlRequest::Resume);
    }

    pub fn shutdown(&self) {
        let _ = self.requests.send(ControlRequest::Shutdown);
    }

    /// The simulation's current lifecycle state.
    pub fn state(&self) -> SimState {
        *self.state.borrow()
    }

    /// The simulation's current virtual time.
    pub fn time(&self) -> SimTime {
        *self.time.borrow()
    }

    /// Wait until the simulation reaches the given state. Returns
    /// immediately if it is already there; returns when the driver is gone.
    pub async fn wait_for_state(&mut self, state: SimState) {
        while *self.state.borrow() != state {
            if self.state.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_messages_parse() {
        assert_eq!(ControlRequest::parse("start"), Some(ControlRequest::Start));
        assert_eq!(ControlRequest::parse("pause"), Some(ControlRequest::Pause));
        assert_eq!(ControlRequest::parse(" resume\n"), Some(ControlRequest::Resume));
        assert_eq!(ControlRequest::parse("shutdown"), Some(ControlRequest::Shutdown));
        assert_eq!(ControlRequest::parse("reboot"), None);
        assert_eq!(ControlRequest::parse(""), None);
    }

    #[test]
    fn states_display_as_kebab_case() {
        assert_eq!(SimState::NotStarted.to_string(), "not-started");
        assert_eq!(SimState::ShuttingDown.to_string(), "shutting-down");
    }
}
