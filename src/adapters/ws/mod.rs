//! WebSocket event sink.
//!
//! The router forwards every delivered event into a broadcast channel via
//! [`sink::BroadcastSink`]; [`server::WsEventServer`] serves that stream to
//! WebSocket clients and feeds their control messages back to the driver.

pub mod server;
pub mod sink;

pub use server::{WsEventServer, WsServerHandle};
pub use sink::BroadcastSink;
