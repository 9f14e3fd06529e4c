//! Logging setup built on tracing.

mod logger;

pub use logger::{init, LogGuard};
