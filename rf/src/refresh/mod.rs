//! Scheduled refresh loop
//!
//! [`RefreshLoop`] owns the connection lifecycle for each cycle and a
//! per-instance background task that re-runs cycles after the configured
//! delay. A failed cycle is logged and the schedule carries on.

mod connection;
mod engine;

pub use engine::RefreshLoop;
