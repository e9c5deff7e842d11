//! HTTP surface of the seedwarden daemon.
//!
//! The binary in `main.rs` wires engines from configuration; the router and
//! state live here so integration tests can drive them in-process.

pub mod api;
pub mod metrics;
pub mod state;
