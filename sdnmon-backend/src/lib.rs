//! Library crate for the sdnmon telemetry engine
//!
//! The binary wires these modules to a JSON-lines bridge; integration tests
//! drive the [`controller::Controller`] directly.

pub mod bridge;
pub mod config;
pub mod control;
pub mod controller;
pub mod history;
pub mod probe_token;
pub mod services;
pub mod tasks;
pub mod utils;
