//! Utilities module for the sdnmon backend.
//!
//! Shared helpers used across the engine components.

pub mod error_handling;
pub mod locks;
