// file: src/logging/mod.rs
// version: 2.0.0
// guid: i9j0k1l2-m3n4-5678-9012-345678ijklmn

//! Logging system for the bootstrap orchestrator
//!
//! Every stage transition goes through `tracing`; the subscriber installed
//! by [`init_logger`] writes each event to the console and to a durable,
//! rotated log file.

pub mod logger;
pub mod rotation;

pub use logger::{init_logger, MonotonicTime};
pub use rotation::{rotate_if_needed, tail};
