// file: src/lib.rs
// version: 3.0.0
// guid: d82472d1-7f0f-4eb4-b0a3-6e1547103eb4

//! # vps-bootstrap
//!
//! Staged, re-entrant provisioning of a fresh Ubuntu VPS into a hardened
//! container host. Stages run in order against a durable run state file,
//! so an interrupted or failed run resumes where it stopped.

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod handoff;
pub mod interruption;
pub mod logging;
pub mod preconditions;
pub mod render;
pub mod runner;
pub mod stage;
pub mod stages;
pub mod state;

pub use error::{BootstrapError, Result};

/// Version information for the utility
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
