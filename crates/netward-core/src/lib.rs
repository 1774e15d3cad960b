//! # netward-core
//!
//! Core types, errors, and configuration for netward.
//!
//! This crate provides shared functionality used across all netward crates:
//!
//! - **Identifiers**: the `SandboxId` primary key assigned by the orchestrator
//! - **Types**: lifecycle states, plugin configuration results, state reports
//! - **Errors**: the error taxonomy for lifecycle, handoff, and transfer faults
//! - **Configuration**: loading, validation, and defaults for all sections

pub mod config;
pub mod error;
pub mod types;

// Re-exports for convenience
pub use config::Config;
pub use error::{Error, Result};
pub use types::{ConfigResult, LifecycleState, Route, SandboxId, StateReport};
