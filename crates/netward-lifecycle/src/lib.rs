//! Sandbox network lifecycle for netward.
//!
//! This crate drives the per-sandbox state machine and owns all writes to
//! the namespace registry:
//!
//! - **Registry**: read-mostly map from sandbox ID to immutable record
//!   snapshots (handle, state, configuration result)
//! - **Manager**: serialized per-ID transitions (create → configure →
//!   active → tearing-down → removed), plugin deadlines, teardown retry
//!   with forced release, and lifecycle event broadcast
//! - **Plugin contract**: the `NetworkPlugin` setup/remove seam to external
//!   configuration plugins

pub mod manager;
pub mod plugin;
pub mod registry;

pub use manager::{LifecycleEvent, LifecycleManager, TeardownOutcome};
pub use plugin::{NetworkPlugin, NoopPlugin, PluginOptions};
pub use registry::{Registry, SandboxRecord};
