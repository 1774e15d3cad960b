//! Common type definitions shared across netward crates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Strongly-typed sandbox identifier.
///
/// Assigned by the external orchestrator and used as the primary key for
/// every registry lookup, lifecycle transition, and handoff request. The
/// value is opaque; netward never parses structure out of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SandboxId(String);

impl SandboxId {
    /// Create a new sandbox ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether the ID is usable as a pinned-path file name.
    ///
    /// Path separators and empty strings are rejected so an ID can never
    /// escape the namespace directory.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && !self.0.contains('/') && self.0 != "." && self.0 != ".."
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SandboxId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SandboxId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Lifecycle state of one sandbox's network namespace.
///
/// Exactly one state exists per sandbox ID at any time; transitions are
/// serialized per ID by the lifecycle manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Creation requested but the namespace does not exist yet.
    Pending,

    /// Namespace exists and loopback is up; not yet configured.
    NamespaceCreated,

    /// Plugin `setup` call in flight.
    Configuring,

    /// Configured and eligible for descriptor handoff.
    Active,

    /// Plugin `remove` call in flight; handoffs are denied.
    TearingDown,

    /// Namespace released and registry entry erased.
    Removed,

    /// Plugin `setup` failed; namespace retained for diagnostic teardown.
    Failed,
}

impl LifecycleState {
    /// Whether descriptor handoff is permitted in this state.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::NamespaceCreated => "namespace_created",
            Self::Configuring => "configuring",
            Self::Active => "active",
            Self::TearingDown => "tearing_down",
            Self::Removed => "removed",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A route programmed into a namespace by the network plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Destination CIDR, e.g. `"0.0.0.0/0"`.
    pub destination: String,

    /// Next-hop address, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

/// Result of a plugin `setup` call.
///
/// Immutable once recorded against a sandbox; reconfiguration replaces the
/// whole value, never merges into it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigResult {
    /// Interface names created inside the namespace.
    #[serde(default)]
    pub interfaces: Vec<String>,

    /// Assigned addresses (IPv4 or IPv6, CIDR notation).
    #[serde(default)]
    pub addresses: Vec<String>,

    /// Routes programmed inside the namespace.
    #[serde(default)]
    pub routes: Vec<Route>,
}

/// Read-only lifecycle report for external status collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateReport {
    /// Current lifecycle state.
    pub state: LifecycleState,

    /// Addresses recorded at configuration time (empty before `Active`).
    #[serde(default)]
    pub addresses: Vec<String>,

    /// Routes recorded at configuration time (empty before `Active`).
    #[serde(default)]
    pub routes: Vec<Route>,
}
