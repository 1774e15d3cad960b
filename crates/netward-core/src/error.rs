//! Error types for netward.

use crate::types::{LifecycleState, SandboxId};
use std::path::PathBuf;
use thiserror::Error;

/// Core result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for netward operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A plugin `setup`/`remove` call returned an error or timed out.
    #[error("Plugin {operation} failed for sandbox {id}: {detail}")]
    PluginFailure {
        id: SandboxId,
        operation: &'static str,
        detail: String,
    },

    /// A conflicting transition is already in flight for this sandbox.
    /// The caller must retry later; transitions are never queued.
    #[error("Sandbox {0} has a transition in flight")]
    Busy(SandboxId),

    /// A live namespace already exists for this sandbox.
    #[error("Sandbox {0} already has a live namespace")]
    AlreadyExists(SandboxId),

    /// No registry entry exists for this sandbox.
    #[error("Sandbox {0} not found")]
    NotFound(SandboxId),

    /// The sandbox exists but is not in the state the operation requires.
    #[error("Sandbox {id} is {state}, not ready")]
    NotReady {
        id: SandboxId,
        state: LifecycleState,
    },

    /// Teardown requested before the workload-stop acknowledgment.
    #[error("Sandbox {0}: workloads not acknowledged as stopped")]
    StopNotAcknowledged(SandboxId),

    /// Namespace released forcibly after exhausted teardown retries; the
    /// kernel resource may have leaked. Logged as an operational alert.
    #[error("Sandbox {id}: namespace force-released after {attempts} failed remove attempts")]
    ResourceLeak { id: SandboxId, attempts: u32 },

    /// Descriptor send/receive failed at the control-channel layer.
    /// Retryable from the requester's point of view.
    #[error("Descriptor transfer failed: {0}")]
    TransferFailure(String),

    /// A bounded operation exceeded its deadline.
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The broker denied a malformed or unauthorized request.
    #[error("Request denied: {0}")]
    Denied(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Raw system call failure.
    #[error("System call failed: {0}")]
    Sys(String),
}

impl Error {
    /// Create a plugin failure error.
    pub fn plugin(id: &SandboxId, operation: &'static str, detail: impl Into<String>) -> Self {
        Self::PluginFailure {
            id: id.clone(),
            operation,
            detail: detail.into(),
        }
    }

    /// Create a raw system call error with context.
    pub fn sys(context: &str, errno: nix::errno::Errno) -> Self {
        Self::Sys(format!("{context}: {errno}"))
    }

    /// Whether the caller may retry the same operation unchanged.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Busy(_) | Self::TransferFailure(_) | Self::Timeout(_)
        )
    }
}

impl From<nix::errno::Errno> for Error {
    fn from(errno: nix::errno::Errno) -> Self {
        Self::Sys(errno.to_string())
    }
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON5 parse error: {0}")]
    Json5(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        let busy = Error::Busy(SandboxId::new("pod-1"));
        assert!(busy.is_retriable());

        let transfer = Error::TransferFailure("saturated channel".into());
        assert!(transfer.is_retriable());

        let not_found = Error::NotFound(SandboxId::new("pod-1"));
        assert!(!not_found.is_retriable());

        let leak = Error::ResourceLeak {
            id: SandboxId::new("pod-1"),
            attempts: 3,
        };
        assert!(!leak.is_retriable());
    }

    #[test]
    fn test_not_ready_message_names_state() {
        let err = Error::NotReady {
            id: SandboxId::new("pod-1"),
            state: LifecycleState::Configuring,
        };
        let msg = err.to_string();
        assert!(msg.contains("pod-1"));
        assert!(msg.contains("configuring"));
    }
}
