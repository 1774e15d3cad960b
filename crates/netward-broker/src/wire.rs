//! Control-channel wire types.
//!
//! Messages are newline-delimited JSON. A granted response rides in the
//! same `sendmsg` as the transferred descriptor, so a requester can never
//! observe a grant without its descriptor.

use netward_core::{Error, LifecycleState, SandboxId};
use serde::{Deserialize, Serialize};

/// Request for access to one sandbox's namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRequest {
    /// Sandbox whose namespace is wanted.
    pub sandbox_id: SandboxId,

    /// Why the descriptor is wanted; echoed back and logged for audit.
    pub operation: String,
}

/// Correlation message accompanying a transferred descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffGrant {
    /// Monotonically increasing per-broker sequence number.
    pub sequence: u64,

    /// Echo of the request's operation tag.
    pub echo: String,
}

/// Machine-readable refusal category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No registry entry for the sandbox.
    NotFound,

    /// Entry exists but its state is not `Active`.
    NotReady,

    /// The control channel stalled past its deadline; retryable.
    Timeout,

    /// Malformed or unauthorized request.
    Denied,
}

/// Explicit refusal; the broker never just drops a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRefusal {
    /// Refusal category.
    pub code: ErrorCode,

    /// Human-readable detail.
    pub detail: String,

    /// Lifecycle state observed at lookup time, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<LifecycleState>,
}

impl HandoffRefusal {
    /// Convert a refusal received off the wire into the caller-side error.
    pub fn into_error(self, id: &SandboxId) -> Error {
        match self.code {
            ErrorCode::NotFound => Error::NotFound(id.clone()),
            ErrorCode::NotReady => Error::NotReady {
                id: id.clone(),
                state: self.state.unwrap_or(LifecycleState::Pending),
            },
            ErrorCode::Timeout => Error::TransferFailure(self.detail),
            ErrorCode::Denied => Error::Denied(self.detail),
        }
    }
}

/// One response per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffResponse {
    /// Descriptor granted; arrives with ancillary data.
    Granted(HandoffGrant),

    /// Request refused; no descriptor attached.
    Refused(HandoffRefusal),
}

/// Serialize a message as one newline-terminated JSON line.
pub fn encode_line<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    Ok(line)
}

/// Parse one newline-terminated JSON line.
pub fn decode_line<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T, Error> {
    Ok(serde_json::from_str(line.trim_end())?)
}
