//! Client side of the handoff protocol.

use crate::fdpass;
use crate::wire::{self, HandoffRequest, HandoffResponse};
use netward_core::config::BrokerConfig;
use netward_core::{Error, Result, SandboxId};
use std::io::Write;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

/// Requests namespace descriptors from an access broker.
///
/// The API is blocking; cooperating processes typically call it from the
/// thread that will hand the descriptor to a pinned worker. Inside an async
/// runtime, wrap calls in `spawn_blocking`.
pub struct BrokerClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl BrokerClient {
    /// Create a client for the broker at `socket_path`.
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    /// Create a client from a broker configuration section.
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self::new(&config.socket_path, config.handoff_timeout())
    }

    /// Request a descriptor for `id`, tagging the request with `operation`.
    ///
    /// Transport-level failures and deadline expiries surface as retryable
    /// [`Error::TransferFailure`]; refusals map to their lifecycle errors.
    pub fn request(&self, id: &SandboxId, operation: &str) -> Result<NetnsAccess> {
        let stream = UnixStream::connect(&self.socket_path)
            .map_err(|e| Error::TransferFailure(format!("connect broker: {e}")))?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let request = HandoffRequest {
            sandbox_id: id.clone(),
            operation: operation.to_string(),
        };
        let line = wire::encode_line(&request)?;
        (&stream)
            .write_all(&line)
            .map_err(|e| Error::TransferFailure(format!("send request: {e}")))?;

        // The response is one JSON line; the descriptor may arrive with any
        // segment of it. Keep whichever segment carried ancillary data.
        let mut buf = Vec::new();
        let mut fd: Option<OwnedFd> = None;
        let mut chunk = [0u8; 4096];
        loop {
            let (n, received) = fdpass::recv_with_fd(&stream, &mut chunk)?;
            if let Some(received) = received {
                fd = Some(received);
            }
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.contains(&b'\n') {
                break;
            }
        }
        if buf.is_empty() {
            return Err(Error::TransferFailure(
                "broker closed the channel without responding".into(),
            ));
        }

        let text = std::str::from_utf8(&buf)
            .map_err(|e| Error::TransferFailure(format!("non-UTF8 response: {e}")))?;
        match wire::decode_line::<HandoffResponse>(text)? {
            HandoffResponse::Granted(grant) => {
                let fd = fd.ok_or_else(|| {
                    Error::TransferFailure("granted reply carried no descriptor".into())
                })?;
                Ok(NetnsAccess {
                    fd,
                    sequence: grant.sequence,
                    operation: grant.echo,
                })
            }
            HandoffResponse::Refused(refusal) => Err(refusal.into_error(id)),
        }
    }
}

/// A transferred namespace descriptor plus its correlation data.
///
/// Holds the locally-owned copy of the descriptor; dropping the value
/// closes it. The broker's copy and other requesters' copies are unaffected.
#[derive(Debug)]
pub struct NetnsAccess {
    fd: OwnedFd,
    /// Broker-assigned sequence number, for audit/log correlation.
    pub sequence: u64,
    /// Operation tag echoed by the broker.
    pub operation: String,
}

impl NetnsAccess {
    /// Borrow the namespace descriptor.
    pub fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    /// Take ownership of the descriptor.
    pub fn into_fd(self) -> OwnedFd {
        self.fd
    }
}
