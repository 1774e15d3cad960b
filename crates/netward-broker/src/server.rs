//! The access broker server.

use crate::fdpass;
use crate::wire::{self, ErrorCode, HandoffGrant, HandoffRefusal, HandoffRequest, HandoffResponse};
use dashmap::DashMap;
use netward_core::config::BrokerConfig;
use netward_core::{Result, SandboxId};
use netward_lifecycle::{LifecycleEvent, Registry, SandboxRecord};
use netward_netns::NetnsHandle;
use std::io::{BufRead, BufReader, Write};
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Cached descriptor together with the handle generation it came from.
///
/// A sandbox ID can be reused after a full teardown/create cycle; comparing
/// handle identity guarantees a cached descriptor is never served for a
/// namespace it does not reference.
struct CachedFd {
    handle: Arc<NetnsHandle>,
    fd: Arc<OwnedFd>,
}

/// Serves descriptor handoff requests on a local control channel.
///
/// The broker is a read-only registry consumer: it never transitions state
/// and never releases namespaces. Eligibility is decided against the
/// authoritative registry entry at request time, so a race between
/// "teardown started" and "handoff requested" resolves in favor of denial.
pub struct AccessBroker {
    registry: Arc<Registry>,
    config: BrokerConfig,
    sequence: AtomicU64,
    cache: DashMap<SandboxId, CachedFd>,
}

impl AccessBroker {
    /// Create a broker over a registry view.
    pub fn new(registry: Arc<Registry>, config: BrokerConfig) -> Arc<Self> {
        Arc::new(Self {
            registry,
            config,
            sequence: AtomicU64::new(1),
            cache: DashMap::new(),
        })
    }

    /// Bind the control-channel socket, replacing any stale socket file.
    pub fn bind(&self) -> Result<UnixListener> {
        let path = &self.config.socket_path;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed stale control socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let listener = UnixListener::bind(path)?;
        info!(path = %path.display(), "access broker listening");
        Ok(listener)
    }

    /// Accept and serve connections until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: UnixListener) -> Result<()> {
        loop {
            let (stream, _addr) = listener.accept().await?;
            let broker = self.clone();
            tokio::spawn(async move {
                if let Err(e) = broker.handle_connection(stream).await {
                    // Transport-level failures only; refusals were already
                    // answered explicitly.
                    debug!(error = %e, "handoff connection ended with error");
                }
            });
        }
    }

    /// Subscribe the broker's descriptor cache to lifecycle events.
    ///
    /// Invalidation is event-driven (manager publishes, broker reacts); the
    /// broker never polls the manager.
    pub fn watch_lifecycle(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<LifecycleEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let broker = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.invalidates_access() => {
                        let id = event.sandbox_id();
                        if broker.cache.remove(id).is_some() {
                            debug!(sandbox = %id, "dropped cached namespace descriptor");
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        // Missed invalidations are indistinguishable from
                        // stale entries; drop everything.
                        warn!(missed, "lifecycle events lagged; clearing descriptor cache");
                        broker.cache.clear();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn handle_connection(self: Arc<Self>, stream: tokio::net::UnixStream) -> Result<()> {
        // The descriptor transfer is a blocking sendmsg; handle the whole
        // exchange on the blocking pool with socket deadlines.
        let stream = stream.into_std()?;
        stream.set_nonblocking(false)?;
        let timeout = self.config.handoff_timeout();
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        tokio::task::spawn_blocking(move || self.handle_blocking(stream))
            .await
            .map_err(|e| netward_core::Error::Sys(format!("handoff task failed: {e}")))?
    }

    fn handle_blocking(&self, stream: StdUnixStream) -> Result<()> {
        let mut line = String::new();
        BufReader::new(&stream).read_line(&mut line)?;

        let request: HandoffRequest = match wire::decode_line(&line) {
            Ok(req) => req,
            Err(e) => {
                return self.refuse(
                    &stream,
                    ErrorCode::Denied,
                    format!("malformed request: {e}"),
                    None,
                );
            }
        };
        if !request.sandbox_id.is_valid() || request.operation.is_empty() {
            return self.refuse(
                &stream,
                ErrorCode::Denied,
                "empty or invalid sandbox id/operation".into(),
                None,
            );
        }

        // Authoritative state check at request time.
        let record = match self.registry.get(&request.sandbox_id) {
            None => {
                debug!(sandbox = %request.sandbox_id, "handoff refused: not found");
                return self.refuse(
                    &stream,
                    ErrorCode::NotFound,
                    format!("no namespace registered for {}", request.sandbox_id),
                    None,
                );
            }
            Some(record) if !record.state.is_active() => {
                debug!(
                    sandbox = %request.sandbox_id,
                    state = %record.state,
                    "handoff refused: not active"
                );
                return self.refuse(
                    &stream,
                    ErrorCode::NotReady,
                    format!("sandbox {} is {}", request.sandbox_id, record.state),
                    Some(record.state),
                );
            }
            Some(record) => record,
        };

        // An Active record whose pin cannot be opened means teardown is
        // racing us; the requester still gets an explicit refusal.
        let fd = match self.descriptor_for(&record) {
            Ok(fd) => fd,
            Err(e) => {
                warn!(
                    sandbox = %request.sandbox_id,
                    error = %e,
                    "handoff refused: namespace descriptor unavailable"
                );
                return self.refuse(
                    &stream,
                    ErrorCode::NotFound,
                    format!("namespace descriptor unavailable: {e}"),
                    None,
                );
            }
        };
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let grant = HandoffResponse::Granted(HandoffGrant {
            sequence,
            echo: request.operation.clone(),
        });
        let payload = wire::encode_line(&grant)?;
        if let Err(e) = fdpass::send_with_fd(&stream, &payload, fd.as_fd()) {
            // The channel stalled or closed mid-grant. A refusal is still
            // attempted so a live-but-slow peer hears a timeout instead of
            // silence; if the peer is gone this write fails too.
            let _ = self.refuse(
                &stream,
                ErrorCode::Timeout,
                format!("descriptor transfer failed: {e}"),
                None,
            );
            return Err(e);
        }

        info!(
            sandbox = %request.sandbox_id,
            operation = %request.operation,
            sequence,
            "namespace descriptor granted"
        );
        Ok(())
    }

    /// Reuse the cached descriptor for this record's handle, or open one.
    fn descriptor_for(&self, record: &SandboxRecord) -> Result<Arc<OwnedFd>> {
        if let Some(cached) = self.cache.get(&record.id) {
            if Arc::ptr_eq(&cached.handle, &record.handle) {
                return Ok(cached.fd.clone());
            }
        }
        let fd = Arc::new(record.handle.open()?);
        self.cache.insert(
            record.id.clone(),
            CachedFd {
                handle: record.handle.clone(),
                fd: fd.clone(),
            },
        );
        Ok(fd)
    }

    fn refuse(
        &self,
        stream: &StdUnixStream,
        code: ErrorCode,
        detail: String,
        state: Option<netward_core::LifecycleState>,
    ) -> Result<()> {
        let response = HandoffResponse::Refused(HandoffRefusal {
            code,
            detail,
            state,
        });
        let payload = wire::encode_line(&response)?;
        let mut stream = stream;
        stream.write_all(&payload)?;
        Ok(())
    }
}
