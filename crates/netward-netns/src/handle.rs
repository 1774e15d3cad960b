//! Owned references to pinned network namespaces.

use chrono::{DateTime, Utc};
use netward_core::{Result, SandboxId};
use std::fs::OpenOptions;
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// An owned reference to one kernel network namespace.
///
/// The namespace is kept alive by a bind mount at `path`, independent of
/// any process or thread that entered it. The handle is exclusively owned
/// by the lifecycle manager; other components only ever hold descriptors
/// derived via [`NetnsHandle::open`], each with its own lifetime.
#[derive(Debug)]
pub struct NetnsHandle {
    id: SandboxId,
    path: PathBuf,
    created_at: DateTime<Utc>,
}

impl NetnsHandle {
    /// Create a handle for a namespace pinned at `path`.
    pub fn new(id: SandboxId, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            path: path.into(),
            created_at: Utc::now(),
        }
    }

    /// Sandbox this namespace belongs to.
    pub fn id(&self) -> &SandboxId {
        &self.id
    }

    /// Pinned backing path of the namespace.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When the namespace was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Open a fresh descriptor referencing the namespace.
    ///
    /// Each call returns an independent `OwnedFd`; closing one copy never
    /// affects another, and copies transferred to other processes outlive
    /// this handle.
    pub fn open(&self) -> Result<OwnedFd> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(&self.path)?;
        Ok(file.into())
    }
}
