//! Namespace provisioning.
//!
//! `NetnsProvider` is the seam between the lifecycle state machine and the
//! kernel. The production implementation is [`HostNetns`]; tests substitute
//! a filesystem-backed fake so the state machine runs unprivileged.

use crate::handle::NetnsHandle;
use crate::iface;
use netward_core::{Error, Result, SandboxId};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sched::{unshare, CloneFlags};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Creates and releases pinned network namespaces.
///
/// Implementations must be idempotent on `release`: releasing a namespace
/// whose pin is already gone succeeds trivially.
pub trait NetnsProvider: Send + Sync {
    /// Create a namespace for `id`, pin it, and bring loopback up.
    fn create(&self, id: &SandboxId) -> Result<NetnsHandle>;

    /// Release the kernel resource behind `handle`.
    fn release(&self, handle: &NetnsHandle) -> Result<()>;
}

/// Production provider backed by the host kernel.
///
/// Creation follows the `ip netns add` sequence: a scratch OS thread calls
/// `unshare(CLONE_NEWNET)`, bind-mounts its own `/proc/thread-self/ns/net`
/// onto `<dir>/<id>`, and brings loopback up while still inside the new
/// namespace. When the scratch thread exits, the bind mount alone keeps the
/// namespace alive. Requires `CAP_SYS_ADMIN` and `CAP_NET_ADMIN`.
pub struct HostNetns {
    dir: PathBuf,
}

impl HostNetns {
    /// Create a provider pinning namespaces under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn pin_path(&self, id: &SandboxId) -> PathBuf {
        self.dir.join(id.as_str())
    }
}

impl NetnsProvider for HostNetns {
    fn create(&self, id: &SandboxId) -> Result<NetnsHandle> {
        if !id.is_valid() {
            return Err(Error::Denied(format!("invalid sandbox id: {id:?}")));
        }

        fs::create_dir_all(&self.dir)?;
        let pin = self.pin_path(id);

        // The mount point must exist before the bind mount; create_new also
        // rejects a second create racing the first.
        match OpenOptions::new().write(true).create_new(true).open(&pin) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::AlreadyExists(id.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        let target = pin.clone();
        let thread = std::thread::Builder::new()
            .name(format!("netns-create-{id}"))
            .spawn(move || -> Result<()> {
                // Only this scratch thread switches namespace; the rest of
                // the process is unaffected.
                unshare(CloneFlags::CLONE_NEWNET)
                    .map_err(|e| Error::sys("unshare(CLONE_NEWNET)", e))?;
                mount(
                    Some("/proc/thread-self/ns/net"),
                    &target,
                    None::<&str>,
                    MsFlags::MS_BIND,
                    None::<&str>,
                )
                .map_err(|e| Error::sys("bind-mount netns pin", e))?;
                iface::set_link_up("lo")
            })?;

        let outcome = thread
            .join()
            .unwrap_or_else(|_| Err(Error::Sys("netns creation thread panicked".into())));

        if let Err(e) = outcome {
            // Roll back the pin so a retry starts clean.
            let _ = umount2(&pin, MntFlags::MNT_DETACH);
            let _ = fs::remove_file(&pin);
            return Err(e);
        }

        info!(sandbox = %id, pin = %pin.display(), "network namespace created");
        Ok(NetnsHandle::new(id.clone(), pin))
    }

    fn release(&self, handle: &NetnsHandle) -> Result<()> {
        let pin = handle.path();

        match umount2(pin, MntFlags::MNT_DETACH) {
            Ok(()) => {}
            // Not mounted or already gone: release is idempotent.
            Err(nix::errno::Errno::EINVAL) | Err(nix::errno::Errno::ENOENT) => {
                debug!(sandbox = %handle.id(), "netns pin already unmounted");
            }
            Err(e) => return Err(Error::sys("umount netns pin", e)),
        }

        match fs::remove_file(pin) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(sandbox = %handle.id(), error = %e, "failed to unlink netns pin");
                return Err(e.into());
            }
        }

        info!(sandbox = %handle.id(), "network namespace released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Uid;

    fn root() -> bool {
        Uid::effective().is_root()
    }

    #[test]
    fn test_create_rejects_invalid_id() {
        let provider = HostNetns::new("/tmp/netward-test-invalid");
        let err = provider.create(&SandboxId::new("../escape")).unwrap_err();
        assert!(matches!(err, Error::Denied(_)));
    }

    #[test]
    fn test_create_and_release_roundtrip() {
        if !root() {
            eprintln!("skipping: requires root");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let provider = HostNetns::new(dir.path());
        let id = SandboxId::new("prov-roundtrip");

        let handle = provider.create(&id).unwrap();
        assert!(handle.path().exists());
        // descriptor derivable while pinned
        let fd = handle.open().unwrap();
        drop(fd);

        // a second create for the same id is rejected while the pin lives
        assert!(matches!(
            provider.create(&id).unwrap_err(),
            Error::AlreadyExists(_)
        ));

        provider.release(&handle).unwrap();
        assert!(!handle.path().exists());
        // idempotent
        provider.release(&handle).unwrap();
    }
}
