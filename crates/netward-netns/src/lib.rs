//! Network namespace mechanism for netward.
//!
//! This crate owns every direct interaction with the kernel's network
//! namespace facility (Linux only):
//!
//! - **Handles**: `NetnsHandle`, an owned reference to one namespace pinned
//!   on the filesystem; descriptors are derived copies, the handle itself
//!   never crosses an ownership boundary
//! - **Provisioning**: the `NetnsProvider` seam with the `HostNetns`
//!   implementation (unshare + bind-mount pin + loopback up)
//! - **Thread-affine execution**: `NetnsGuard` and `WorkerPool`, the only
//!   supported way to run code inside a foreign namespace
//!
//! `setns(2)` moves the *calling thread*, not the process. All namespace
//! switching therefore happens on dedicated `std::thread` workers that the
//! async runtime can never migrate.

pub mod handle;
pub mod iface;
pub mod provider;
pub mod worker;

pub use handle::NetnsHandle;
pub use provider::{HostNetns, NetnsProvider};
pub use worker::{NetnsGuard, WorkerPool};
