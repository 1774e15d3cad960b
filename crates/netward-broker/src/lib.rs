//! Descriptor handoff for netward.
//!
//! Cooperating, unprivileged processes need a way to operate inside a
//! sandbox's network namespace without a shared filesystem mount. The
//! broker listens on a local control channel and, for sandboxes whose
//! lifecycle state is `Active`, transfers a namespace descriptor to the
//! requester over `SCM_RIGHTS` ancillary data. The numeric descriptor value
//! is process-local; what crosses the boundary is the kernel resource
//! reference itself.
//!
//! - **Server**: [`AccessBroker`], authoritative registry lookup at request
//!   time, explicit denial responses, event-driven cache invalidation
//! - **Wire**: newline-delimited JSON request/response types
//! - **Client**: [`BrokerClient`] and [`NetnsConsumer`], which enter the
//!   received namespace on a pinned worker and restore it afterwards

pub mod client;
pub mod consumer;
pub mod fdpass;
pub mod server;
pub mod wire;

pub use client::{BrokerClient, NetnsAccess};
pub use consumer::NetnsConsumer;
pub use server::AccessBroker;
