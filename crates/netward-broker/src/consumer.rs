//! High-level namespace consumer.

use crate::client::BrokerClient;
use netward_core::config::ConsumerConfig;
use netward_core::{Result, SandboxId};
use netward_netns::WorkerPool;
use std::time::Duration;
use tracing::debug;

/// Runs bounded units of work inside sandbox namespaces it does not own.
///
/// Each call acquires a descriptor from the broker, enters the namespace on
/// a pinned worker (namespace switches are thread-scoped; see
/// [`netward_netns::worker`]), executes the closure, restores the worker's
/// original namespace, and closes the local descriptor copy.
pub struct NetnsConsumer {
    client: BrokerClient,
    pool: WorkerPool,
    budget: Duration,
}

impl NetnsConsumer {
    /// Create a consumer over a broker client.
    pub fn new(client: BrokerClient, config: &ConsumerConfig) -> Self {
        Self {
            client,
            pool: WorkerPool::new(config.max_idle_workers),
            budget: config.work_budget(),
        }
    }

    /// Execute `work` inside the namespace of sandbox `id`.
    ///
    /// `operation` is the audit tag sent to the broker. The work unit is
    /// bounded by the configured budget; on overrun the pinned worker is
    /// retired and [`netward_core::Error::Timeout`] is returned.
    pub fn with_namespace<T, F>(&self, id: &SandboxId, operation: &str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let access = self.client.request(id, operation)?;
        debug!(
            sandbox = %id,
            operation,
            sequence = access.sequence,
            "entering sandbox namespace"
        );
        let outcome = self.pool.run_in_netns(access.as_fd(), self.budget, work);
        // access drops here, closing the locally-held descriptor copy
        outcome
    }
}
