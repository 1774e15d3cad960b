//! The per-sandbox lifecycle state machine.

use crate::plugin::{NetworkPlugin, PluginOptions};
use crate::registry::{Registry, SandboxRecord};
use dashmap::DashMap;
use netward_core::config::PluginConfig;
use netward_core::{Error, LifecycleState, Result, SandboxId, StateReport};
use netward_netns::NetnsProvider;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Capacity of the lifecycle event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// State transition notification published by the manager.
///
/// Consumed by the access broker (cache invalidation) and by any other
/// collaborator interested in lifecycle progress. Delivery is one-way; the
/// manager never waits for subscribers.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// Namespace created, loopback up, not yet configured.
    Created(SandboxId),

    /// Plugin setup completed; handoffs now permitted.
    Active(SandboxId),

    /// Plugin setup failed; namespace retained for diagnostic teardown.
    Failed(SandboxId),

    /// Teardown started; handoffs for this sandbox must stop.
    TearingDown(SandboxId),

    /// Namespace released and registry entry erased.
    Removed(SandboxId),
}

impl LifecycleEvent {
    /// The sandbox this event concerns.
    pub fn sandbox_id(&self) -> &SandboxId {
        match self {
            Self::Created(id)
            | Self::Active(id)
            | Self::Failed(id)
            | Self::TearingDown(id)
            | Self::Removed(id) => id,
        }
    }

    /// Whether brokers must drop cached access for this sandbox.
    pub fn invalidates_access(&self) -> bool {
        matches!(
            self,
            Self::TearingDown(_) | Self::Removed(_) | Self::Failed(_)
        )
    }
}

/// How a teardown concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// Plugin removal succeeded; namespace released cleanly.
    Clean,

    /// Plugin removal kept failing; the namespace was force-released after
    /// `attempts` tries and the kernel resource may have leaked.
    Forced { attempts: u32 },
}

/// Drives each sandbox's namespace through its lifecycle.
///
/// Transitions are serialized per sandbox ID with `try_lock` guards:
/// a conflicting call observes [`Error::Busy`] instead of queueing, so
/// plugin invocations stay at-most-once per transition. Different IDs
/// progress fully in parallel, and no registry lock is ever held across a
/// plugin call.
pub struct LifecycleManager {
    registry: Arc<Registry>,
    provider: Arc<dyn NetnsProvider>,
    plugin: Arc<dyn NetworkPlugin>,
    config: PluginConfig,
    // Per-ID transition guards. Entries are kept for the process lifetime
    // so lock identity is stable across create/teardown cycles.
    locks: DashMap<SandboxId, Arc<tokio::sync::Mutex<()>>>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleManager {
    /// Create a manager over the given provider and plugin.
    pub fn new(
        provider: Arc<dyn NetnsProvider>,
        plugin: Arc<dyn NetworkPlugin>,
        config: PluginConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry: Arc::new(Registry::new()),
            provider,
            plugin,
            config,
            locks: DashMap::new(),
            events,
        }
    }

    /// Shared read-only view of the registry.
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    fn transition_guard(&self, id: &SandboxId) -> Result<tokio::sync::OwnedMutexGuard<()>> {
        let lock = self.locks.entry(id.clone()).or_default().clone();
        lock.try_lock_owned().map_err(|_| Error::Busy(id.clone()))
    }

    fn publish(&self, event: LifecycleEvent) {
        debug!(sandbox = %event.sandbox_id(), ?event, "lifecycle event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Create the namespace for `id` and bring loopback up.
    ///
    /// Fails with [`Error::Busy`] if a transition for `id` is in flight and
    /// [`Error::AlreadyExists`] if a live namespace is already registered.
    pub async fn create(&self, id: &SandboxId) -> Result<()> {
        let _guard = self.transition_guard(id)?;

        if self.registry.get(id).is_some() {
            return Err(Error::AlreadyExists(id.clone()));
        }

        // Namespace creation unshares and mounts on a scratch thread; keep
        // it off the async workers.
        let provider = self.provider.clone();
        let create_id = id.clone();
        let handle = tokio::task::spawn_blocking(move || provider.create(&create_id))
            .await
            .map_err(|e| Error::Sys(format!("namespace creation task failed: {e}")))??;

        self.registry.insert(SandboxRecord {
            id: id.clone(),
            handle: Arc::new(handle),
            state: LifecycleState::NamespaceCreated,
            result: None,
            workloads_stopped: false,
        });
        info!(sandbox = %id, "sandbox namespace created");
        self.publish(LifecycleEvent::Created(id.clone()));
        Ok(())
    }

    /// Run plugin setup against the namespace and promote to `Active`.
    ///
    /// Permitted from `NamespaceCreated` (first configuration) and `Active`
    /// (reconfiguration; the recorded result is replaced wholesale). On
    /// failure or deadline expiry the sandbox lands in `Failed`, with the
    /// namespace retained for diagnostic teardown.
    pub async fn configure(
        &self,
        id: &SandboxId,
        opts: PluginOptions,
    ) -> Result<netward_core::ConfigResult> {
        let _guard = self.transition_guard(id)?;

        let record = self
            .registry
            .get(id)
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        match record.state {
            LifecycleState::NamespaceCreated | LifecycleState::Active => {}
            state => {
                return Err(Error::NotReady {
                    id: id.clone(),
                    state,
                })
            }
        }

        self.registry
            .swap(id, |r| r.with_state(LifecycleState::Configuring));

        let netns_path = record.handle.path().to_path_buf();
        let deadline = self.config.setup_timeout();
        let call = self.plugin.setup(id, &netns_path, &opts);
        match timeout(deadline, call).await {
            Ok(Ok(result)) => {
                self.registry.swap(id, |r| r.with_config(result.clone()));
                info!(
                    sandbox = %id,
                    interfaces = ?result.interfaces,
                    addresses = ?result.addresses,
                    "sandbox network configured"
                );
                self.publish(LifecycleEvent::Active(id.clone()));
                Ok(result)
            }
            Ok(Err(e)) => {
                self.fail(id);
                Err(Error::plugin(id, "setup", e.to_string()))
            }
            Err(_) => {
                self.fail(id);
                Err(Error::plugin(
                    id,
                    "setup",
                    format!("deadline of {deadline:?} expired"),
                ))
            }
        }
    }

    fn fail(&self, id: &SandboxId) {
        self.registry
            .swap(id, |r| r.with_state(LifecycleState::Failed));
        warn!(sandbox = %id, "sandbox configuration failed; namespace retained");
        self.publish(LifecycleEvent::Failed(id.clone()));
    }

    /// Record the external acknowledgment that all workload processes in
    /// the sandbox have stopped. Required before teardown from `Active`.
    pub fn ack_workloads_stopped(&self, id: &SandboxId) -> Result<()> {
        self.registry
            .swap(id, |r| r.with_ack())
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        debug!(sandbox = %id, "workload stop acknowledged");
        Ok(())
    }

    /// Tear the sandbox down: plugin removal, then namespace release, then
    /// registry erasure, strictly in that order.
    ///
    /// From `Active` the workload-stop acknowledgment must have arrived.
    /// From `Failed` removal is best-effort and release proceeds regardless.
    /// Exhausted removal retries force the release and report
    /// [`TeardownOutcome::Forced`]; the registry never keeps a stuck entry.
    pub async fn teardown(&self, id: &SandboxId, opts: PluginOptions) -> Result<TeardownOutcome> {
        let _guard = self.transition_guard(id)?;

        let record = self
            .registry
            .get(id)
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        let best_effort = match record.state {
            LifecycleState::Active => {
                if !record.workloads_stopped {
                    return Err(Error::StopNotAcknowledged(id.clone()));
                }
                false
            }
            // Configuration never completed, no workloads were admitted.
            LifecycleState::Failed => true,
            state => {
                return Err(Error::NotReady {
                    id: id.clone(),
                    state,
                })
            }
        };

        self.registry
            .swap(id, |r| r.with_state(LifecycleState::TearingDown));
        self.publish(LifecycleEvent::TearingDown(id.clone()));

        // Plugin removal strictly precedes namespace release: releasing
        // first would strand routes and interfaces the plugin can no
        // longer reach.
        let outcome = self.remove_with_retries(id, &record, &opts, best_effort).await;

        let provider = self.provider.clone();
        let handle = record.handle.clone();
        let released = tokio::task::spawn_blocking(move || provider.release(&handle))
            .await
            .map_err(|e| Error::Sys(format!("namespace release task failed: {e}")))?;
        if let Err(e) = released {
            // The entry still goes away; a stuck pin is an operational
            // problem, not a registry one.
            error!(sandbox = %id, error = %e, "namespace release failed");
        }

        self.registry.remove(id);
        info!(sandbox = %id, ?outcome, "sandbox removed");
        self.publish(LifecycleEvent::Removed(id.clone()));
        Ok(outcome)
    }

    async fn remove_with_retries(
        &self,
        id: &SandboxId,
        record: &SandboxRecord,
        opts: &PluginOptions,
        best_effort: bool,
    ) -> TeardownOutcome {
        let attempts = if best_effort {
            1
        } else {
            self.config.remove_attempts.max(1)
        };
        let deadline = self.config.remove_timeout();
        let mut backoff = self.config.retry_backoff();
        let netns_path = record.handle.path();

        for attempt in 1..=attempts {
            match timeout(deadline, self.plugin.remove(id, netns_path, opts)).await {
                Ok(Ok(())) => return TeardownOutcome::Clean,
                Ok(Err(e)) => {
                    warn!(sandbox = %id, attempt, error = %e, "plugin remove failed");
                }
                Err(_) => {
                    warn!(sandbox = %id, attempt, ?deadline, "plugin remove timed out");
                }
            }
            if attempt < attempts {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        if best_effort {
            // Failed-state teardown releases regardless of plugin outcome.
            TeardownOutcome::Clean
        } else {
            let leak = Error::ResourceLeak {
                id: id.clone(),
                attempts,
            };
            error!(sandbox = %id, attempts, "{leak}");
            TeardownOutcome::Forced { attempts }
        }
    }

    /// Read-only lifecycle query for status collaborators.
    pub fn get_state(&self, id: &SandboxId) -> Result<StateReport> {
        self.registry
            .get(id)
            .map(|record| record.report())
            .ok_or_else(|| Error::NotFound(id.clone()))
    }
}
