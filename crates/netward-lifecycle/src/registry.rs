//! Process-lifetime registry of sandbox namespaces.

use dashmap::DashMap;
use netward_core::{ConfigResult, LifecycleState, SandboxId, StateReport};
use netward_netns::NetnsHandle;
use std::sync::Arc;

/// One sandbox's registry snapshot.
///
/// Records are immutable: every transition builds a new record and swaps it
/// in atomically, so readers never observe a half-updated entry.
#[derive(Debug)]
pub struct SandboxRecord {
    /// Sandbox this record belongs to.
    pub id: SandboxId,

    /// The namespace handle. Exclusively owned by the lifecycle manager;
    /// readers only derive descriptors from it.
    pub handle: Arc<NetnsHandle>,

    /// Current lifecycle state.
    pub state: LifecycleState,

    /// Last recorded configuration result, if any.
    pub result: Option<ConfigResult>,

    /// Whether the external workload-stop acknowledgment has arrived.
    pub workloads_stopped: bool,
}

impl SandboxRecord {
    /// Snapshot with a different state, everything else carried over.
    pub(crate) fn with_state(&self, state: LifecycleState) -> Self {
        Self {
            id: self.id.clone(),
            handle: self.handle.clone(),
            state,
            result: self.result.clone(),
            workloads_stopped: self.workloads_stopped,
        }
    }

    /// Snapshot recording a fresh configuration result (wholesale replace)
    /// and promoting the sandbox to `Active`.
    pub(crate) fn with_config(&self, result: ConfigResult) -> Self {
        Self {
            id: self.id.clone(),
            handle: self.handle.clone(),
            state: LifecycleState::Active,
            result: Some(result),
            workloads_stopped: self.workloads_stopped,
        }
    }

    /// Snapshot with the workload-stop acknowledgment set.
    pub(crate) fn with_ack(&self) -> Self {
        Self {
            id: self.id.clone(),
            handle: self.handle.clone(),
            state: self.state,
            result: self.result.clone(),
            workloads_stopped: true,
        }
    }

    /// Read-only report for status collaborators.
    pub fn report(&self) -> StateReport {
        StateReport {
            state: self.state,
            addresses: self
                .result
                .as_ref()
                .map(|r| r.addresses.clone())
                .unwrap_or_default(),
            routes: self
                .result
                .as_ref()
                .map(|r| r.routes.clone())
                .unwrap_or_default(),
        }
    }
}

/// Mapping from sandbox ID to its current record.
///
/// Lookups are lock-free and read-mostly. All writes come from the
/// lifecycle manager; an entry appears only after namespace creation
/// succeeded, so readers never see a half-initialized handle.
#[derive(Default)]
pub struct Registry {
    entries: DashMap<SandboxId, Arc<SandboxRecord>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the current record for `id`.
    pub fn get(&self, id: &SandboxId) -> Option<Arc<SandboxRecord>> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn insert(&self, record: SandboxRecord) {
        self.entries.insert(record.id.clone(), Arc::new(record));
    }

    /// Atomically replace the record for `id` with `f(current)`.
    pub(crate) fn swap(
        &self,
        id: &SandboxId,
        f: impl FnOnce(&SandboxRecord) -> SandboxRecord,
    ) -> Option<Arc<SandboxRecord>> {
        let mut entry = self.entries.get_mut(id)?;
        let next = Arc::new(f(entry.value()));
        *entry.value_mut() = next.clone();
        Some(next)
    }

    pub(crate) fn remove(&self, id: &SandboxId) {
        self.entries.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, state: LifecycleState) -> SandboxRecord {
        let id = SandboxId::new(id);
        SandboxRecord {
            handle: Arc::new(NetnsHandle::new(id.clone(), format!("/tmp/{id}"))),
            id,
            state,
            result: None,
            workloads_stopped: false,
        }
    }

    #[test]
    fn test_swap_replaces_snapshot_atomically() {
        let registry = Registry::new();
        registry.insert(record("pod-1", LifecycleState::NamespaceCreated));

        let before = registry.get(&SandboxId::new("pod-1")).unwrap();
        let after = registry
            .swap(&SandboxId::new("pod-1"), |r| {
                r.with_config(ConfigResult {
                    addresses: vec!["10.0.0.5/24".into()],
                    ..Default::default()
                })
            })
            .unwrap();

        // old snapshot untouched, new one swapped in
        assert_eq!(before.state, LifecycleState::NamespaceCreated);
        assert!(before.result.is_none());
        assert_eq!(after.state, LifecycleState::Active);
        assert_eq!(after.report().addresses, vec!["10.0.0.5/24".to_string()]);
    }

    #[test]
    fn test_swap_missing_entry_is_none() {
        let registry = Registry::new();
        assert!(registry
            .swap(&SandboxId::new("ghost"), |r| r
                .with_state(LifecycleState::Active))
            .is_none());
    }

    #[test]
    fn test_report_before_configuration_is_empty() {
        let rec = record("pod-1", LifecycleState::NamespaceCreated);
        let report = rec.report();
        assert_eq!(report.state, LifecycleState::NamespaceCreated);
        assert!(report.addresses.is_empty());
        assert!(report.routes.is_empty());
    }
}
