//! Shared fakes and harness helpers for netward integration tests.

use async_trait::async_trait;
use netward_core::{ConfigResult, Error, Result, SandboxId};
use netward_lifecycle::{NetworkPlugin, PluginOptions};
use netward_netns::{NetnsHandle, NetnsProvider};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Initialize tracing once for every test binary; respects `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Lazy<()> = Lazy::new(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
    Lazy::force(&INIT);
}

/// Mint a unique sandbox ID so parallel tests never collide.
pub fn unique_id(prefix: &str) -> SandboxId {
    SandboxId::new(format!("{prefix}-{}", uuid::Uuid::new_v4().simple()))
}

/// Chronological trace of provider/plugin calls, shared across fakes.
pub type Trace = Arc<Mutex<Vec<String>>>;

/// Namespace provider backed by plain files; runs without privileges.
pub struct FakeNetns {
    dir: PathBuf,
    trace: Trace,
}

impl FakeNetns {
    pub fn new(dir: impl Into<PathBuf>, trace: Trace) -> Self {
        Self {
            dir: dir.into(),
            trace,
        }
    }
}

impl NetnsProvider for FakeNetns {
    fn create(&self, id: &SandboxId) -> Result<NetnsHandle> {
        let path = self.dir.join(id.as_str());
        std::fs::write(&path, b"")?;
        self.trace.lock().push(format!("create:{id}"));
        Ok(NetnsHandle::new(id.clone(), path))
    }

    fn release(&self, handle: &NetnsHandle) -> Result<()> {
        let _ = std::fs::remove_file(handle.path());
        self.trace.lock().push(format!("release:{}", handle.id()));
        Ok(())
    }
}

/// Plugin fake with a programmable result and failure injection.
pub struct MockPlugin {
    pub trace: Trace,
    pub result: ConfigResult,
    pub fail_setup: bool,
    pub failing_removes: u32,
    remove_calls: Mutex<u32>,
}

impl MockPlugin {
    pub fn new(trace: Trace) -> Self {
        Self {
            trace,
            result: ConfigResult {
                interfaces: vec!["eth0".into()],
                addresses: vec!["10.0.0.5/24".into()],
                routes: Vec::new(),
            },
            fail_setup: false,
            failing_removes: 0,
            remove_calls: Mutex::new(0),
        }
    }

    pub fn with_result(trace: Trace, result: ConfigResult) -> Self {
        Self {
            result,
            ..Self::new(trace)
        }
    }
}

#[async_trait]
impl NetworkPlugin for MockPlugin {
    async fn setup(
        &self,
        id: &SandboxId,
        _netns_path: &Path,
        _opts: &PluginOptions,
    ) -> Result<ConfigResult> {
        self.trace.lock().push(format!("setup:{id}"));
        if self.fail_setup {
            return Err(Error::Denied("injected setup failure".into()));
        }
        Ok(self.result.clone())
    }

    async fn remove(
        &self,
        id: &SandboxId,
        _netns_path: &Path,
        _opts: &PluginOptions,
    ) -> Result<()> {
        self.trace.lock().push(format!("remove:{id}"));
        let mut calls = self.remove_calls.lock();
        *calls += 1;
        if *calls <= self.failing_removes {
            return Err(Error::Denied("injected remove failure".into()));
        }
        Ok(())
    }
}
