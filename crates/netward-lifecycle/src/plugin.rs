//! Contract with external network configuration plugins.

use async_trait::async_trait;
use netward_core::{ConfigResult, Result, SandboxId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Options forwarded to the plugin on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginOptions {
    /// Interface name the plugin should create inside the namespace.
    pub ifname: String,

    /// Free-form plugin arguments.
    #[serde(default)]
    pub args: HashMap<String, String>,
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            ifname: "eth0".to_string(),
            args: HashMap::new(),
        }
    }
}

/// External network configuration plugin.
///
/// Both operations must be idempotent from the manager's perspective: a
/// repeated `setup` on an already-configured namespace may be a no-op
/// success or a hard error but must never duplicate resources, and a
/// repeated `remove` on an already-removed namespace must succeed
/// trivially. How the plugin process is actually executed is outside this
/// crate; implementations adapt that protocol to this trait.
#[async_trait]
pub trait NetworkPlugin: Send + Sync {
    /// Configure networking inside the namespace at `netns_path`.
    async fn setup(
        &self,
        id: &SandboxId,
        netns_path: &Path,
        opts: &PluginOptions,
    ) -> Result<ConfigResult>;

    /// Tear down networking inside the namespace at `netns_path`.
    async fn remove(&self, id: &SandboxId, netns_path: &Path, opts: &PluginOptions) -> Result<()>;
}

/// Plugin that configures nothing.
///
/// Useful for sandboxes that only need an isolated loopback, and as the
/// neutral adapter in tests.
pub struct NoopPlugin;

#[async_trait]
impl NetworkPlugin for NoopPlugin {
    async fn setup(
        &self,
        id: &SandboxId,
        _netns_path: &Path,
        _opts: &PluginOptions,
    ) -> Result<ConfigResult> {
        tracing::debug!(sandbox = %id, "noop plugin setup");
        Ok(ConfigResult {
            interfaces: vec!["lo".to_string()],
            addresses: Vec::new(),
            routes: Vec::new(),
        })
    }

    async fn remove(
        &self,
        id: &SandboxId,
        _netns_path: &Path,
        _opts: &PluginOptions,
    ) -> Result<()> {
        tracing::debug!(sandbox = %id, "noop plugin remove");
        Ok(())
    }
}
