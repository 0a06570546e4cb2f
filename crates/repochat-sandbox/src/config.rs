//! Sandbox settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Directory created inside every sandbox; commands run from here.
pub const DEFAULT_WORKSPACE: &str = "workspace";

const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 120;
const DEFAULT_LIFETIME_SECS: u64 = 20 * 60;
const DEFAULT_VCPUS: u32 = 2;

/// Sandbox configuration. Unset fields fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SandboxConfig {
    /// Directory holding one subdirectory per sandbox.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Workspace directory name inside each sandbox.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,

    /// Per-command timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout_secs: Option<u64>,

    /// How long a sandbox stays usable after creation, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifetime_secs: Option<u64>,

    /// Virtual CPUs requested for each sandbox.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vcpus: Option<u32>,
}

impl SandboxConfig {
    pub fn root(&self) -> PathBuf {
        self.root
            .clone()
            .or_else(|| repochat_util::path::data_dir().map(|p| p.join("sandboxes")))
            .unwrap_or_else(|| std::env::temp_dir().join("repochat-sandboxes"))
    }

    pub fn workspace(&self) -> &str {
        self.workspace.as_deref().unwrap_or(DEFAULT_WORKSPACE)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(
            self.command_timeout_secs
                .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS),
        )
    }

    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_secs.unwrap_or(DEFAULT_LIFETIME_SECS))
    }

    pub fn vcpus(&self) -> u32 {
        self.vcpus.unwrap_or(DEFAULT_VCPUS)
    }

    /// Merge with another config (other takes precedence).
    pub fn merge(self, other: Self) -> Self {
        Self {
            root: other.root.or(self.root),
            workspace: other.workspace.or(self.workspace),
            command_timeout_secs: other.command_timeout_secs.or(self.command_timeout_secs),
            lifetime_secs: other.lifetime_secs.or(self.lifetime_secs),
            vcpus: other.vcpus.or(self.vcpus),
        }
    }
}
