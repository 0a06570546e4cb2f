//! Host-process sandboxes.
//!
//! Each sandbox is a directory `<root>/<id>` holding a `sandbox.json`
//! metadata file and the workspace directory commands run in. There is no
//! isolation beyond the working directory.

use crate::{
    config::SandboxConfig,
    error::{SandboxError, SandboxResult},
    Sandbox, SandboxHandle, SandboxOutput, SandboxProvider,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use repochat_util::{IdPrefix, Identifier};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const METADATA_FILE: &str = "sandbox.json";

/// Persisted facts about a sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SandboxMetadata {
    id: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    vcpus: u32,
}

/// Provider that runs sandbox commands as host processes.
pub struct LocalSandboxProvider {
    root: PathBuf,
    config: SandboxConfig,
}

impl LocalSandboxProvider {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            root: config.root(),
            config,
        }
    }

    /// Directory holding every sandbox.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn sandbox_dir(&self, id: &str) -> SandboxResult<PathBuf> {
        // Identifiers become directory names.
        if !Identifier::has_prefix(id, IdPrefix::Sandbox)
            || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(SandboxError::NotFound(id.to_string()));
        }
        Ok(self.root.join(id))
    }

    fn handle(&self, id: String, dir: &Path) -> SandboxHandle {
        Arc::new(LocalSandbox {
            id,
            workdir: dir.join(self.config.workspace()),
            timeout: self.config.command_timeout(),
        })
    }
}

#[async_trait]
impl SandboxProvider for LocalSandboxProvider {
    async fn create(&self) -> SandboxResult<SandboxHandle> {
        let id = Identifier::sandbox();
        let dir = self.root.join(&id);

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SandboxError::CreateFailed(e.to_string()))?;

        let now = Utc::now();
        let lifetime = chrono::Duration::from_std(self.config.lifetime())
            .map_err(|e| SandboxError::CreateFailed(e.to_string()))?;
        let metadata = SandboxMetadata {
            id: id.clone(),
            created_at: now,
            expires_at: now + lifetime,
            vcpus: self.config.vcpus(),
        };
        tokio::fs::write(
            dir.join(METADATA_FILE),
            serde_json::to_vec_pretty(&metadata)?,
        )
        .await?;

        // Lay out the workspace from inside the sandbox.
        let bootstrap = LocalSandbox {
            id: id.clone(),
            workdir: dir.clone(),
            timeout: self.config.command_timeout(),
        };
        let output = bootstrap
            .run_command(&format!("mkdir -p {}", self.config.workspace()))
            .await?;
        if !output.success {
            return Err(SandboxError::CreateFailed(output.combined()));
        }

        info!(
            sandbox_id = %id,
            vcpus = metadata.vcpus,
            expires_at = %metadata.expires_at,
            "Sandbox created"
        );

        Ok(self.handle(id, &dir))
    }

    async fn get(&self, id: &str) -> SandboxResult<SandboxHandle> {
        let dir = self.sandbox_dir(id)?;
        let raw = match tokio::fs::read(dir.join(METADATA_FILE)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SandboxError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let metadata: SandboxMetadata = serde_json::from_slice(&raw)?;

        if metadata.expires_at <= Utc::now() {
            warn!(sandbox_id = %id, "Sandbox expired, removing");
            self.stop(id).await?;
            return Err(SandboxError::Expired(id.to_string()));
        }

        debug!(sandbox_id = %id, "Reconnected to sandbox");
        Ok(self.handle(metadata.id, &dir))
    }

    async fn stop(&self, id: &str) -> SandboxResult<()> {
        let dir = self.sandbox_dir(id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(sandbox_id = %id, "Sandbox stopped");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// A sandbox directory on the host.
pub struct LocalSandbox {
    id: String,
    workdir: PathBuf,
    timeout: Duration,
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run_command(&self, command: &str) -> SandboxResult<SandboxOutput> {
        debug!(sandbox_id = %self.id, command = %command, "Running sandbox command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .env("TERM", "dumb")
            .env("NO_COLOR", "1")
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| SandboxError::Timeout(self.timeout))?
            .map_err(|e| SandboxError::ExecFailed(e.to_string()))?;

        Ok(SandboxOutput::from_output(
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
            output.status.code().unwrap_or(-1),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn provider(dir: &TempDir) -> LocalSandboxProvider {
        LocalSandboxProvider::new(SandboxConfig {
            root: Some(dir.path().to_path_buf()),
            command_timeout_secs: Some(5),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_create_prepares_workspace() {
        let dir = TempDir::new().unwrap();
        let provider = provider(&dir);

        let sandbox = provider.create().await.unwrap();
        assert!(Identifier::has_prefix(sandbox.id(), IdPrefix::Sandbox));
        assert!(dir.path().join(sandbox.id()).join("workspace").is_dir());

        let output = sandbox.run_command("pwd").await.unwrap();
        assert!(output.success);
        assert!(output.stdout.trim_end().ends_with("workspace"));
    }

    #[tokio::test]
    async fn test_reconnect_sees_same_files() {
        let dir = TempDir::new().unwrap();
        let provider = provider(&dir);

        let first = provider.create().await.unwrap();
        first.run_command("echo hi > note.txt").await.unwrap();

        let again = provider.get(first.id()).await.unwrap();
        let output = again.run_command("cat note.txt").await.unwrap();
        assert_eq!(output.stdout, "hi\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let sandbox = provider(&dir).create().await.unwrap();

        let output = sandbox.run_command("echo oops >&2; exit 3").await.unwrap();
        assert!(!output.success);
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_command_environment() {
        let dir = TempDir::new().unwrap();
        let sandbox = provider(&dir).create().await.unwrap();

        let output = sandbox
            .run_command("echo $TERM $NO_COLOR $GIT_TERMINAL_PROMPT")
            .await
            .unwrap();
        assert_eq!(output.stdout, "dumb 1 0\n");
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let dir = TempDir::new().unwrap();
        let provider = LocalSandboxProvider::new(SandboxConfig {
            root: Some(dir.path().to_path_buf()),
            command_timeout_secs: Some(1),
            ..Default::default()
        });
        let sandbox = provider.create().await.unwrap();

        let err = sandbox.run_command("sleep 5").await.unwrap_err();
        assert!(matches!(err, SandboxError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_get_unknown_and_stopped() {
        let dir = TempDir::new().unwrap();
        let provider = provider(&dir);

        let err = provider.get("sbx_missing").await.err().unwrap();
        assert!(err.is_unavailable());

        let err = provider.get("../etc").await.err().unwrap();
        assert!(matches!(err, SandboxError::NotFound(_)));

        let sandbox = provider.create().await.unwrap();
        let id = sandbox.id().to_string();
        provider.stop(&id).await.unwrap();
        assert!(provider.get(&id).await.is_err());
        provider.stop(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_sandbox_is_removed() {
        let dir = TempDir::new().unwrap();
        let provider = LocalSandboxProvider::new(SandboxConfig {
            root: Some(dir.path().to_path_buf()),
            lifetime_secs: Some(0),
            ..Default::default()
        });
        let sandbox = provider.create().await.unwrap();
        let id = sandbox.id().to_string();

        let err = provider.get(&id).await.err().unwrap();
        assert!(matches!(err, SandboxError::Expired(_)));
        assert!(!dir.path().join(&id).exists());
    }
}
