//! Configuration management for repochat.
//!
//! Configuration is loaded from multiple sources and merged:
//! 1. Global config: `~/.config/repochat/config.json`
//! 2. Environment variable: `REPOCHAT_CONFIG_CONTENT`
//! 3. Project config: `repochat.jsonc` or `repochat.json` in the project directory
//! 4. Command-line overrides, merged by the caller
//!
//! Supports JSONC (JSON with comments) and variable substitution:
//! - `{env:VAR_NAME}` - Substitute environment variable
//! - `{file:path}` - Substitute file contents

use crate::agent::DEFAULT_MAX_STEPS;
use crate::error::{ConfigError, CoreResult};
use repochat_provider::model::anthropic::DEFAULT_MODEL;
use repochat_sandbox::SandboxConfig;
use repochat_storage::{JsonStorage, MemoryStorage, SharedStorage};
use repochat_util::log::LogLevel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// Environment variable holding inline configuration.
pub const CONFIG_CONTENT_ENV: &str = "REPOCHAT_CONFIG_CONTENT";

/// Default listen address for `repochat serve`.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:3000";

/// Default model provider.
pub const DEFAULT_PROVIDER: &str = "anthropic";

static VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

fn var_regex() -> &'static regex::Regex {
    VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\{(env|file):([^}]+)\}")
            .expect("Invalid regex pattern - this is a compile-time constant")
    })
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// JSON Schema reference.
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// HTTP server settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    /// Model provider id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Model id, or "provider/model".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Tool-loop iterations allowed per turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<usize>,

    /// Where runs and sandboxes are stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Sandbox settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxConfig>,

    /// Storage backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageKind>,

    /// Log level (debug, info, warn, error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// Server configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind, e.g. `127.0.0.1:3000`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Storage backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Process memory; runs do not survive a restart.
    Memory,
    /// One JSON file per key under the data directory.
    #[default]
    Json,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Returns the merged config and the files it was read from.
    pub async fn load(project_dir: Option<&Path>) -> CoreResult<(Self, Vec<PathBuf>)> {
        let mut config = Config::default();
        let mut sources = Vec::new();

        if let Some(global_dir) = Self::global_config_dir() {
            for name in &["config.json", "repochat.json", "repochat.jsonc"] {
                let path = global_dir.join(name);
                if path.exists() {
                    config = config.merge(Self::load_file(&path).await?);
                    sources.push(path);
                    break;
                }
            }
        }

        if let Ok(content) = std::env::var(CONFIG_CONTENT_ENV) {
            let content = Self::substitute_variables(&content, Path::new("."))?;
            config = config.merge(Self::parse_jsonc(&content, "<env>")?);
        }

        if let Some(dir) = project_dir {
            for name in &["repochat.jsonc", "repochat.json"] {
                let path = dir.join(name);
                if path.exists() {
                    config = config.merge(Self::load_file(&path).await?);
                    sources.push(path);
                    break;
                }
            }
        }

        Ok((config, sources))
    }

    /// Get the global config directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        repochat_util::path::config_dir()
    }

    /// Load configuration from a file.
    pub async fn load_file(path: &Path) -> CoreResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let content = Self::substitute_variables(&content, path)?;
        Self::parse_jsonc(&content, &path.display().to_string())
    }

    /// Save configuration to `{project_dir}/repochat.json`, or to the global
    /// config directory.
    pub async fn save(&self, project_dir: Option<&Path>) -> CoreResult<PathBuf> {
        let path = match project_dir {
            Some(dir) => dir.join("repochat.json"),
            None => {
                let global_dir = Self::global_config_dir().ok_or_else(|| {
                    ConfigError::InvalidPath("Could not determine config directory".to_string())
                })?;
                tokio::fs::create_dir_all(&global_dir).await?;
                global_dir.join("config.json")
            }
        };

        let content = serde_json::to_string_pretty(self).map_err(|e| ConfigError::InvalidJson {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        tokio::fs::write(&path, content).await?;
        tracing::info!("Saved configuration to {}", path.display());
        Ok(path)
    }

    fn parse_jsonc(content: &str, source: &str) -> CoreResult<Self> {
        let stripped = Self::strip_comments(content);

        serde_json::from_str(&stripped).map_err(|e| {
            ConfigError::InvalidJson {
                path: source.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Strip `//` and `/* */` comments outside string literals.
    fn strip_comments(input: &str) -> String {
        let mut result = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();
        let mut in_string = false;
        let mut escape_next = false;

        while let Some(c) = chars.next() {
            if escape_next {
                result.push(c);
                escape_next = false;
                continue;
            }

            if c == '\\' && in_string {
                result.push(c);
                escape_next = true;
                continue;
            }

            if c == '"' {
                in_string = !in_string;
                result.push(c);
                continue;
            }

            if in_string {
                result.push(c);
                continue;
            }

            if c == '/' {
                match chars.peek() {
                    Some('/') => {
                        chars.next();
                        for c in chars.by_ref() {
                            if c == '\n' {
                                result.push('\n');
                                break;
                            }
                        }
                        continue;
                    }
                    Some('*') => {
                        chars.next();
                        let mut prev = ' ';
                        for c in chars.by_ref() {
                            if prev == '*' && c == '/' {
                                break;
                            }
                            // Keep line numbers stable for parse errors.
                            if c == '\n' {
                                result.push('\n');
                            }
                            prev = c;
                        }
                        continue;
                    }
                    _ => {}
                }
            }

            result.push(c);
        }

        result
    }

    /// Replace `{env:NAME}` and `{file:path}` references.
    ///
    /// File paths are relative to the config file's directory.
    fn substitute_variables(content: &str, config_path: &Path) -> CoreResult<String> {
        let config_dir = config_path.parent().unwrap_or(Path::new("."));
        let mut result = content.to_string();

        for cap in var_regex().captures_iter(content) {
            let (Some(full_match), Some(kind), Some(value)) = (cap.get(0), cap.get(1), cap.get(2))
            else {
                continue;
            };

            let replacement = match kind.as_str() {
                "env" => std::env::var(value.as_str()).map_err(|_| ConfigError::EnvVarNotFound {
                    name: value.as_str().to_string(),
                })?,
                "file" => {
                    let file_path = config_dir.join(value.as_str());
                    std::fs::read_to_string(&file_path)
                        .map_err(|_| ConfigError::FileRefNotFound {
                            path: file_path.display().to_string(),
                        })?
                        .trim()
                        .to_string()
                }
                _ => continue,
            };

            result = result.replace(full_match.as_str(), &replacement);
        }

        Ok(result)
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(mut self, other: Self) -> Self {
        self.schema = merge_option(self.schema, other.schema);
        self.server = match (self.server, other.server) {
            (Some(base), Some(other)) => Some(ServerConfig {
                address: merge_option(base.address, other.address),
            }),
            (base, other) => merge_option(base, other),
        };
        self.provider = merge_option(self.provider, other.provider);
        self.model = merge_option(self.model, other.model);
        self.max_steps = merge_option(self.max_steps, other.max_steps);
        self.data_dir = merge_option(self.data_dir, other.data_dir);
        self.sandbox = match (self.sandbox, other.sandbox) {
            (Some(base), Some(other)) => Some(base.merge(other)),
            (base, other) => merge_option(base, other),
        };
        self.storage = merge_option(self.storage, other.storage);
        self.log_level = merge_option(self.log_level, other.log_level);
        self
    }

    /// Split "provider/model" into its parts.
    pub fn parse_model(model: &str) -> Option<(&str, &str)> {
        model.split_once('/')
    }

    pub fn address(&self) -> &str {
        self.server
            .as_ref()
            .and_then(|s| s.address.as_deref())
            .unwrap_or(DEFAULT_ADDRESS)
    }

    /// Provider and model ids to use.
    ///
    /// A "provider/model" value in `model` overrides `provider`.
    pub fn provider_and_model(&self) -> (String, String) {
        let provider = self.provider.as_deref().unwrap_or(DEFAULT_PROVIDER);
        match self.model.as_deref() {
            Some(model) => match Self::parse_model(model) {
                Some((provider, model)) => (provider.to_string(), model.to_string()),
                None => (provider.to_string(), model.to_string()),
            },
            None => (provider.to_string(), DEFAULT_MODEL.to_string()),
        }
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps.unwrap_or(DEFAULT_MAX_STEPS).max(1)
    }

    pub fn data_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .clone()
            .or_else(repochat_util::path::data_dir)
    }

    /// Sandbox settings, with the root placed under `dataDir` when set.
    pub fn sandbox_config(&self) -> SandboxConfig {
        let mut sandbox = self.sandbox.clone().unwrap_or_default();
        if sandbox.root.is_none() {
            sandbox.root = self.data_dir.as_ref().map(|d| d.join("sandboxes"));
        }
        sandbox
    }

    pub fn storage_kind(&self) -> StorageKind {
        self.storage.unwrap_or_default()
    }

    /// Open the configured storage backend.
    pub fn open_storage(&self) -> CoreResult<SharedStorage> {
        match self.storage_kind() {
            StorageKind::Memory => Ok(Arc::new(MemoryStorage::new())),
            StorageKind::Json => {
                let dir = self.data_dir().ok_or_else(|| {
                    ConfigError::InvalidPath("Could not determine data directory".to_string())
                })?;
                Ok(Arc::new(JsonStorage::new(dir.join("storage"))))
            }
        }
    }

    /// Parsed log level. Unknown values are ignored.
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level.as_deref().and_then(LogLevel::parse)
    }
}

/// Merge two Option values.
fn merge_option<T>(base: Option<T>, other: Option<T>) -> Option<T> {
    match (base, other) {
        (_, Some(o)) => Some(o),
        (b, None) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_comments() {
        let input = r#"{
            // Line comment
            "key": "value", // trailing comment
            /* block comment */
            "key2": "val/*not a comment*/ue",
            "url": "https://github.com/a/b"
        }"#;

        let result = Config::strip_comments(input);
        assert!(!result.contains("Line comment"));
        assert!(!result.contains("trailing comment"));
        assert!(!result.contains("block comment"));
        assert!(result.contains("val/*not a comment*/ue"));
        assert!(result.contains("https://github.com/a/b"));
    }

    #[test]
    fn test_parse_jsonc() {
        let input = r#"{
            // This is a comment
            "model": "anthropic/claude-sonnet-4-5",
            "maxSteps": 12,
            "storage": "memory",
            "server": { "address": "0.0.0.0:8080" },
            "sandbox": { "commandTimeoutSecs": 30 }
        }"#;

        let config = Config::parse_jsonc(input, "test").unwrap();
        assert_eq!(config.max_steps(), 12);
        assert_eq!(config.storage_kind(), StorageKind::Memory);
        assert_eq!(config.address(), "0.0.0.0:8080");
        assert_eq!(config.sandbox_config().command_timeout_secs, Some(30));
        assert_eq!(
            config.provider_and_model(),
            ("anthropic".to_string(), "claude-sonnet-4-5".to_string())
        );
    }

    #[test]
    fn test_invalid_json_names_source() {
        let err = Config::parse_jsonc("{ not json", "repochat.json").unwrap_err();
        assert!(err.to_string().contains("repochat.json"));
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.address(), DEFAULT_ADDRESS);
        assert_eq!(config.max_steps(), DEFAULT_MAX_STEPS);
        assert_eq!(config.storage_kind(), StorageKind::Json);
        assert_eq!(
            config.provider_and_model(),
            ("anthropic".to_string(), DEFAULT_MODEL.to_string())
        );
        assert_eq!(config.log_level(), None);
    }

    #[test]
    fn test_merge_config() {
        let base = Config {
            model: Some("claude-haiku-4-5-20251001".to_string()),
            max_steps: Some(10),
            sandbox: Some(SandboxConfig {
                vcpus: Some(4),
                ..Default::default()
            }),
            ..Default::default()
        };

        let other = Config {
            max_steps: Some(20),
            log_level: Some("debug".to_string()),
            sandbox: Some(SandboxConfig {
                workspace: Some("repo".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let merged = base.merge(other);
        assert_eq!(merged.max_steps, Some(20));
        assert_eq!(merged.model.as_deref(), Some("claude-haiku-4-5-20251001"));
        assert_eq!(merged.log_level(), Some(LogLevel::Debug));
        let sandbox = merged.sandbox_config();
        assert_eq!(sandbox.vcpus, Some(4));
        assert_eq!(sandbox.workspace(), "repo");
    }

    #[test]
    fn test_parse_model() {
        assert_eq!(
            Config::parse_model("anthropic/claude-sonnet-4-5"),
            Some(("anthropic", "claude-sonnet-4-5"))
        );
        assert_eq!(Config::parse_model("claude-sonnet-4-5"), None);
    }

    #[test]
    fn test_sandbox_root_follows_data_dir() {
        let config = Config {
            data_dir: Some(PathBuf::from("/srv/repochat")),
            ..Default::default()
        };
        assert_eq!(
            config.sandbox_config().root,
            Some(PathBuf::from("/srv/repochat/sandboxes"))
        );
    }

    #[test]
    fn test_substitute_file_reference() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.txt"), "claude-sonnet-4-5\n").unwrap();
        let config_path = dir.path().join("repochat.json");

        let content = Config::substitute_variables(r#"{"model": "{file:model.txt}"}"#, &config_path)
            .unwrap();
        assert_eq!(content, r#"{"model": "claude-sonnet-4-5"}"#);

        let err = Config::substitute_variables(r#"{"model": "{file:missing.txt}"}"#, &config_path)
            .unwrap_err();
        assert!(err.to_string().contains("missing.txt"));
    }

    #[test]
    fn test_missing_env_var() {
        let err = Config::substitute_variables(
            r#"{"model": "{env:REPOCHAT_TEST_SURELY_UNSET_VAR}"}"#,
            Path::new("repochat.json"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("REPOCHAT_TEST_SURELY_UNSET_VAR"));
    }

    #[tokio::test]
    async fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();

        let config = Config {
            model: Some("anthropic/claude-sonnet-4-5".to_string()),
            storage: Some(StorageKind::Memory),
            max_steps: Some(7),
            ..Default::default()
        };

        let path = config.save(Some(dir.path())).await.unwrap();
        assert_eq!(path, dir.path().join("repochat.json"));

        let loaded = Config::load_file(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_project_jsonc_preferred() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("repochat.jsonc"),
            "{ /* project */ \"maxSteps\": 3 }",
        )
        .await
        .unwrap();
        tokio::fs::write(dir.path().join("repochat.json"), "{ \"maxSteps\": 9 }")
            .await
            .unwrap();

        let loaded = Config::load_file(&dir.path().join("repochat.jsonc"))
            .await
            .unwrap();
        assert_eq!(loaded.max_steps(), 3);
    }
}
