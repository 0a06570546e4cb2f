//! Model information types.

use serde::{Deserialize, Serialize};

/// Information about a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModelInfo {
    /// Model ID (e.g., "claude-haiku-4-5-20251001").
    pub id: String,
    /// Provider ID (e.g., "anthropic").
    pub provider_id: String,
    /// Human-readable name.
    pub name: String,
    /// Token limits.
    pub limit: ModelLimit,
}

impl ModelInfo {
    /// Create model info with default limits.
    pub fn new(id: impl Into<String>, provider_id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            provider_id: provider_id.into(),
            limit: ModelLimit::default(),
        }
    }
}

/// Model token limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelLimit {
    /// Maximum context length (input + output).
    pub context: u32,
    /// Maximum output tokens.
    pub output: u32,
}

impl Default for ModelLimit {
    fn default() -> Self {
        Self {
            context: 200_000,
            output: 8_192,
        }
    }
}

/// Anthropic model catalogue.
pub mod anthropic {
    use super::*;

    /// Default model for code analysis conversations.
    pub const DEFAULT_MODEL: &str = "claude-haiku-4-5-20251001";

    pub fn claude_haiku_4_5() -> ModelInfo {
        ModelInfo {
            id: "claude-haiku-4-5-20251001".to_string(),
            provider_id: "anthropic".to_string(),
            name: "Claude Haiku 4.5".to_string(),
            limit: ModelLimit {
                context: 200_000,
                output: 64_000,
            },
        }
    }

    pub fn claude_sonnet_4_5() -> ModelInfo {
        ModelInfo {
            id: "claude-sonnet-4-5-20250929".to_string(),
            provider_id: "anthropic".to_string(),
            name: "Claude Sonnet 4.5".to_string(),
            limit: ModelLimit {
                context: 200_000,
                output: 64_000,
            },
        }
    }

    /// Look up a known model, falling back to default limits for unknown IDs.
    pub fn by_id(id: &str) -> ModelInfo {
        [claude_haiku_4_5(), claude_sonnet_4_5()]
            .into_iter()
            .find(|m| m.id == id)
            .unwrap_or_else(|| ModelInfo::new(id, "anthropic"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_by_id_known_model() {
        let model = anthropic::by_id(anthropic::DEFAULT_MODEL);
        assert_eq!(model.name, "Claude Haiku 4.5");
        assert_eq!(model.limit.output, 64_000);
    }

    #[test]
    fn test_by_id_unknown_model_uses_defaults() {
        let model = anthropic::by_id("claude-custom");
        assert_eq!(model.id, "claude-custom");
        assert_eq!(model.provider_id, "anthropic");
        assert_eq!(model.limit, ModelLimit::default());
    }
}
