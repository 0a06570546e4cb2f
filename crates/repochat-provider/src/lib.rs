//! Language model abstraction for repochat.
//!
//! The agent loop talks to models through [`LanguageModel`], which streams
//! [`StreamChunk`]s for one request. Anthropic is the bundled backend.

pub mod anthropic;
pub mod error;
pub mod message;
pub mod model;
pub mod stream;

pub use anthropic::AnthropicProvider;
pub use error::{ProviderError, ProviderResult};
pub use message::{ContentPart, Message, Role};
pub use model::{ModelInfo, ModelLimit};
pub use stream::{FinishReason, StreamChunk, Usage};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::sync::Arc;

/// Environment variable holding the Anthropic API key.
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Options for text generation.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Temperature for sampling (0.0-1.0).
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// System prompt.
    pub system: Option<String>,
    /// Available tools.
    pub tools: Vec<ToolDefinition>,
    /// Cancellation token.
    pub abort: Option<tokio_util::sync::CancellationToken>,
}

/// A tool definition for the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// JSON Schema for the tool parameters.
    pub parameters: Value,
}

/// The main trait for language models.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a streaming response.
    async fn generate(
        &self,
        messages: Vec<Message>,
        options: GenerateOptions,
    ) -> ProviderResult<BoxStream<'static, ProviderResult<StreamChunk>>>;

    /// Get information about this model.
    fn model_info(&self) -> &ModelInfo;

    /// Get the provider ID (e.g., "anthropic").
    fn provider_id(&self) -> &str;
}

/// A boxed language model for dynamic dispatch.
pub type BoxedLanguageModel = Arc<dyn LanguageModel>;

/// Build a model for `provider_id`/`model_id`, reading credentials from the
/// environment.
pub fn create_model(provider_id: &str, model_id: &str) -> ProviderResult<BoxedLanguageModel> {
    match provider_id {
        "anthropic" => {
            let api_key = std::env::var(ANTHROPIC_API_KEY_ENV)
                .map_err(|_| ProviderError::missing_api_key("anthropic"))?;
            let model = model::anthropic::by_id(model_id);
            Ok(Arc::new(AnthropicProvider::new(&api_key, model)?))
        }
        other => Err(ProviderError::model_not_found(other, model_id)),
    }
}
