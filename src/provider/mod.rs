//! Language-model interface and the HTTP client behind it.
//!
//! The runtime only ever sees [`LanguageModel`]; concrete SDKs live behind
//! it. One OpenAI-compatible client ships here because every provider in
//! [`crate::model::KNOWN_PROVIDERS`] exposes that surface.

mod factory;
mod openai_compat;
mod types;

pub use factory::{EnvKeyStore, HttpModelFactory, KeyStore, ModelFactory};
pub use openai_compat::OpenAiCompatModel;
pub use types::{
    AssistantPart, Message, ModelResponse, ModelUsage, ToolCallRequest, ToolResultPart, ToolSpec,
    UserPart,
};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Missing API key for {provider}. Set {env_var}.")]
    MissingApiKey { provider: String, env_var: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),
}

/// A model the runtime can hold a conversation with.
#[async_trait]
pub trait LanguageModel: Send + Sync + std::fmt::Debug {
    /// Full `provider:model` identifier.
    fn id(&self) -> &str;

    async fn generate(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelResponse, ProviderError>;
}
