//! Model construction from `provider:model` identifiers.

use super::openai_compat::OpenAiCompatModel;
use super::{LanguageModel, ProviderError};
use crate::model::ModelId;
use std::sync::Arc;

/// Source of provider credentials.
pub trait KeyStore: Send + Sync {
    fn api_key(&self, provider: &str) -> Option<String>;
}

/// Reads keys from the conventional environment variables.
#[derive(Debug, Default)]
pub struct EnvKeyStore;

pub(crate) fn env_var_for(provider: &str) -> &'static str {
    match provider {
        "anthropic" => "ANTHROPIC_API_KEY",
        "openai" => "OPENAI_API_KEY",
        "google" => "GOOGLE_API_KEY",
        "openrouter" => "OPENROUTER_API_KEY",
        _ => "API_KEY",
    }
}

impl KeyStore for EnvKeyStore {
    fn api_key(&self, provider: &str) -> Option<String> {
        std::env::var(env_var_for(provider))
            .ok()
            .filter(|k| !k.is_empty())
    }
}

/// Builds a [`LanguageModel`] for a resolved identifier.
pub trait ModelFactory: Send + Sync {
    fn create(&self, id: &ModelId) -> Result<Arc<dyn LanguageModel>, ProviderError>;
}

/// Factory backed by the providers' OpenAI-compatible endpoints.
pub struct HttpModelFactory {
    keys: Arc<dyn KeyStore>,
}

impl HttpModelFactory {
    pub fn new(keys: Arc<dyn KeyStore>) -> Self {
        Self { keys }
    }

    fn base_url(provider: &str) -> &'static str {
        match provider {
            "anthropic" => "https://api.anthropic.com/v1",
            "openai" => "https://api.openai.com/v1",
            "google" => "https://generativelanguage.googleapis.com/v1beta/openai",
            _ => "https://openrouter.ai/api/v1",
        }
    }
}

impl Default for HttpModelFactory {
    fn default() -> Self {
        Self::new(Arc::new(EnvKeyStore))
    }
}

impl ModelFactory for HttpModelFactory {
    fn create(&self, id: &ModelId) -> Result<Arc<dyn LanguageModel>, ProviderError> {
        let api_key =
            self.keys
                .api_key(&id.provider)
                .ok_or_else(|| ProviderError::MissingApiKey {
                    provider: id.provider.clone(),
                    env_var: env_var_for(&id.provider).to_string(),
                })?;
        Ok(Arc::new(OpenAiCompatModel::new(
            Self::base_url(&id.provider).to_string(),
            api_key,
            id.model.clone(),
            id.to_string(),
        )))
    }
}
