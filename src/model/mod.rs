//! Model identifiers and worker compatibility checks.
//!
//! A model is addressed as `provider:model`. Workers may restrict the models
//! they run on with a `compatible_models` list of glob patterns.

use std::fmt;
use thiserror::Error;

/// Providers the factory knows how to construct clients for.
pub const KNOWN_PROVIDERS: [&str; 4] = ["anthropic", "openai", "google", "openrouter"];

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid model identifier '{0}': expected provider:model")]
    InvalidFormat(String),

    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("Model '{model}' is not compatible with this worker (allowed: {patterns:?})")]
    Incompatible {
        model: String,
        patterns: Vec<String>,
    },

    #[error("compatible_models must not be empty")]
    EmptyCompatibleModels,

    #[error("No model configured and no default available")]
    NoModel,
}

/// A parsed `provider:model` identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelId {
    pub provider: String,
    pub model: String,
}

impl ModelId {
    /// Split on the first colon. Both sides must be non-empty and the
    /// provider must be one of [`KNOWN_PROVIDERS`].
    pub fn parse(id: &str) -> Result<Self, ModelError> {
        let (provider, model) = id
            .split_once(':')
            .ok_or_else(|| ModelError::InvalidFormat(id.to_string()))?;
        if provider.is_empty() || model.is_empty() {
            return Err(ModelError::InvalidFormat(id.to_string()));
        }
        if !KNOWN_PROVIDERS.contains(&provider) {
            return Err(ModelError::UnknownProvider(provider.to_string()));
        }
        Ok(Self {
            provider: provider.to_string(),
            model: model.to_string(),
        })
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// Glob-match a full model id against a pattern.
///
/// `*` matches any run of characters; every other character is literal.
/// The pattern is anchored at both ends, so `openai:gpt-4.5` matches the
/// literal pattern but `openai:gpt-4x5` does not.
#[must_use]
pub fn match_model_pattern(id: &str, pattern: &str) -> bool {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for ch in pattern.chars() {
        if ch == '*' {
            re.push_str(".*");
        } else {
            re.push_str(&regex::escape(&ch.to_string()));
        }
    }
    re.push('$');
    regex::Regex::new(&re).map(|r| r.is_match(id)).unwrap_or(false)
}

/// Validate a resolved model against a worker's allow-list.
///
/// `None` means unrestricted. An explicitly empty list is a configuration
/// error, not "deny all".
pub fn check_compatibility(
    compatible_models: Option<&[String]>,
    id: &ModelId,
) -> Result<(), ModelError> {
    let Some(patterns) = compatible_models else {
        return Ok(());
    };
    if patterns.is_empty() {
        return Err(ModelError::EmptyCompatibleModels);
    }
    let full = id.to_string();
    if patterns.iter().any(|p| match_model_pattern(&full, p)) {
        Ok(())
    } else {
        Err(ModelError::Incompatible {
            model: full,
            patterns: patterns.to_vec(),
        })
    }
}
