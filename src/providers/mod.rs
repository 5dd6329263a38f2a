//! Provider module for AgentSmith
//!
//! This module contains the provider abstraction, the OpenAI-compatible
//! implementation used for every supported API family, and the streamed
//! tool-call accumulator.

pub mod accumulator;
pub mod base;
pub mod openai;

pub use accumulator::{ToolCallAccumulator, ToolCallFragment};
pub use base::{
    cut_thinking, validate_message_sequence, ApiType, CompletionRequest, Message, MessageOrigin,
    Model, Provider, ProviderConfig, ProviderInfo,
};
pub use openai::OpenAiProvider;

use crate::config::ProvidersConfig;
use crate::error::Result;
use std::sync::Arc;

/// Create a provider instance based on its configuration
///
/// # Arguments
///
/// * `config` - Persisted provider configuration
/// * `settings` - Settings shared by all providers
///
/// # Returns
///
/// Returns a shared provider instance; models are not loaded yet
///
/// # Errors
///
/// Returns error if the provider cannot be initialized
pub fn create_provider(
    config: ProviderConfig,
    settings: &ProvidersConfig,
) -> Result<Arc<dyn Provider>> {
    match config.api_type {
        ApiType::OpenAi
        | ApiType::Ollama
        | ApiType::LmStudio
        | ApiType::Mistral
        | ApiType::Google
        | ApiType::Anthropic
        | ApiType::OpenAiCompatible => Ok(Arc::new(OpenAiProvider::new(
            config,
            settings.models_timeout(),
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_provider_keeps_identity() {
        let config = ProviderConfig::new("local", "http://localhost:11434/v1", ApiType::Ollama);
        let id = config.id.clone();
        let provider = create_provider(config, &ProvidersConfig::default()).unwrap();
        assert_eq!(provider.id(), id);
        assert_eq!(provider.name(), "local");
        assert!(provider.models().is_empty());
        assert_eq!(provider.info().api_type, ApiType::Ollama);
    }
}
