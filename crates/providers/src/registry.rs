//! Backend factory keyed by configuration.

use std::sync::Arc;

use rv_domain::config::{Config, ProviderKind};
use rv_domain::error::Result;

use crate::anthropic::AnthropicBackend;
use crate::bedrock::BedrockBackend;
use crate::traits::ChatBackend;

/// Build the configured chat backend.
pub fn create_backend(config: &Config) -> Result<Arc<dyn ChatBackend>> {
    match config.provider.default {
        ProviderKind::Anthropic => {
            let backend = AnthropicBackend::from_config(&config.provider.anthropic)?;
            tracing::info!(model = %config.provider.anthropic.model, "using anthropic backend");
            Ok(Arc::new(backend))
        }
        ProviderKind::Bedrock => {
            let backend = BedrockBackend::from_config(&config.provider.bedrock)?;
            tracing::info!(model = %config.provider.bedrock.model, "using bedrock backend");
            Ok(Arc::new(backend))
        }
    }
}

/// Model id the configured backend will bill against, for pricing.
pub fn configured_model(config: &Config) -> String {
    match config.provider.default {
        ProviderKind::Anthropic => config.provider.anthropic.model.clone(),
        ProviderKind::Bedrock => config.provider.bedrock.model.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bedrock_is_default_and_constructs_without_credentials() {
        // Token resolution is deferred to the first call.
        let config = Config::default();
        let backend = create_backend(&config).unwrap();
        assert_eq!(backend.provider_id(), "bedrock");
    }

    #[test]
    fn configured_model_follows_selection() {
        let mut config = Config::default();
        assert!(configured_model(&config).starts_with("us.anthropic."));
        config.provider.default = ProviderKind::Anthropic;
        assert_eq!(configured_model(&config), config.provider.anthropic.model);
    }
}
