use super::{anthropic::AnthropicProvider, base::Provider, configs::ProviderConfig};
use anyhow::Result;
use std::sync::Arc;

pub fn get_provider(config: ProviderConfig) -> Result<Arc<dyn Provider>> {
    match config {
        ProviderConfig::Anthropic(anthropic_config) => {
            Ok(Arc::new(AnthropicProvider::new(anthropic_config)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::configs::AnthropicProviderConfig;

    #[test]
    fn test_get_anthropic_provider() {
        let config = ProviderConfig::Anthropic(AnthropicProviderConfig {
            api_key: "key".to_string(),
            ..Default::default()
        });
        assert!(get_provider(config).is_ok());
    }
}
