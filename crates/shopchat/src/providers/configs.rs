use serde::{Deserialize, Serialize};

pub const DEFAULT_ANTHROPIC_HOST: &str = "https://api.anthropic.com";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-5-20250929";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

// Unified enum to wrap different provider configurations
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    Anthropic(AnthropicProviderConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl Default for AnthropicProviderConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_ANTHROPIC_HOST.to_string(),
            api_key: String::new(),
            model: DEFAULT_ANTHROPIC_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
        }
    }
}
