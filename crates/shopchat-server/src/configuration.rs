use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment};
use serde::Deserialize;
use shopchat::{
    agent::{AgentConfig, ArgumentPolicy, DEFAULT_SYSTEM_PROMPT},
    marketplace::MarketplaceConfig,
    providers::configs::{
        AnthropicProviderConfig, ProviderConfig, DEFAULT_ANTHROPIC_HOST, DEFAULT_ANTHROPIC_MODEL,
        DEFAULT_MAX_TOKENS,
    },
    weather::WeatherConfig,
};
use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Comma separated list of allowed origins, or `*`
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
            log_level: default_log_level(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    Anthropic {
        #[serde(default = "default_anthropic_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_model")]
        model: String,
        #[serde(default = "default_max_tokens")]
        max_tokens: u32,
        #[serde(default)]
        temperature: Option<f32>,
    },
}

impl ProviderSettings {
    // Convert to the shopchat ProviderConfig
    pub fn into_config(self) -> ProviderConfig {
        match self {
            ProviderSettings::Anthropic {
                host,
                api_key,
                model,
                max_tokens,
                temperature,
            } => ProviderConfig::Anthropic(AnthropicProviderConfig {
                host,
                api_key,
                model,
                max_tokens,
                temperature,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default = "default_round_timeout_secs")]
    pub round_timeout_secs: u64,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub argument_policy: ArgumentPolicy,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            round_timeout_secs: default_round_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            system_prompt: None,
            argument_policy: ArgumentPolicy::default(),
        }
    }
}

impl AgentSettings {
    pub fn into_config(self) -> AgentConfig {
        AgentConfig {
            max_rounds: self.max_rounds,
            round_timeout: Duration::from_secs(self.round_timeout_secs),
            tool_timeout: Duration::from_secs(self.tool_timeout_secs),
            argument_policy: self.argument_policy,
            system_prompt: self
                .system_prompt
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MarketplaceSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_scraper_host")]
    pub scraper_host: String,
    #[serde(default = "default_site_host")]
    pub site_host: String,
    #[serde(default = "default_rates_host")]
    pub rates_host: String,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for MarketplaceSettings {
    fn default() -> Self {
        let defaults = MarketplaceConfig::default();
        Self {
            api_key: None,
            scraper_host: defaults.scraper_host,
            site_host: defaults.site_host,
            rates_host: defaults.rates_host,
            default_limit: defaults.default_limit,
        }
    }
}

impl MarketplaceSettings {
    pub fn into_config(self) -> MarketplaceConfig {
        MarketplaceConfig {
            api_key: self.api_key.filter(|key| !key.is_empty()),
            scraper_host: self.scraper_host,
            site_host: self.site_host,
            rates_host: self.rates_host,
            default_limit: self.default_limit,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WeatherSettings {
    #[serde(default = "default_geocoding_host")]
    pub geocoding_host: String,
    #[serde(default = "default_forecast_host")]
    pub forecast_host: String,
}

impl Default for WeatherSettings {
    fn default() -> Self {
        let defaults = WeatherConfig::default();
        Self {
            geocoding_host: defaults.geocoding_host,
            forecast_host: defaults.forecast_host,
        }
    }
}

impl WeatherSettings {
    pub fn into_config(self) -> WeatherConfig {
        WeatherConfig {
            geocoding_host: self.geocoding_host,
            forecast_host: self.forecast_host,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub marketplace: MarketplaceSettings,
    #[serde(default)]
    pub weather: WeatherSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        // Start with default configuration
        let config = Config::builder()
            // Server defaults
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            // Provider defaults
            .set_default("provider.type", "anthropic")?
            .set_default("provider.host", default_anthropic_host())?
            .set_default("provider.model", default_model())?
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("SHOPCHAT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        // Try to deserialize the configuration
        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        // Handle missing field errors specially
        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                // Handle both NotFound and missing field message variants
                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    // Extract field name from error message "missing field `api_key`"
                    let field = error_str
                        .split('`')
                        .nth(1)
                        .unwrap_or_default();
                    let env_var = to_env_var(field);
                    Err(ConfigError::MissingEnvVar { env_var })
                } else if let config::ConfigError::NotFound(field) = &err {
                    let env_var = to_env_var(field);
                    Err(ConfigError::MissingEnvVar { env_var })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8001
}

fn default_cors_origins() -> String {
    "*".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_anthropic_host() -> String {
    DEFAULT_ANTHROPIC_HOST.to_string()
}

fn default_model() -> String {
    DEFAULT_ANTHROPIC_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_max_rounds() -> usize {
    AgentConfig::default().max_rounds
}

fn default_round_timeout_secs() -> u64 {
    AgentConfig::default().round_timeout.as_secs()
}

fn default_tool_timeout_secs() -> u64 {
    AgentConfig::default().tool_timeout.as_secs()
}

fn default_scraper_host() -> String {
    MarketplaceConfig::default().scraper_host
}

fn default_site_host() -> String {
    MarketplaceConfig::default().site_host
}

fn default_rates_host() -> String {
    MarketplaceConfig::default().rates_host
}

fn default_limit() -> usize {
    MarketplaceConfig::default().default_limit
}

fn default_geocoding_host() -> String {
    WeatherConfig::default().geocoding_host
}

fn default_forecast_host() -> String {
    WeatherConfig::default().forecast_host
}
