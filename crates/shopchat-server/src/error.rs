use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Environment variable that sets a required provider field
pub fn to_env_var(field: &str) -> String {
    let path = if field.contains('.') {
        field.to_string()
    } else {
        format!("provider.{}", field)
    };
    format!("SHOPCHAT_{}", path.replace('.', "__").to_uppercase())
}
