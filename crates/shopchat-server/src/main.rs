mod configuration;
mod error;
mod routes;
mod state;

use anyhow::Result;
use axum::http::HeaderValue;
use shopchat::{
    agent::Agent,
    marketplace::{ScrapingBeeSource, SearchProductsTool},
    providers::factory,
    tools::ToolRegistry,
    weather::WeatherTool,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(log_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn cors_layer(origins: &str) -> Result<CorsLayer> {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.trim() == "*" {
        return Ok(cors.allow_origin(Any));
    }

    let origins = origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(HeaderValue::from_str)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cors.allow_origin(AllowOrigin::list(origins)))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Load configuration
    let settings = configuration::Settings::new()?;
    init_tracing(&settings.server.log_level);

    let provider = factory::get_provider(settings.provider.into_config())?;

    let marketplace = settings.marketplace.into_config();
    if marketplace.api_key.is_none() {
        tracing::warn!("No marketplace api key configured, product searches will fail");
    }
    let default_limit = marketplace.default_limit;
    let source = Arc::new(ScrapingBeeSource::new(marketplace)?);
    let registry = ToolRegistry::new()
        .with_executor(Arc::new(SearchProductsTool::new(source, default_limit)))?
        .with_executor(Arc::new(WeatherTool::new(settings.weather.into_config())?))?;

    let agent = Agent::new(provider, registry, settings.agent.into_config());
    let state = state::AppState { agent };

    // Create router with CORS support
    let app = routes::configure(state)
        .layer(cors_layer(&settings.server.cors_origins)?)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(settings.server.socket_addr()?).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
