//! Current weather lookups against Open-Meteo, which needs no api key.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::errors::ToolError;
use crate::models::tool::Tool;
use crate::tools::ToolExecutor;

pub const GET_WEATHER: &str = "get_weather";
const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,weather_code,wind_speed_10m";

#[derive(Debug, Clone)]
pub struct WeatherConfig {
    pub geocoding_host: String,
    pub forecast_host: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            geocoding_host: "https://geocoding-api.open-meteo.com".to_string(),
            forecast_host: "https://api.open-meteo.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "celsius",
            TemperatureUnit::Fahrenheit => "fahrenheit",
        }
    }
}

#[derive(Debug, Deserialize)]
struct WeatherArgs {
    location: String,
    #[serde(default)]
    unit: TemperatureUnit,
}

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<Place>,
}

#[derive(Debug, Deserialize)]
struct Place {
    name: String,
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Default, Deserialize)]
struct CurrentWeather {
    #[serde(default)]
    temperature_2m: f64,
    #[serde(default)]
    relative_humidity_2m: f64,
    #[serde(default)]
    weather_code: u32,
    #[serde(default)]
    wind_speed_10m: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    current: CurrentWeather,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherReport {
    /// Name of the place the location resolved to
    pub location: String,
    pub temperature: f64,
    pub unit: TemperatureUnit,
    pub condition: &'static str,
    pub humidity: f64,
    pub wind_speed: f64,
}

/// Plain description of a WMO weather interpretation code
pub fn condition(code: u32) -> &'static str {
    match code {
        0 => "sunny",
        1..=3 => "partly cloudy",
        45 | 48 => "foggy",
        51 | 53 | 55 | 56 | 57 | 61 | 63 | 65 | 66 | 67 | 80 | 81 | 82 => "rainy",
        71 | 73 | 75 | 77 | 85 | 86 => "snowy",
        95 | 96 | 99 => "thunderstorm",
        _ => "cloudy",
    }
}

/// The `get_weather` tool: geocode the location, then read its current conditions
pub struct WeatherTool {
    client: Client,
    config: WeatherConfig,
}

impl WeatherTool {
    pub fn new(config: WeatherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, config })
    }

    async fn geocode(&self, location: &str) -> Result<Option<Place>> {
        let url = format!(
            "{}/v1/search",
            self.config.geocoding_host.trim_end_matches('/')
        );
        let response = self
            .client
            .get(&url)
            .query(&[("name", location), ("count", "1")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Geocoding error: {}", status));
        }

        let body: GeocodingResponse = response.json().await?;
        Ok(body.results.into_iter().next())
    }

    async fn current(&self, place: &Place, unit: TemperatureUnit) -> Result<CurrentWeather> {
        let url = format!(
            "{}/v1/forecast",
            self.config.forecast_host.trim_end_matches('/')
        );
        let response = self
            .client
            .get(&url)
            .query(&[
                ("latitude", place.latitude.to_string()),
                ("longitude", place.longitude.to_string()),
                ("current", CURRENT_FIELDS.to_string()),
                ("temperature_unit", unit.as_str().to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Forecast error: {} - {}", status, body));
        }

        let body: ForecastResponse = response.json().await?;
        Ok(body.current)
    }
}

#[async_trait]
impl ToolExecutor for WeatherTool {
    fn tool(&self) -> Tool {
        Tool::new(
            GET_WEATHER,
            "Get the current weather for a city. Returns temperature, condition, humidity, \
             and wind speed.",
            json!({
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "The city to get weather for (e.g., 'Tokyo', 'New York')"
                    },
                    "unit": {
                        "type": "string",
                        "enum": ["celsius", "fahrenheit"],
                        "description": "Temperature unit, either 'celsius' or 'fahrenheit'. Defaults to 'celsius'."
                    }
                },
                "required": ["location"]
            }),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: WeatherArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let location = args.location.trim();
        if location.is_empty() {
            return Err(ToolError::InvalidArguments("location must not be empty".into()));
        }

        let place = self
            .geocode(location)
            .await
            .map_err(|e| ToolError::ExecutionError(format!("Weather lookup failed: {}", e)))?
            .ok_or_else(|| ToolError::ExecutionError(format!("Location '{}' not found", location)))?;
        let current = self
            .current(&place, args.unit)
            .await
            .map_err(|e| ToolError::ExecutionError(format!("Weather lookup failed: {}", e)))?;

        let report = WeatherReport {
            location: place.name,
            temperature: current.temperature_2m,
            unit: args.unit,
            condition: condition(current.weather_code),
            humidity: current.relative_humidity_2m,
            wind_speed: current.wind_speed_10m,
        };
        tracing::info!(location = %report.location, condition = report.condition, "weather lookup complete");

        serde_json::to_value(report).map_err(|e| ToolError::ExecutionError(e.to_string()))
    }
}
