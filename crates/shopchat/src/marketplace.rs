//! Product search against an external second-hand marketplace.
//!
//! Fetching listings is delegated to a [`ListingSource`]; everything after that (dedup,
//! price parsing and currency conversion, filtering, table layout) happens in
//! [`search::SearchProductsTool`].
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub mod price;
pub mod scrapingbee;
pub mod search;

pub use scrapingbee::ScrapingBeeSource;
pub use search::SearchProductsTool;

/// Used whenever a live USD to JPY rate is unavailable
pub const DEFAULT_USD_JPY_RATE: f64 = 150.0;

/// A listing as extracted from a search results page, before normalization
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawListing {
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Full anchor text, used when no dedicated name element was found
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
}

#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Raw listings currently on sale for `query`, in page order
    async fn search(&self, query: &str) -> anyhow::Result<Vec<RawListing>>;

    /// Base url of the listing pages, item urls are `{site}/item/{id}`
    fn site_host(&self) -> &str;

    async fn usd_jpy_rate(&self) -> f64 {
        DEFAULT_USD_JPY_RATE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    /// Price in JPY
    pub price: i64,
    pub condition: String,
    pub seller: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub key: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Value>,
}

impl Column {
    pub fn new(key: &str, label: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            priority: None,
            format: None,
        }
    }

    pub fn with_priority(mut self, priority: &str) -> Self {
        self.priority = Some(priority.to_string());
        self
    }

    pub fn with_format(mut self, format: Value) -> Self {
        self.format = Some(format);
        self
    }
}

/// Tabular tool result rendered by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductTable {
    pub surface_id: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Product>,
    pub row_id_key: String,
}

pub fn product_columns() -> Vec<Column> {
    vec![
        Column::new("name", "Product").with_priority("primary"),
        Column::new("price", "Price").with_format(json!({"kind": "currency", "currency": "JPY"})),
        Column::new("condition", "Condition"),
        Column::new("seller", "Seller"),
        Column::new("url", "Link").with_format(json!({"kind": "link"})),
    ]
}

/// Settings for the marketplace search tool
#[derive(Debug, Clone)]
pub struct MarketplaceConfig {
    /// ScrapingBee api key; searches fail until it is set
    pub api_key: Option<String>,
    pub scraper_host: String,
    pub site_host: String,
    pub rates_host: String,
    pub default_limit: usize,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            scraper_host: "https://app.scrapingbee.com".to_string(),
            site_host: "https://jp.mercari.com".to_string(),
            rates_host: "https://api.exchangerate-api.com".to_string(),
            default_limit: 10,
        }
    }
}
