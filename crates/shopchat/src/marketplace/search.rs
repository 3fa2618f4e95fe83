use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;

use super::price::{is_usd, parse_price};
use super::{product_columns, ListingSource, Product, ProductTable, RawListing};
use crate::errors::ToolError;
use crate::models::tool::Tool;
use crate::tools::ToolExecutor;

pub const SEARCH_PRODUCTS: &str = "search_products";
pub const MAX_LIMIT: usize = 50;
const MAX_NAME_CHARS: usize = 100;
/// Anchor texts that are page navigation rather than listings
const NAVIGATION_LABELS: &[&str] = &["詳細を見る", "もっと見る"];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceFilters {
    #[serde(default)]
    min_price: Option<i64>,
    #[serde(default)]
    max_price: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchArgs {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    min_price: Option<i64>,
    #[serde(default)]
    max_price: Option<i64>,
    #[serde(default)]
    filters: PriceFilters,
}

/// Inclusive price range in JPY
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriceBounds {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl PriceBounds {
    fn contains(&self, price: i64) -> bool {
        self.min.map_or(true, |min| price >= min) && self.max.map_or(true, |max| price <= max)
    }
}

/// The `search_products` tool
pub struct SearchProductsTool {
    source: Arc<dyn ListingSource>,
    default_limit: usize,
}

impl SearchProductsTool {
    pub fn new(source: Arc<dyn ListingSource>, default_limit: usize) -> Self {
        Self {
            source,
            default_limit: default_limit.clamp(1, MAX_LIMIT),
        }
    }
}

#[async_trait]
impl ToolExecutor for SearchProductsTool {
    fn tool(&self) -> Tool {
        Tool::new(
            SEARCH_PRODUCTS,
            "Search for products on Mercari Japan marketplace. Returns a table of listings \
             with name, price (JPY), condition, seller, and listing URL.",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search term for products (e.g., 'Nintendo Switch', 'iPhone 15')"
                    },
                    "limit": {
                        "type": "integer",
                        "description": format!("Maximum number of results to return. Defaults to {}.", self.default_limit),
                        "default": self.default_limit
                    },
                    "minPrice": {
                        "type": "integer",
                        "description": "Only include listings at or above this price in JPY"
                    },
                    "maxPrice": {
                        "type": "integer",
                        "description": "Only include listings at or below this price in JPY"
                    }
                },
                "required": ["query"]
            }),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: SearchArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let query = args.query.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidArguments("query must not be empty".into()));
        }
        let limit = args.limit.unwrap_or(self.default_limit).clamp(1, MAX_LIMIT);
        let bounds = PriceBounds {
            min: args.min_price.or(args.filters.min_price),
            max: args.max_price.or(args.filters.max_price),
        };

        let listings = self
            .source
            .search(query)
            .await
            .map_err(|e| ToolError::ExecutionError(format!("Search failed: {}", e)))?;

        let needs_rate = listings
            .iter()
            .any(|listing| listing.price.as_deref().is_some_and(is_usd));
        let rate = if needs_rate {
            self.source.usd_jpy_rate().await
        } else {
            super::DEFAULT_USD_JPY_RATE
        };

        let table = build_table(query, listings, self.source.site_host(), rate, bounds, limit);
        tracing::info!(query, rows = table.rows.len(), "product search complete");

        serde_json::to_value(table).map_err(|e| ToolError::ExecutionError(e.to_string()))
    }
}

pub fn surface_id(query: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(query.as_bytes()));
    format!("marketplace-search-{}", &digest[..8])
}

/// Normalize raw listings into the result table, in page order
pub fn build_table(
    query: &str,
    listings: Vec<RawListing>,
    site_host: &str,
    usd_to_jpy: f64,
    bounds: PriceBounds,
    limit: usize,
) -> ProductTable {
    let mut seen = HashSet::new();
    let mut rows = Vec::new();

    for listing in listings {
        if rows.len() >= limit {
            break;
        }

        let Some(id) = listing.href.as_deref().and_then(item_id) else {
            continue;
        };
        if seen.contains(&id) {
            continue;
        }
        seen.insert(id.clone());

        let name = listing
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .or_else(|| listing.label.as_deref().map(str::trim))
            .unwrap_or_default();
        if name.chars().count() < 3 || NAVIGATION_LABELS.contains(&name) {
            continue;
        }

        let price = listing
            .price
            .as_deref()
            .map(|text| parse_price(text.trim(), usd_to_jpy))
            .unwrap_or(0);
        if !bounds.contains(price) {
            continue;
        }

        rows.push(Product {
            url: format!("{}/item/{}", site_host.trim_end_matches('/'), id),
            id,
            name: name.chars().take(MAX_NAME_CHARS).collect(),
            price,
            condition: "-".to_string(),
            seller: "-".to_string(),
        });
    }

    ProductTable {
        surface_id: surface_id(query),
        columns: product_columns(),
        rows,
        row_id_key: "id".to_string(),
    }
}

fn item_id(href: &str) -> Option<String> {
    let (_, tail) = href.rsplit_once("/item/")?;
    let id = tail.split(['?', '#', '/']).next().unwrap_or_default();
    (!id.is_empty()).then(|| id.to_string())
}
