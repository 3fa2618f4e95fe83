use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

use super::{ListingSource, MarketplaceConfig, RawListing, DEFAULT_USD_JPY_RATE};

const ITEM_CELL: &str = r#"li[data-testid="item-cell"]"#;
const ITEM_LINK: &str = r#"a[href*="/item/"]"#;
const ITEM_NAME: &str = r#"[class*="itemName"], [class*="name"]"#;
const ITEM_PRICE: &str = "span.merPrice";
/// Milliseconds to let the page's javascript render listings
const RENDER_WAIT_MS: u32 = 3000;

/// Fetches search result pages through ScrapingBee, which renders the page and runs
/// the css extraction for us, so we only ever see JSON.
pub struct ScrapingBeeSource {
    client: Client,
    config: MarketplaceConfig,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    items: Vec<RawListing>,
}

impl ScrapingBeeSource {
    pub fn new(config: MarketplaceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self { client, config })
    }

    fn search_url(&self, query: &str) -> Result<Url> {
        let mut url = Url::parse(&self.config.site_host)?.join("/search")?;
        url.query_pairs_mut()
            .append_pair("keyword", query)
            .append_pair("status", "on_sale");
        Ok(url)
    }

    fn extract_rules() -> Value {
        json!({
            "items": {
                "selector": ITEM_CELL,
                "type": "list",
                "output": {
                    "href": {"selector": ITEM_LINK, "output": "@href"},
                    "name": ITEM_NAME,
                    "label": ITEM_LINK,
                    "price": ITEM_PRICE,
                }
            }
        })
    }
}

#[async_trait]
impl ListingSource for ScrapingBeeSource {
    async fn search(&self, query: &str) -> Result<Vec<RawListing>> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("Marketplace api key is not configured"))?;

        let url = format!(
            "{}/api/v1/",
            self.config.scraper_host.trim_end_matches('/')
        );
        let target = self.search_url(query)?;
        let wait = RENDER_WAIT_MS.to_string();
        let rules = Self::extract_rules().to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("api_key", api_key),
                ("url", target.as_str()),
                ("render_js", "true"),
                ("wait", wait.as_str()),
                ("extract_rules", rules.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("ScrapingBee error: {} - {}", status, body));
        }

        let extracted: ExtractResponse = response.json().await?;
        tracing::debug!(query, listings = extracted.items.len(), "fetched listings");
        Ok(extracted.items)
    }

    fn site_host(&self) -> &str {
        self.config.site_host.trim_end_matches('/')
    }

    async fn usd_jpy_rate(&self) -> f64 {
        let url = format!(
            "{}/v4/latest/USD",
            self.config.rates_host.trim_end_matches('/')
        );

        let rate = async {
            let response = self.client.get(&url).send().await?.error_for_status()?;
            let body: Value = response.json().await?;
            body["rates"]["JPY"]
                .as_f64()
                .ok_or_else(|| anyhow!("No JPY rate in response"))
        };

        match rate.await {
            Ok(rate) => rate,
            Err(e) => {
                tracing::warn!("Falling back to default USD/JPY rate: {}", e);
                DEFAULT_USD_JPY_RATE
            }
        }
    }
}
