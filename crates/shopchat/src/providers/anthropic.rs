use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use super::base::{Provider, ProviderEvent, ProviderStream, StopReason};
use super::configs::AnthropicProviderConfig;
use super::sse::sse_events;
use crate::formats::anthropic::create_request;
use crate::models::message::Message;
use crate::models::tool::Tool;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, config })
    }

    async fn post(&self, payload: Value) -> Result<reqwest::Response> {
        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let error_text = response.text().await.unwrap_or_default();
            Err(anyhow!("Request failed: {} - {}", status, error_text))
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ProviderStream> {
        let payload = create_request(
            &self.config.model,
            self.config.max_tokens,
            self.config.temperature,
            system,
            messages,
            tools,
        )?;

        let response = self.post(payload).await?;
        let mut events = sse_events(response.bytes_stream());

        Ok(Box::pin(async_stream::try_stream! {
            let mut decoder = StreamDecoder::default();
            while let Some(event) = events.next().await {
                let event = event?;
                let data: Value = serde_json::from_str(&event.data)?;
                for decoded in decoder.decode(&data)? {
                    yield decoded;
                }
                if decoder.finished {
                    break;
                }
            }
            if !decoder.finished {
                Err::<(), _>(anyhow!("Stream ended before message_stop"))?;
            }
        }))
    }
}

/// Maps Anthropic's index-addressed content blocks onto tool call ids
#[derive(Default)]
struct StreamDecoder {
    tool_blocks: HashMap<u64, String>,
    stop_reason: Option<StopReason>,
    finished: bool,
}

impl StreamDecoder {
    fn decode(&mut self, data: &Value) -> Result<Vec<ProviderEvent>> {
        let index = data["index"].as_u64().unwrap_or(0);

        let events = match data["type"].as_str().unwrap_or_default() {
            "content_block_start" => {
                let block = &data["content_block"];
                match block["type"].as_str().unwrap_or_default() {
                    "text" => match block["text"].as_str() {
                        Some(text) if !text.is_empty() => vec![ProviderEvent::text(text)],
                        _ => vec![],
                    },
                    "tool_use" => {
                        let id = block["id"]
                            .as_str()
                            .ok_or_else(|| anyhow!("tool_use block without id"))?;
                        let name = block["name"].as_str().unwrap_or_default();
                        self.tool_blocks.insert(index, id.to_string());
                        vec![ProviderEvent::tool_start(id, name)]
                    }
                    _ => vec![],
                }
            }
            "content_block_delta" => {
                let delta = &data["delta"];
                match delta["type"].as_str().unwrap_or_default() {
                    "text_delta" => {
                        vec![ProviderEvent::text(delta["text"].as_str().unwrap_or_default())]
                    }
                    "input_json_delta" => {
                        let id = self
                            .tool_blocks
                            .get(&index)
                            .ok_or_else(|| anyhow!("Argument delta for unknown block {}", index))?;
                        vec![ProviderEvent::tool_delta(
                            id.clone(),
                            delta["partial_json"].as_str().unwrap_or_default(),
                        )]
                    }
                    _ => vec![],
                }
            }
            "content_block_stop" => match self.tool_blocks.remove(&index) {
                Some(id) => vec![ProviderEvent::tool_end(id)],
                None => vec![],
            },
            "message_delta" => {
                if let Some(reason) = data["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(StopReason::parse(reason));
                }
                vec![]
            }
            "message_stop" => {
                self.finished = true;
                let stop_reason = self.stop_reason.take().unwrap_or(StopReason::EndTurn);
                vec![ProviderEvent::end(stop_reason)]
            }
            "error" => {
                return Err(anyhow!(
                    "Anthropic stream error: {} - {}",
                    data["error"]["type"].as_str().unwrap_or("unknown"),
                    data["error"]["message"].as_str().unwrap_or_default()
                ))
            }
            other => {
                tracing::trace!("Ignoring stream event {}", other);
                vec![]
            }
        };

        Ok(events)
    }
}
