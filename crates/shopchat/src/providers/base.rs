use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::models::message::Message;
use crate::models::tool::Tool;

/// Why the model stopped producing output for a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    Other(String),
}

impl StopReason {
    pub fn parse(reason: &str) -> Self {
        match reason {
            "end_turn" => StopReason::EndTurn,
            "tool_use" => StopReason::ToolUse,
            "max_tokens" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            other => StopReason::Other(other.to_string()),
        }
    }
}

/// One incremental fragment of a model response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProviderEvent {
    TextDelta { text: String },
    ToolCallStart { id: String, name: String },
    /// A raw slice of the tool call's JSON arguments, not valid JSON on its own
    ToolCallDelta { id: String, fragment: String },
    ToolCallEnd { id: String },
    RoundEnd { stop_reason: StopReason },
}

impl ProviderEvent {
    pub fn text<S: Into<String>>(text: S) -> Self {
        ProviderEvent::TextDelta { text: text.into() }
    }

    pub fn tool_start<I: Into<String>, N: Into<String>>(id: I, name: N) -> Self {
        ProviderEvent::ToolCallStart {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn tool_delta<I: Into<String>, F: Into<String>>(id: I, fragment: F) -> Self {
        ProviderEvent::ToolCallDelta {
            id: id.into(),
            fragment: fragment.into(),
        }
    }

    pub fn tool_end<I: Into<String>>(id: I) -> Self {
        ProviderEvent::ToolCallEnd { id: id.into() }
    }

    pub fn end(stop_reason: StopReason) -> Self {
        ProviderEvent::RoundEnd { stop_reason }
    }
}

pub type ProviderStream = BoxStream<'static, Result<ProviderEvent>>;

/// Base trait for model API providers
#[async_trait]
pub trait Provider: Send + Sync {
    /// Open one streaming round for the conversation so far
    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ProviderStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_reason_parse() {
        assert_eq!(StopReason::parse("end_turn"), StopReason::EndTurn);
        assert_eq!(StopReason::parse("tool_use"), StopReason::ToolUse);
        assert_eq!(
            StopReason::parse("refusal"),
            StopReason::Other("refusal".to_string())
        );
    }
}
