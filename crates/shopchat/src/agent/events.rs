use serde::Serialize;
use serde_json::Value;

use crate::errors::ReplyErrorKind;
use crate::models::message::Message;

/// Outbound events of a single reply, in emission order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    TextDelta {
        text: String,
    },
    ToolCallStart {
        id: String,
        name: String,
    },
    /// Complete arguments of a call, sent once its last fragment has arrived
    ToolCallArgs {
        id: String,
        name: String,
        args: Value,
    },
    ToolResult {
        id: String,
        name: String,
        result: Value,
        #[serde(rename = "isError")]
        is_error: bool,
    },
    Complete {
        conversation: Vec<Message>,
    },
    Error {
        kind: ReplyErrorKind,
        message: String,
    },
}

impl AgentEvent {
    pub fn error<S: Into<String>>(kind: ReplyErrorKind, message: S) -> Self {
        AgentEvent::Error {
            kind,
            message: message.into(),
        }
    }

    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Complete { .. } | AgentEvent::Error { .. })
    }
}
