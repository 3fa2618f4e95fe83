use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::role::Role;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
}

/// A fully assembled tool call made by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Unique within a conversation, joins the invocation to its result
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// The output of executing a [`ToolInvocation`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub invocation_id: String,
    pub payload: Value,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
/// Content passed inside a message, which can be both simple content and tool content
pub enum MessageContent {
    Text(TextContent),
    ToolInvocation(ToolInvocation),
    ToolResult(ToolResult),
}

impl MessageContent {
    pub fn text<S: Into<String>>(text: S) -> Self {
        MessageContent::Text(TextContent { text: text.into() })
    }

    pub fn tool_invocation<I, N>(id: I, name: N, arguments: Value) -> Self
    where
        I: Into<String>,
        N: Into<String>,
    {
        MessageContent::ToolInvocation(ToolInvocation {
            id: id.into(),
            name: name.into(),
            arguments,
        })
    }

    pub fn tool_result<S: Into<String>>(invocation_id: S, payload: Value, is_error: bool) -> Self {
        MessageContent::ToolResult(ToolResult {
            invocation_id: invocation_id.into(),
            payload,
            is_error,
        })
    }

    pub fn as_tool_invocation(&self) -> Option<&ToolInvocation> {
        if let MessageContent::ToolInvocation(ref invocation) = self {
            Some(invocation)
        } else {
            None
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResult> {
        if let MessageContent::ToolResult(ref result) = self {
            Some(result)
        } else {
            None
        }
    }

    /// Get the text content if this is a TextContent variant
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(&text.text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message to or from an LLM
pub struct Message {
    pub role: Role,
    pub content: Vec<MessageContent>,
}

impl Message {
    pub fn new(role: Role) -> Self {
        Message {
            role,
            content: Vec::new(),
        }
    }

    /// Create a new user message
    pub fn user() -> Self {
        Message::new(Role::User)
    }

    /// Create a new assistant message
    pub fn assistant() -> Self {
        Message::new(Role::Assistant)
    }

    /// Add any MessageContent to the message
    pub fn with_content(mut self, content: MessageContent) -> Self {
        self.content.push(content);
        self
    }

    /// Add text content to the message
    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(MessageContent::text(text))
    }

    /// Add a tool invocation to the message
    pub fn with_tool_invocation<I, N>(self, id: I, name: N, arguments: Value) -> Self
    where
        I: Into<String>,
        N: Into<String>,
    {
        self.with_content(MessageContent::tool_invocation(id, name, arguments))
    }

    /// Add a tool result to the message
    pub fn with_tool_result<S: Into<String>>(
        self,
        invocation_id: S,
        payload: Value,
        is_error: bool,
    ) -> Self {
        self.with_content(MessageContent::tool_result(invocation_id, payload, is_error))
    }

    pub fn tool_invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.content.iter().filter_map(MessageContent::as_tool_invocation)
    }

    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.content.iter().filter_map(MessageContent::as_tool_result)
    }

    /// Concatenation of all text blocks, in order
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(MessageContent::as_text)
            .collect::<Vec<_>>()
            .join("")
    }
}
