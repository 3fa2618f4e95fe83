use anyhow::{anyhow, Result};
use serde_json::{json, Map, Value};
use std::collections::HashSet;

use crate::errors::FormatError;
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::Tool;

/// Convert an internal message to Anthropic's message format
///
/// Content is always emitted as an array of typed blocks. Tool results ride in user
/// messages as `tool_result` blocks referencing the invocation id.
pub fn message_to_anthropic(message: &Message) -> Value {
    let content: Vec<Value> = message
        .content
        .iter()
        .map(|content| match content {
            MessageContent::Text(text) => json!({
                "type": "text",
                "text": text.text,
            }),
            MessageContent::ToolInvocation(invocation) => json!({
                "type": "tool_use",
                "id": invocation.id,
                "name": invocation.name,
                "input": invocation.arguments,
            }),
            MessageContent::ToolResult(result) => {
                let mut block = json!({
                    "type": "tool_result",
                    "tool_use_id": result.invocation_id,
                    "content": payload_to_anthropic(&result.payload),
                });
                if result.is_error {
                    block["is_error"] = json!(true);
                }
                block
            }
        })
        .collect();

    json!({
        "role": message.role.as_str(),
        "content": content,
    })
}

pub fn messages_to_anthropic(messages: &[Message]) -> Vec<Value> {
    messages.iter().map(message_to_anthropic).collect()
}

/// Convert an Anthropic message back into the internal format
pub fn message_from_anthropic(value: &Value) -> Result<Message, FormatError> {
    let role = match value.get("role").and_then(Value::as_str) {
        Some("user") => Role::User,
        Some("assistant") => Role::Assistant,
        Some(other) => return Err(FormatError::UnknownRole(other.to_string())),
        None => return Err(FormatError::MissingField("role")),
    };

    let mut message = Message::new(role);
    match value.get("content") {
        Some(Value::String(text)) => {
            message = message.with_text(text.clone());
        }
        Some(Value::Array(blocks)) => {
            for block in blocks {
                message = message.with_content(block_from_anthropic(block)?);
            }
        }
        Some(_) => return Err(FormatError::InvalidJson("content must be a string or an array".into())),
        None => return Err(FormatError::MissingField("content")),
    }

    Ok(message)
}

fn block_from_anthropic(block: &Value) -> Result<MessageContent, FormatError> {
    let block_type = block
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FormatError::MissingTag)?;

    match block_type {
        "text" => Ok(MessageContent::text(required_str(block, "text")?)),
        "tool_use" => {
            let id = required_str(block, "id")?;
            let name = required_str(block, "name")?;
            let input = block
                .get("input")
                .cloned()
                .ok_or(FormatError::MissingField("input"))?;
            Ok(MessageContent::tool_invocation(id, name, input))
        }
        "tool_result" => {
            let id = required_str(block, "tool_use_id")?;
            let payload = payload_from_anthropic(block.get("content"))?;
            let is_error = block
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Ok(MessageContent::tool_result(id, payload, is_error))
        }
        other => Err(FormatError::UnknownBlockType(other.to_string())),
    }
}

fn required_str<'a>(block: &'a Value, field: &'static str) -> Result<&'a str, FormatError> {
    block
        .get(field)
        .and_then(Value::as_str)
        .ok_or(FormatError::MissingField(field))
}

/// Strings go over the wire verbatim; any other JSON is sent as a single serialized text block
fn payload_to_anthropic(payload: &Value) -> Value {
    match payload {
        Value::String(text) => json!(text),
        other => json!([{ "type": "text", "text": other.to_string() }]),
    }
}

fn payload_from_anthropic(content: Option<&Value>) -> Result<Value, FormatError> {
    match content {
        None => Ok(Value::Null),
        Some(Value::String(text)) => Ok(Value::String(text.clone())),
        Some(Value::Array(blocks)) => {
            let mut text = String::new();
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => text.push_str(required_str(block, "text")?),
                    Some(other) => return Err(FormatError::UnknownBlockType(other.to_string())),
                    None => return Err(FormatError::MissingTag),
                }
            }
            Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
        }
        Some(_) => Err(FormatError::InvalidJson(
            "tool_result content must be a string or an array".into(),
        )),
    }
}

/// Convert internal Tool format to Anthropic's tool format
pub fn tools_to_anthropic(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "name": tool.name,
            "description": tool.description,
            "input_schema": tool.input_schema,
        }));
    }

    Ok(result)
}

/// Build the full streaming request body for one round
pub fn create_request(
    model: &str,
    max_tokens: u32,
    temperature: Option<f32>,
    system: &str,
    messages: &[Message],
    tools: &[Tool],
) -> Result<Value> {
    let mut payload = Map::new();
    payload.insert("model".into(), json!(model));
    payload.insert("max_tokens".into(), json!(max_tokens));
    payload.insert("stream".into(), json!(true));
    payload.insert("messages".into(), json!(messages_to_anthropic(messages)));

    if !system.is_empty() {
        payload.insert("system".into(), json!(system));
    }
    if let Some(temp) = temperature {
        payload.insert("temperature".into(), json!(temp));
    }
    if !tools.is_empty() {
        payload.insert("tools".into(), json!(tools_to_anthropic(tools)?));
    }

    Ok(Value::Object(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(message: &Message) -> Message {
        message_from_anthropic(&message_to_anthropic(message)).unwrap()
    }

    #[test]
    fn test_round_trip_every_block_kind() {
        let messages = vec![
            Message::user().with_text("find blue sneakers under 5000 yen"),
            Message::assistant()
                .with_text("Searching now.")
                .with_tool_invocation(
                    "t1",
                    "search_products",
                    json!({"query": "blue sneakers", "maxPrice": 5000}),
                ),
            Message::user()
                .with_tool_result("t1", json!({"rows": [{"id": "m1", "price": 4200}]}), false)
                .with_tool_result("t2", json!("upstream returned 503"), true)
                .with_tool_result("t3", json!(["a", 1, null]), false)
                .with_tool_result("t4", json!("{\"looks\": \"like json\"}"), false),
            Message::assistant(),
        ];

        for message in &messages {
            assert_eq!(&round_trip(message), message);
        }
    }

    #[test]
    fn test_tool_result_wire_shape() {
        let message = Message::user().with_tool_result("t9", json!({"ok": true}), true);
        let wire = message_to_anthropic(&message);

        assert_eq!(wire["role"], "user");
        let block = &wire["content"][0];
        assert_eq!(block["type"], "tool_result");
        assert_eq!(block["tool_use_id"], "t9");
        assert_eq!(block["is_error"], true);
        assert_eq!(block["content"][0]["text"], "{\"ok\":true}");
    }

    #[test]
    fn test_plain_string_content_is_text() {
        let message = message_from_anthropic(&json!({"role": "user", "content": "hi"})).unwrap();
        assert_eq!(message, Message::user().with_text("hi"));
    }

    #[test]
    fn test_malformed_input_is_rejected() {
        assert_eq!(
            message_from_anthropic(&json!({"role": "system", "content": []})),
            Err(FormatError::UnknownRole("system".into()))
        );
        assert_eq!(
            message_from_anthropic(&json!({"role": "user", "content": [{"text": "x"}]})),
            Err(FormatError::MissingTag)
        );
        assert_eq!(
            message_from_anthropic(&json!({"role": "user", "content": [{"type": "image"}]})),
            Err(FormatError::UnknownBlockType("image".into()))
        );
        assert_eq!(
            message_from_anthropic(&json!({
                "role": "assistant",
                "content": [{"type": "tool_use", "id": "t1", "input": {}}]
            })),
            Err(FormatError::MissingField("name"))
        );
    }

    #[test]
    fn test_duplicate_tools_rejected() {
        let tool = Tool::new("search_products", "search", json!({"type": "object"}));
        let result = tools_to_anthropic(&[tool.clone(), tool]);
        assert!(result.is_err());
    }

    #[test]
    fn test_create_request() -> Result<()> {
        let tool = Tool::new("search_products", "search", json!({"type": "object"}));
        let payload = create_request(
            "claude-sonnet-4-5-20250929",
            4096,
            None,
            "You are helpful.",
            &[Message::user().with_text("hello")],
            &[tool],
        )?;

        assert_eq!(payload["stream"], true);
        assert_eq!(payload["system"], "You are helpful.");
        assert_eq!(payload["tools"][0]["input_schema"]["type"], "object");
        assert!(payload.get("temperature").is_none());
        assert_eq!(payload["messages"][0]["content"][0]["text"], "hello");
        Ok(())
    }
}
