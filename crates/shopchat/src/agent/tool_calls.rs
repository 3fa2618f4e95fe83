//! Reassembly of one round's streamed output into an assistant message.
//!
//! Tool call arguments arrive as raw string fragments keyed by call id. They are
//! buffered untouched and only parsed once the call is marked complete.

use serde_json::{json, Value};
use std::collections::HashMap;

use crate::models::message::{Message, MessageContent};

/// A tool call whose arguments are still streaming in
#[derive(Debug, Clone, PartialEq)]
pub struct PartialToolCall {
    pub id: String,
    pub name: String,
    pub argument_buffer: String,
}

/// A tool call with its arguments parsed
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedToolCall {
    pub id: String,
    pub name: String,
    /// `{}` when the buffer did not parse
    pub arguments: Value,
    pub parse_error: Option<String>,
}

#[derive(Debug)]
enum Slot {
    Text(String),
    Call(String),
}

/// State table for a single model round
#[derive(Debug, Default)]
pub struct ToolCallTable {
    slots: Vec<Slot>,
    partial: HashMap<String, PartialToolCall>,
    completed: HashMap<String, CompletedToolCall>,
}

impl ToolCallTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&mut self, text: &str) {
        match self.slots.last_mut() {
            Some(Slot::Text(buffer)) => buffer.push_str(text),
            _ => self.slots.push(Slot::Text(text.to_string())),
        }
    }

    /// Open a new call; returns false if the id was already seen this round
    pub fn start(&mut self, id: &str, name: &str) -> bool {
        if self.partial.contains_key(id) || self.completed.contains_key(id) {
            return false;
        }
        self.partial.insert(
            id.to_string(),
            PartialToolCall {
                id: id.to_string(),
                name: name.to_string(),
                argument_buffer: String::new(),
            },
        );
        self.slots.push(Slot::Call(id.to_string()));
        true
    }

    /// Append an argument fragment; returns false if no open call has this id
    pub fn append(&mut self, id: &str, fragment: &str) -> bool {
        match self.partial.get_mut(id) {
            Some(call) => {
                call.argument_buffer.push_str(fragment);
                true
            }
            None => false,
        }
    }

    /// Close an open call and parse its buffered arguments
    pub fn finish(&mut self, id: &str) -> Option<&CompletedToolCall> {
        let call = self.partial.remove(id)?;
        let completed = complete(call);
        self.completed.insert(id.to_string(), completed);
        self.completed.get(id)
    }

    /// Close every call that never saw its end marker, in arrival order
    pub fn finish_remaining(&mut self) -> Vec<CompletedToolCall> {
        let open: Vec<String> = self
            .slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Call(id) if self.partial.contains_key(id) => Some(id.clone()),
                _ => None,
            })
            .collect();

        open.iter()
            .filter_map(|id| self.finish(id).cloned())
            .collect()
    }

    /// Completed calls in arrival order
    pub fn completed_calls(&self) -> Vec<CompletedToolCall> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Call(id) => self.completed.get(id).cloned(),
                Slot::Text(_) => None,
            })
            .collect()
    }

    /// The assistant message for this round, text and invocations interleaved in
    /// arrival order. Calls still open are left out.
    pub fn to_message(&self) -> Message {
        self.slots
            .iter()
            .fold(Message::assistant(), |message, slot| match slot {
                Slot::Text(text) if !text.is_empty() => {
                    message.with_content(MessageContent::text(text.clone()))
                }
                Slot::Text(_) => message,
                Slot::Call(id) => match self.completed.get(id) {
                    Some(call) => message.with_tool_invocation(
                        call.id.clone(),
                        call.name.clone(),
                        call.arguments.clone(),
                    ),
                    None => message,
                },
            })
    }
}

fn complete(call: PartialToolCall) -> CompletedToolCall {
    let buffer = call.argument_buffer.trim();
    let (arguments, parse_error) = if buffer.is_empty() {
        (json!({}), None)
    } else {
        match serde_json::from_str::<Value>(buffer) {
            Ok(value) => (value, None),
            Err(e) => (json!({}), Some(e.to_string())),
        }
    };

    CompletedToolCall {
        id: call.id,
        name: call.name,
        arguments,
        parse_error,
    }
}
