use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::FormatError;
use crate::models::message::{Message, MessageContent, ToolInvocation, ToolResult};
use crate::models::role::Role;

/// A chat message as the client sends and renders it
///
/// Assistant turns that span several model rounds are a single ui message, with a
/// `step-start` part opening each round and tool results folded into their invocation.
/// A user message that opens with `step-start` continues the tool results of the step
/// before it. Older clients send the flat `content` + `toolInvocations` shape instead
/// of `parts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<UiPart>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_invocations: Vec<UiToolInvocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiPart {
    StepStart,
    Text {
        text: String,
    },
    ToolInvocation {
        #[serde(rename = "toolInvocation")]
        tool_invocation: UiToolInvocation,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UiToolState {
    PartialCall,
    Call,
    Result,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiToolInvocation {
    pub state: UiToolState,
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// An instruction from a client speaking the command protocol
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiCommand {
    AddMessage {
        message: UiCommandMessage,
    },
    /// Result of a tool the client ran itself
    #[serde(rename_all = "camelCase")]
    AddToolResult {
        tool_call_id: String,
        #[serde(default)]
        tool_name: Option<String>,
        result: Value,
        #[serde(default)]
        is_error: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UiCommandMessage {
    #[serde(default = "default_command_role")]
    pub role: String,
    pub parts: Vec<UiPart>,
}

fn default_command_role() -> String {
    Role::User.as_str().to_string()
}

/// Convert incoming ui messages to the internal conversation
pub fn messages_from_ui(incoming: Vec<UiMessage>) -> Result<Vec<Message>, FormatError> {
    let mut messages: Vec<Message> = Vec::new();

    for msg in incoming {
        match msg.role.as_str() {
            "user" => {
                let explicit = msg.parts.is_some();
                let mut parts = flatten_parts(msg).into_iter().peekable();
                let marked = parts
                    .next_if(|part| matches!(part, UiPart::StepStart))
                    .is_some();
                let mut message = if marked && messages.last().is_some_and(is_results_only) {
                    messages.pop().unwrap_or_else(Message::user)
                } else {
                    Message::user()
                };

                for part in parts {
                    match part {
                        UiPart::Text { text } => message = message.with_text(text),
                        UiPart::StepStart => {}
                        UiPart::ToolInvocation { .. } => {
                            return Err(FormatError::UnknownBlockType(
                                "tool-invocation in a user message".into(),
                            ))
                        }
                    }
                }
                if message.content.is_empty() && !explicit {
                    tracing::debug!("Skipping user message without content");
                    continue;
                }
                messages.push(message);
            }
            "assistant" => {
                let parts = flatten_parts(msg);
                let has_steps = parts.iter().any(|part| matches!(part, UiPart::StepStart));
                let mut step = Step::default();

                for part in parts {
                    match part {
                        UiPart::StepStart => step.open(&mut messages),
                        UiPart::Text { text } => {
                            // Without explicit steps, narration after a tool call opens a new round
                            if !has_steps && step.has_invocations() {
                                step.flush(&mut messages);
                            }
                            step.assistant.push(MessageContent::text(text));
                        }
                        UiPart::ToolInvocation { tool_invocation } => {
                            step.push_invocation(tool_invocation)?;
                        }
                    }
                }
                step.flush(&mut messages);
            }
            other => return Err(FormatError::UnknownRole(other.to_string())),
        }
    }

    Ok(messages)
}

/// Convert incoming ui messages and check that they end with a new user turn
pub fn conversation_from_ui(incoming: Vec<UiMessage>) -> Result<Vec<Message>, FormatError> {
    conversation_from_commands(messages_from_ui(incoming)?, Vec::new())
}

/// Apply client commands on top of `history` and check that the result ends with a
/// user turn, either new text or results of tools the client ran
pub fn conversation_from_commands(
    mut history: Vec<Message>,
    commands: Vec<UiCommand>,
) -> Result<Vec<Message>, FormatError> {
    for command in commands {
        apply_command(&mut history, command)?;
    }

    match history.last() {
        Some(last) if last.role == Role::User && !last.content.is_empty() => Ok(history),
        _ => Err(FormatError::MissingUserMessage),
    }
}

fn apply_command(conversation: &mut Vec<Message>, command: UiCommand) -> Result<(), FormatError> {
    match command {
        UiCommand::AddMessage { message } => {
            if message.role != Role::User.as_str() {
                return Err(FormatError::UnknownRole(message.role));
            }
            let mut texts = Vec::new();
            for part in message.parts {
                match part {
                    UiPart::Text { text } if !text.is_empty() => texts.push(text),
                    UiPart::Text { .. } | UiPart::StepStart => {}
                    UiPart::ToolInvocation { .. } => {
                        return Err(FormatError::UnknownBlockType(
                            "tool-invocation in a user message".into(),
                        ))
                    }
                }
            }
            if texts.is_empty() {
                tracing::debug!("Skipping add-message command without text");
                return Ok(());
            }
            conversation.push(Message::user().with_text(texts.join(" ")));
            Ok(())
        }
        UiCommand::AddToolResult {
            tool_call_id,
            tool_name,
            result,
            is_error,
        } => {
            tracing::debug!(id = %tool_call_id, tool = ?tool_name, "adding client tool result");
            add_tool_result(conversation, tool_call_id, result, is_error)
        }
    }
}

/// Fold a result into the message that answers the latest assistant turn
fn add_tool_result(
    conversation: &mut Vec<Message>,
    id: String,
    payload: Value,
    is_error: bool,
) -> Result<(), FormatError> {
    let answering = match conversation.as_slice() {
        [.., assistant, answer]
            if assistant.role == Role::Assistant && is_results_only(answer) =>
        {
            true
        }
        [.., assistant] if assistant.role == Role::Assistant => false,
        _ => return Err(FormatError::OrphanToolResult(id)),
    };

    let assistant = &conversation[conversation.len() - if answering { 2 } else { 1 }];
    if !assistant.tool_invocations().any(|invocation| invocation.id == id) {
        return Err(FormatError::OrphanToolResult(id));
    }
    let answered = answering
        && conversation
            .last()
            .is_some_and(|answer| answer.tool_results().any(|r| r.invocation_id == id));
    if answered {
        return Err(FormatError::UnexpectedToolResult(id));
    }

    let block = MessageContent::tool_result(id, payload, is_error);
    match conversation.last_mut() {
        Some(answer) if answering => answer.content.push(block),
        _ => conversation.push(Message::user().with_content(block)),
    }
    Ok(())
}

fn is_results_only(message: &Message) -> bool {
    message.role == Role::User
        && !message.content.is_empty()
        && message
            .content
            .iter()
            .all(|content| content.as_tool_result().is_some())
}

/// Convert the internal conversation to ui messages, pairing every tool result with the
/// invocation it answers in the step right before it
///
/// Results must come first in their message and answer the preceding assistant message
/// in the order it made the calls, as the model API requires.
pub fn messages_to_ui(messages: &[Message]) -> Result<Vec<UiMessage>, FormatError> {
    let mut output: Vec<UiMessage> = Vec::new();
    let mut previous: Option<&Message> = None;

    for message in messages {
        match message.role {
            Role::Assistant => {
                let continues_turn = output.last().is_some_and(|last| last.role == "assistant");
                if !continues_turn {
                    output.push(UiMessage {
                        id: Some(format!("msg-{}", uuid::Uuid::new_v4())),
                        role: Role::Assistant.as_str().to_string(),
                        content: String::new(),
                        parts: Some(Vec::new()),
                        tool_invocations: Vec::new(),
                    });
                }
                let Some(current) = output.last_mut() else {
                    continue;
                };
                let parts = current.parts.get_or_insert_with(Vec::new);
                parts.push(UiPart::StepStart);
                for content in &message.content {
                    match content {
                        MessageContent::Text(text) => {
                            current.content.push_str(&text.text);
                            parts.push(UiPart::Text {
                                text: text.text.clone(),
                            });
                        }
                        MessageContent::ToolInvocation(invocation) => {
                            parts.push(UiPart::ToolInvocation {
                                tool_invocation: UiToolInvocation {
                                    state: UiToolState::Call,
                                    tool_call_id: invocation.id.clone(),
                                    tool_name: invocation.name.clone(),
                                    args: invocation.arguments.clone(),
                                    result: None,
                                    is_error: None,
                                },
                            });
                        }
                        MessageContent::ToolResult(result) => {
                            return Err(FormatError::OrphanToolResult(result.invocation_id.clone()))
                        }
                    }
                }
            }
            Role::User => {
                let answers_assistant = previous.is_some_and(|p| p.role == Role::Assistant);
                let mut has_results = false;
                let mut text_parts = Vec::new();
                for content in &message.content {
                    match content {
                        MessageContent::ToolResult(result) => {
                            if !text_parts.is_empty() {
                                return Err(FormatError::ToolResultAfterText(
                                    result.invocation_id.clone(),
                                ));
                            }
                            if !answers_assistant {
                                return Err(FormatError::OrphanToolResult(
                                    result.invocation_id.clone(),
                                ));
                            }
                            attach_result(&mut output, result)?;
                            has_results = true;
                        }
                        MessageContent::Text(text) => text_parts.push(UiPart::Text {
                            text: text.text.clone(),
                        }),
                        MessageContent::ToolInvocation(invocation) => {
                            return Err(FormatError::UnknownBlockType(format!(
                                "tool invocation {} in a user message",
                                invocation.id
                            )))
                        }
                    }
                }

                // results alone live on the assistant message they answer
                if !has_results || !text_parts.is_empty() {
                    let mut parts = Vec::with_capacity(text_parts.len() + 1);
                    if has_results {
                        parts.push(UiPart::StepStart);
                    }
                    parts.extend(text_parts);
                    output.push(UiMessage {
                        id: Some(format!("msg-{}", uuid::Uuid::new_v4())),
                        role: Role::User.as_str().to_string(),
                        content: message.text(),
                        parts: Some(parts),
                        tool_invocations: Vec::new(),
                    });
                }
            }
        }
        previous = Some(message);
    }

    Ok(output)
}

fn attach_result(output: &mut [UiMessage], result: &ToolResult) -> Result<(), FormatError> {
    let parts = output
        .last_mut()
        .filter(|last| last.role == "assistant")
        .and_then(|last| last.parts.as_mut())
        .ok_or_else(|| FormatError::OrphanToolResult(result.invocation_id.clone()))?;

    let step = parts
        .iter()
        .rposition(|part| matches!(part, UiPart::StepStart))
        .map_or(0, |start| start + 1);
    let pending = parts[step..].iter_mut().find_map(|part| match part {
        UiPart::ToolInvocation { tool_invocation }
            if tool_invocation.state != UiToolState::Result =>
        {
            Some(tool_invocation)
        }
        _ => None,
    });

    match pending {
        Some(invocation) if invocation.tool_call_id == result.invocation_id => {
            invocation.state = UiToolState::Result;
            invocation.result = Some(result.payload.clone());
            invocation.is_error = Some(result.is_error);
            Ok(())
        }
        Some(_) => Err(FormatError::UnexpectedToolResult(
            result.invocation_id.clone(),
        )),
        None => Err(FormatError::OrphanToolResult(result.invocation_id.clone())),
    }
}

/// Normalize both client shapes into a single ordered list of parts
fn flatten_parts(msg: UiMessage) -> Vec<UiPart> {
    if let Some(parts) = msg.parts {
        return parts;
    }

    let mut parts: Vec<UiPart> = msg
        .tool_invocations
        .into_iter()
        .map(|tool_invocation| UiPart::ToolInvocation { tool_invocation })
        .collect();
    if !msg.content.is_empty() {
        parts.push(UiPart::Text { text: msg.content });
    }
    parts
}

/// One model round being rebuilt from ui parts
#[derive(Default)]
struct Step {
    /// Opened by an explicit `step-start`, so it is kept even when empty
    opened: bool,
    assistant: Vec<MessageContent>,
    results: Vec<MessageContent>,
}

impl Step {
    fn has_invocations(&self) -> bool {
        self.assistant
            .iter()
            .any(|content| content.as_tool_invocation().is_some())
    }

    fn push_invocation(&mut self, ui: UiToolInvocation) -> Result<(), FormatError> {
        if ui.state != UiToolState::Result {
            return Err(FormatError::MissingField("result"));
        }
        self.results.push(MessageContent::tool_result(
            ui.tool_call_id.clone(),
            ui.result.unwrap_or(Value::Null),
            ui.is_error.unwrap_or(false),
        ));
        self.assistant
            .push(MessageContent::ToolInvocation(ToolInvocation {
                id: ui.tool_call_id,
                name: ui.tool_name,
                arguments: ui.args,
            }));
        Ok(())
    }

    fn open(&mut self, messages: &mut Vec<Message>) {
        self.flush(messages);
        self.opened = true;
    }

    fn flush(&mut self, messages: &mut Vec<Message>) {
        let opened = std::mem::take(&mut self.opened);
        if self.assistant.is_empty() && !opened {
            return;
        }
        messages.push(Message {
            role: Role::Assistant,
            content: std::mem::take(&mut self.assistant),
        });
        if !self.results.is_empty() {
            messages.push(Message {
                role: Role::User,
                content: std::mem::take(&mut self.results),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conversation() -> Vec<Message> {
        vec![
            Message::user().with_text("find blue sneakers under 5000 yen"),
            Message::assistant()
                .with_text("Let me search.")
                .with_tool_invocation(
                    "t1",
                    "search_products",
                    json!({"query": "blue sneakers", "maxPrice": 5000}),
                ),
            Message::user().with_tool_result("t1", json!({"rows": []}), false),
            Message::assistant()
                .with_tool_invocation("t2", "search_products", json!({"query": "sneakers"}))
                .with_tool_invocation("t3", "weather", json!({})),
            Message::user()
                .with_tool_result("t2", json!({"rows": [{"id": "m1"}]}), false)
                .with_tool_result("t3", json!("Unknown tool: weather"), true),
            Message::assistant().with_text("Found one pair."),
            Message::user().with_text("thanks"),
        ]
    }

    #[test]
    fn test_round_trip_through_ui() {
        let messages = conversation();
        let ui = messages_to_ui(&messages).unwrap();

        // one ui message per user turn plus one for the whole assistant turn
        assert_eq!(ui.len(), 3);
        assert_eq!(ui[1].content, "Let me search.Found one pair.");

        let back = messages_from_ui(ui).unwrap();
        assert_eq!(back, messages);
    }

    /// Conversation fragments that may follow one another in any order
    const FRAGMENT_KINDS: usize = 9;

    fn fragment(kind: usize, next_id: &mut usize) -> Vec<Message> {
        *next_id += 1;
        let id = format!("t{}", next_id);
        let second = format!("t{}b", next_id);
        match kind {
            0 => vec![Message::user().with_text("find sneakers")],
            1 => vec![Message::user().with_text("under 5000").with_text(" yen")],
            2 => vec![Message::user()],
            3 => vec![Message::assistant().with_text("Here you go.")],
            4 => vec![Message::assistant()],
            5 => vec![
                Message::assistant()
                    .with_text("Searching.")
                    .with_tool_invocation(&id, "search_products", json!({"query": "sneakers"})),
                Message::user().with_tool_result(&id, json!({"rows": []}), false),
            ],
            6 => vec![
                Message::assistant()
                    .with_tool_invocation(&id, "search_products", json!({}))
                    .with_tool_invocation(&second, "get_weather", json!({"location": "Tokyo"})),
                Message::user()
                    .with_tool_result(&id, json!("Invalid arguments: missing field `query`"), true)
                    .with_tool_result(&second, json!({"condition": "sunny"}), false),
            ],
            7 => vec![
                Message::assistant()
                    .with_tool_invocation(&id, "search_products", json!({"query": "shoes"})),
                Message::user()
                    .with_tool_result(&id, json!({"rows": [{"id": "m1"}]}), false)
                    .with_text("also cheaper please"),
            ],
            _ => vec![
                Message::assistant()
                    .with_tool_invocation(&id, "search_products", json!({"query": "bags"}))
                    .with_text("One moment."),
                Message::user().with_tool_result(&id, Value::Null, false),
            ],
        }
    }

    #[test]
    fn test_round_trip_over_generated_conversations() {
        let mut checked = 0;
        for len in 1..=3u32 {
            for index in 0..FRAGMENT_KINDS.pow(len) {
                let mut next_id = 0;
                let mut remaining = index;
                let mut messages = Vec::new();
                for _ in 0..len {
                    messages.extend(fragment(remaining % FRAGMENT_KINDS, &mut next_id));
                    remaining /= FRAGMENT_KINDS;
                }

                let ui = messages_to_ui(&messages).unwrap();
                let wire = serde_json::to_string(&ui).unwrap();
                let back = messages_from_ui(serde_json::from_str(&wire).unwrap()).unwrap();
                assert_eq!(back, messages, "wire: {}", wire);
                checked += 1;
            }
        }
        assert_eq!(checked, 9 + 81 + 729);
    }

    #[test]
    fn test_text_after_results_stays_in_the_same_message() {
        let messages = vec![
            Message::user().with_text("find shoes"),
            Message::assistant().with_tool_invocation("t1", "search_products", json!({"query": "shoes"})),
            Message::user()
                .with_tool_result("t1", json!({"rows": []}), false)
                .with_text("also cheaper please"),
        ];

        let ui = messages_to_ui(&messages).unwrap();
        assert_eq!(ui.len(), 3);
        assert_eq!(
            ui[2].parts,
            Some(vec![
                UiPart::StepStart,
                UiPart::Text {
                    text: "also cheaper please".into()
                },
            ])
        );
        assert_eq!(messages_from_ui(ui).unwrap(), messages);
    }

    #[test]
    fn test_empty_assistant_step_survives() {
        let messages = vec![
            Message::user().with_text("hi"),
            Message::assistant(),
            Message::user().with_text("hello?"),
        ];

        let back = messages_from_ui(messages_to_ui(&messages).unwrap()).unwrap();
        assert_eq!(back, messages);
    }

    #[test]
    fn test_results_must_answer_the_previous_step_in_order() {
        let assistant = Message::assistant()
            .with_tool_invocation("t1", "search_products", json!({}))
            .with_tool_invocation("t2", "search_products", json!({}));

        let swapped = vec![
            assistant.clone(),
            Message::user()
                .with_tool_result("t2", json!([]), false)
                .with_tool_result("t1", json!([]), false),
        ];
        assert_eq!(
            messages_to_ui(&swapped),
            Err(FormatError::UnexpectedToolResult("t2".into()))
        );

        let text_first = vec![
            assistant.clone(),
            Message::user()
                .with_text("thanks")
                .with_tool_result("t1", json!([]), false),
        ];
        assert_eq!(
            messages_to_ui(&text_first),
            Err(FormatError::ToolResultAfterText("t1".into()))
        );

        let split = vec![
            assistant,
            Message::user().with_tool_result("t1", json!([]), false),
            Message::user().with_tool_result("t2", json!([]), false),
        ];
        assert_eq!(
            messages_to_ui(&split),
            Err(FormatError::OrphanToolResult("t2".into()))
        );
    }

    #[test]
    fn test_results_do_not_reach_into_earlier_steps() {
        let messages = vec![
            Message::assistant().with_tool_invocation("t1", "search_products", json!({})),
            Message::assistant().with_tool_invocation("t2", "search_products", json!({})),
            Message::user().with_tool_result("t1", json!([]), false),
        ];
        assert_eq!(
            messages_to_ui(&messages),
            Err(FormatError::UnexpectedToolResult("t1".into()))
        );
    }

    #[test]
    fn test_commands_extend_history() {
        let history = vec![
            Message::user().with_text("weather in Tokyo and Osaka?"),
            Message::assistant()
                .with_tool_invocation("t1", "get_weather", json!({"location": "Tokyo"}))
                .with_tool_invocation("t2", "get_weather", json!({"location": "Osaka"})),
        ];
        let commands: Vec<UiCommand> = serde_json::from_value(json!([
            {"type": "add-tool-result", "toolCallId": "t1", "toolName": "get_weather", "result": {"condition": "sunny"}},
            {"type": "add-tool-result", "toolCallId": "t2", "result": {"condition": "rainy"}, "isError": false}
        ]))
        .unwrap();

        let conversation = conversation_from_commands(history, commands).unwrap();
        assert_eq!(conversation.len(), 3);
        assert_eq!(
            conversation[2],
            Message::user()
                .with_tool_result("t1", json!({"condition": "sunny"}), false)
                .with_tool_result("t2", json!({"condition": "rainy"}), false)
        );

        let commands: Vec<UiCommand> = serde_json::from_value(json!([{
            "type": "add-message",
            "message": {"parts": [
                {"type": "text", "text": "blue"},
                {"type": "text", "text": ""},
                {"type": "text", "text": "sneakers"}
            ]}
        }]))
        .unwrap();
        assert_eq!(
            conversation_from_commands(Vec::new(), commands).unwrap(),
            vec![Message::user().with_text("blue sneakers")]
        );
    }

    #[test]
    fn test_tool_result_command_must_answer_latest_assistant() {
        let result = |id: &str| UiCommand::AddToolResult {
            tool_call_id: id.to_string(),
            tool_name: None,
            result: json!({}),
            is_error: false,
        };
        let history = vec![
            Message::user().with_text("hi"),
            Message::assistant().with_tool_invocation("t1", "get_weather", json!({})),
        ];

        assert_eq!(
            conversation_from_commands(history.clone(), vec![result("t9")]),
            Err(FormatError::OrphanToolResult("t9".into()))
        );
        assert_eq!(
            conversation_from_commands(history.clone(), vec![result("t1"), result("t1")]),
            Err(FormatError::UnexpectedToolResult("t1".into()))
        );
        assert_eq!(
            conversation_from_commands(vec![Message::user().with_text("hi")], vec![result("t1")]),
            Err(FormatError::OrphanToolResult("t1".into()))
        );
        assert_eq!(
            conversation_from_commands(history, Vec::new()),
            Err(FormatError::MissingUserMessage)
        );
    }

    #[test]
    fn test_results_are_paired_with_invocations() {
        let ui = messages_to_ui(&conversation()).unwrap();
        let parts = ui[1].parts.as_ref().unwrap();
        let invocations: Vec<_> = parts
            .iter()
            .filter_map(|part| match part {
                UiPart::ToolInvocation { tool_invocation } => Some(tool_invocation),
                _ => None,
            })
            .collect();

        assert_eq!(invocations.len(), 3);
        assert!(invocations.iter().all(|i| i.state == UiToolState::Result));
        assert_eq!(invocations[2].is_error, Some(true));
    }

    #[test]
    fn test_orphan_result_is_rejected() {
        let messages = vec![
            Message::user().with_text("hi"),
            Message::user().with_tool_result("nope", json!({}), false),
        ];
        assert_eq!(
            messages_to_ui(&messages),
            Err(FormatError::OrphanToolResult("nope".into()))
        );
    }

    #[test]
    fn test_legacy_flat_shape() {
        let incoming: Vec<UiMessage> = serde_json::from_value(json!([
            {"role": "user", "content": "find a switch"},
            {
                "role": "assistant",
                "content": "Here is what I found.",
                "toolInvocations": [{
                    "state": "result",
                    "toolCallId": "t1",
                    "toolName": "search_products",
                    "args": {"query": "switch"},
                    "result": {"rows": []}
                }]
            },
            {"role": "user", "content": "cheaper?"}
        ]))
        .unwrap();

        let messages = conversation_from_ui(incoming).unwrap();
        assert_eq!(
            messages,
            vec![
                Message::user().with_text("find a switch"),
                Message::assistant().with_tool_invocation(
                    "t1",
                    "search_products",
                    json!({"query": "switch"})
                ),
                Message::user().with_tool_result("t1", json!({"rows": []}), false),
                Message::assistant().with_text("Here is what I found."),
                Message::user().with_text("cheaper?"),
            ]
        );
    }

    #[test]
    fn test_conversation_must_end_with_user_turn() {
        let incoming: Vec<UiMessage> = serde_json::from_value(json!([
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": "hello"}
        ]))
        .unwrap();
        assert_eq!(
            conversation_from_ui(incoming),
            Err(FormatError::MissingUserMessage)
        );
    }

    #[test]
    fn test_unknown_role_and_unresolved_calls_are_rejected() {
        let incoming: Vec<UiMessage> =
            serde_json::from_value(json!([{"role": "system", "content": "x"}])).unwrap();
        assert_eq!(
            messages_from_ui(incoming),
            Err(FormatError::UnknownRole("system".into()))
        );

        let incoming: Vec<UiMessage> = serde_json::from_value(json!([{
            "role": "assistant",
            "parts": [{"type": "tool-invocation", "toolInvocation": {
                "state": "call", "toolCallId": "t1", "toolName": "search_products", "args": {}
            }}]
        }]))
        .unwrap();
        assert_eq!(
            messages_from_ui(incoming),
            Err(FormatError::MissingField("result"))
        );
    }

    #[test]
    fn test_unknown_part_type_fails_to_parse() {
        let result = serde_json::from_value::<UiMessage>(json!({
            "role": "assistant",
            "parts": [{"type": "reasoning", "reasoning": "hmm"}]
        }));
        assert!(result.is_err());
    }
}
