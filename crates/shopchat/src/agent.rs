use async_stream::stream;
use futures::stream::{BoxStream, StreamExt};
use indoc::indoc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

mod events;
mod tool_calls;

pub use events::AgentEvent;
pub use tool_calls::{CompletedToolCall, PartialToolCall, ToolCallTable};

use crate::errors::{ReplyErrorKind, ToolError};
use crate::models::message::Message;
use crate::providers::base::{Provider, ProviderEvent, StopReason};
use crate::tools::ToolRegistry;

pub const DEFAULT_SYSTEM_PROMPT: &str = indoc! {"
    You are a shopping assistant for the Mercari Japan marketplace.
    When the user is looking for a product, call the search_products tool with a short
    search query and any price bounds they mention, in JPY.
    The results are shown to the user as a table, so do not repeat every listing.
    Summarize what was found and point out good matches.
    If a search fails, tell the user and suggest how to refine it.
    When the user asks about the weather somewhere, call the get_weather tool.
"};

/// What to do with a tool call whose arguments are not valid JSON
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentPolicy {
    /// Resolve the call with an error result without running the tool
    #[default]
    Reject,
    /// Run the tool with `{}` and let it validate its own input
    ExecuteEmpty,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Upper bound on model rounds per reply
    pub max_rounds: usize,
    pub round_timeout: Duration,
    pub tool_timeout: Duration,
    pub argument_policy: ArgumentPolicy,
    /// Used when a request does not carry its own system prompt
    pub system_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: 8,
            round_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(60),
            argument_policy: ArgumentPolicy::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyState {
    Streaming,
    AwaitingTools,
    Done,
    Failed,
}

fn enter(round: usize, state: ReplyState) {
    tracing::debug!(round, state = ?state, "reply state");
}

fn fail<S: Into<String>>(round: usize, kind: ReplyErrorKind, message: S) -> AgentEvent {
    let message = message.into();
    enter(round, ReplyState::Failed);
    tracing::error!(round, kind = %kind, "{}", message);
    AgentEvent::error(kind, message)
}

enum Guarded<T> {
    Ready(T),
    TimedOut,
    Cancelled,
}

/// Await `future` unless the deadline passes or the reply is cancelled first
async fn guarded<F: Future>(
    cancel: &CancellationToken,
    deadline: Instant,
    future: F,
) -> Guarded<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Guarded::Cancelled,
        result = tokio::time::timeout_at(deadline, future) => match result {
            Ok(output) => Guarded::Ready(output),
            Err(_) => Guarded::TimedOut,
        },
    }
}

fn args_event(call: &CompletedToolCall) -> AgentEvent {
    AgentEvent::ToolCallArgs {
        id: call.id.clone(),
        name: call.name.clone(),
        args: call.arguments.clone(),
    }
}

/// Agent drives a streaming model through rounds of tool calls until it answers
#[derive(Clone)]
pub struct Agent {
    provider: Arc<dyn Provider>,
    registry: ToolRegistry,
    config: AgentConfig,
}

impl Agent {
    pub fn new(provider: Arc<dyn Provider>, registry: ToolRegistry, config: AgentConfig) -> Self {
        Self {
            provider,
            registry,
            config,
        }
    }

    /// Stream the events of one reply to `conversation`, which should end with the
    /// user's latest message.
    ///
    /// The stream always finishes with exactly one `Complete` or `Error` event.
    /// Each round's tool calls are executed in the order they arrived and all of
    /// their results are appended before the model is asked again.
    pub fn reply(
        &self,
        conversation: Vec<Message>,
        system: Option<String>,
        cancel: CancellationToken,
    ) -> BoxStream<'static, AgentEvent> {
        let agent = self.clone();

        Box::pin(stream! {
            let mut conversation = conversation;
            let system = system.unwrap_or_else(|| agent.config.system_prompt.clone());
            let tools = agent.registry.describe();
            let mut round = 0;

            loop {
                if round >= agent.config.max_rounds {
                    yield fail(
                        round,
                        ReplyErrorKind::LoopBudgetExceeded,
                        format!("Model was still calling tools after {} rounds", round),
                    );
                    return;
                }
                round += 1;
                enter(round, ReplyState::Streaming);

                let deadline = Instant::now() + agent.config.round_timeout;
                let opened = guarded(
                    &cancel,
                    deadline,
                    agent.provider.stream(&system, &conversation, &tools),
                )
                .await;
                let mut events = match opened {
                    Guarded::Ready(Ok(events)) => events,
                    Guarded::Ready(Err(e)) => {
                        yield fail(round, ReplyErrorKind::UpstreamStreamError, e.to_string());
                        return;
                    }
                    Guarded::TimedOut => {
                        yield fail(round, ReplyErrorKind::UpstreamTimeout, "Model did not respond in time");
                        return;
                    }
                    Guarded::Cancelled => {
                        yield fail(round, ReplyErrorKind::Cancelled, "Reply was cancelled");
                        return;
                    }
                };

                let mut table = ToolCallTable::new();
                let stop_reason = loop {
                    let event = match guarded(&cancel, deadline, events.next()).await {
                        Guarded::Ready(Some(Ok(event))) => event,
                        Guarded::Ready(Some(Err(e))) => {
                            yield fail(round, ReplyErrorKind::UpstreamStreamError, e.to_string());
                            return;
                        }
                        Guarded::Ready(None) => {
                            yield fail(
                                round,
                                ReplyErrorKind::UpstreamStreamError,
                                "Model stream ended before the round finished",
                            );
                            return;
                        }
                        Guarded::TimedOut => {
                            yield fail(round, ReplyErrorKind::UpstreamTimeout, "Model round timed out");
                            return;
                        }
                        Guarded::Cancelled => {
                            yield fail(round, ReplyErrorKind::Cancelled, "Reply was cancelled");
                            return;
                        }
                    };

                    match event {
                        ProviderEvent::TextDelta { text } => {
                            table.push_text(&text);
                            yield AgentEvent::TextDelta { text };
                        }
                        ProviderEvent::ToolCallStart { id, name } => {
                            if table.start(&id, &name) {
                                yield AgentEvent::ToolCallStart { id, name };
                            } else {
                                tracing::warn!(id = %id, "Ignoring repeated start of tool call");
                            }
                        }
                        ProviderEvent::ToolCallDelta { id, fragment } => {
                            if !table.append(&id, &fragment) {
                                tracing::warn!(id = %id, "Dropping argument fragment for unknown tool call");
                            }
                        }
                        ProviderEvent::ToolCallEnd { id } => {
                            match table.finish(&id).cloned() {
                                Some(call) => {
                                    if let Some(error) = &call.parse_error {
                                        tracing::warn!(id = %id, error = %error, "Tool call arguments are not valid JSON");
                                    }
                                    yield args_event(&call);
                                }
                                None => tracing::warn!(id = %id, "End of unknown tool call"),
                            }
                        }
                        ProviderEvent::RoundEnd { stop_reason } => break stop_reason,
                    }
                };

                for call in table.finish_remaining() {
                    tracing::warn!(id = %call.id, "Tool call was never terminated, closing it at round end");
                    yield args_event(&call);
                }

                let calls = table.completed_calls();
                let message = table.to_message();
                if !message.content.is_empty() {
                    conversation.push(message);
                }

                if calls.is_empty() {
                    if stop_reason == StopReason::ToolUse {
                        tracing::warn!(round, "Model stopped for tool use without calling a tool");
                    }
                    enter(round, ReplyState::Done);
                    yield AgentEvent::Complete { conversation };
                    return;
                }

                enter(round, ReplyState::AwaitingTools);
                let mut results = Message::user();
                for call in calls {
                    let rejected = call
                        .parse_error
                        .clone()
                        .filter(|_| agent.config.argument_policy == ArgumentPolicy::Reject);

                    let outcome = match rejected {
                        Some(error) => Guarded::Ready(Err(ToolError::InvalidArguments(error))),
                        None => {
                            guarded(
                                &cancel,
                                Instant::now() + agent.config.tool_timeout,
                                agent.registry.execute(&call.name, call.arguments.clone()),
                            )
                            .await
                        }
                    };

                    let outcome = match outcome {
                        Guarded::Ready(outcome) => outcome,
                        Guarded::TimedOut => Err(ToolError::Timeout(agent.config.tool_timeout.as_secs())),
                        Guarded::Cancelled => {
                            yield fail(round, ReplyErrorKind::Cancelled, "Reply was cancelled");
                            return;
                        }
                    };

                    let (result, is_error) = match outcome {
                        Ok(result) => (result, false),
                        Err(e) => (Value::String(e.to_string()), true),
                    };
                    tracing::info!(id = %call.id, tool = %call.name, is_error, "tool call resolved");

                    results = results.with_tool_result(call.id.clone(), result.clone(), is_error);
                    yield AgentEvent::ToolResult {
                        id: call.id,
                        name: call.name,
                        result,
                        is_error,
                    };
                }
                conversation.push(results);
            }
        })
    }
}
