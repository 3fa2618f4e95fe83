use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::{Provider, ProviderEvent, ProviderStream, StopReason};

/// How a single scripted round plays out
#[derive(Debug, Clone)]
pub enum MockRound {
    /// Emit the events and finish
    Events(Vec<ProviderEvent>),
    /// Emit the events, then fail mid-stream
    Error {
        events: Vec<ProviderEvent>,
        message: String,
    },
    /// Emit the events, then never produce anything again
    Stall(Vec<ProviderEvent>),
}

/// A mock provider that plays back pre-configured rounds for testing
pub struct MockProvider {
    rounds: Mutex<VecDeque<MockRound>>,
    repeat: Option<Vec<ProviderEvent>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of rounds
    pub fn new(rounds: Vec<Vec<ProviderEvent>>) -> Self {
        Self::with_rounds(rounds.into_iter().map(MockRound::Events).collect())
    }

    pub fn with_rounds(rounds: Vec<MockRound>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider that answers every round with the same events
    pub fn repeating(events: Vec<ProviderEvent>) -> Self {
        Self {
            rounds: Mutex::new(VecDeque::new()),
            repeat: Some(events),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Conversations sent so far, one per round
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }

    /// A round that streams `text` in two fragments and ends the turn
    pub fn text_round(text: &str) -> Vec<ProviderEvent> {
        let split = text
            .char_indices()
            .nth(text.chars().count() / 2)
            .map_or(text.len(), |(i, _)| i);
        let (head, tail) = text.split_at(split);
        vec![
            ProviderEvent::text(head),
            ProviderEvent::text(tail),
            ProviderEvent::end(StopReason::EndTurn),
        ]
    }

    /// A round that calls each `(id, name, arguments)` in order, streaming the
    /// arguments one character at a time
    pub fn tool_round(calls: &[(&str, &str, &str)]) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        for (id, name, arguments) in calls {
            events.push(ProviderEvent::tool_start(*id, *name));
            events.extend(
                arguments
                    .chars()
                    .map(|c| ProviderEvent::tool_delta(*id, c.to_string())),
            );
            events.push(ProviderEvent::tool_end(*id));
        }
        events.push(ProviderEvent::end(StopReason::ToolUse));
        events
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn stream(
        &self,
        _system: &str,
        messages: &[Message],
        _tools: &[Tool],
    ) -> Result<ProviderStream> {
        self.requests.lock().unwrap().push(messages.to_vec());

        let round = match self.rounds.lock().unwrap().pop_front() {
            Some(round) => round,
            // Return an empty turn once the script runs out
            None => MockRound::Events(
                self.repeat
                    .clone()
                    .unwrap_or_else(|| vec![ProviderEvent::end(StopReason::EndTurn)]),
            ),
        };

        let stream = match round {
            MockRound::Events(events) => stream::iter(events.into_iter().map(Ok)).boxed(),
            MockRound::Error { events, message } => stream::iter(events.into_iter().map(Ok))
                .chain(stream::once(async move { Err(anyhow!(message)) }))
                .boxed(),
            MockRound::Stall(events) => stream::iter(events.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed(),
        };
        Ok(stream)
    }
}
