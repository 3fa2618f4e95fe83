use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures of a single tool execution.
///
/// These never end a conversation: the orchestrator folds them back into context as an
/// error flagged tool result and lets the model decide how to proceed.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Tool execution timed out after {0}s")]
    Timeout(u64),
}

pub type ToolResult<T> = Result<T, ToolError>;

/// Malformed wire input, rejected before orchestration starts
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    #[error("Missing required field `{0}`")]
    MissingField(&'static str),

    #[error("Content block is missing its `type` tag")]
    MissingTag,

    #[error("Unknown content block type: {0}")]
    UnknownBlockType(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Tool result {0} has no matching tool invocation")]
    OrphanToolResult(String),

    #[error("Tool result {0} does not answer the next pending tool invocation")]
    UnexpectedToolResult(String),

    #[error("Tool result {0} must come before any text in its message")]
    ToolResultAfterText(String),

    #[error("Conversation must end with a user message")]
    MissingUserMessage,

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
}

/// Terminal orchestrator failures, surfaced to the client as an `Error` event
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyErrorKind {
    #[error("loop budget exceeded")]
    LoopBudgetExceeded,

    #[error("upstream stream error")]
    UpstreamStreamError,

    #[error("upstream timeout")]
    UpstreamTimeout,

    #[error("cancelled")]
    Cancelled,
}
