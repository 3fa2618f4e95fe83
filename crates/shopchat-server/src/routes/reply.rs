use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::{stream::StreamExt, Stream};
use serde::Deserialize;
use serde_json::{json, Value};
use shopchat::{
    agent::AgentEvent,
    errors::FormatError,
    formats::anthropic::{message_from_anthropic, messages_to_anthropic},
    formats::ui::{conversation_from_commands, messages_from_ui, messages_to_ui, UiCommand, UiMessage},
};
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// How often to check for a disconnected client while the agent is busy
const HEARTBEAT: Duration = Duration::from_millis(500);

/// Either the whole history as ui `messages`, or `commands` that add to the history
/// carried in `state`
#[derive(Debug, Deserialize)]
struct ReplyRequest {
    #[serde(default)]
    messages: Vec<UiMessage>,
    #[serde(default)]
    commands: Vec<UiCommand>,
    #[serde(default)]
    system: Option<String>,
    #[serde(default)]
    state: Option<TransportState>,
}

#[derive(Debug, Default, Deserialize)]
struct TransportState {
    /// Earlier turns in the model API message shape
    #[serde(default)]
    messages: Vec<Value>,
}

/// A rejected request, answered with `{"error": ...}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request<S: Into<String>>(message: S) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<FormatError> for ApiError {
    fn from(err: FormatError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

// Custom SSE response type that implements the Vercel AI SDK data stream protocol
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        let body = axum::body::Body::from_stream(self);

        (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
                (HeaderName::from_static("x-vercel-ai-data-stream"), "v1"),
            ],
            body,
        )
            .into_response()
    }
}

// Protocol-specific message formatting
struct ProtocolFormatter;

impl ProtocolFormatter {
    fn format_text(text: &str) -> String {
        let encoded_text = serde_json::to_string(text).unwrap_or_else(|_| String::new());
        format!("0:{}\n", encoded_text)
    }

    fn format_tool_call_start(id: &str, name: &str) -> String {
        // Streaming tool call starts with "b:"
        let start = json!({
            "toolCallId": id,
            "toolName": name,
        });
        format!("b:{}\n", start)
    }

    fn format_tool_call(id: &str, name: &str, args: &Value) -> String {
        // Tool calls start with "9:"
        let tool_call = json!({
            "toolCallId": id,
            "toolName": name,
            "args": args
        });
        format!("9:{}\n", tool_call)
    }

    fn format_tool_result(id: &str, result: &Value, is_error: bool) -> String {
        // Tool results start with "a:"
        let response = json!({
            "toolCallId": id,
            "result": result,
            "isError": is_error,
        });
        format!("a:{}\n", response)
    }

    fn format_data(data: Value) -> String {
        // Data parts are always an array
        format!("2:{}\n", Value::Array(vec![data]))
    }

    fn format_error(message: &str) -> String {
        let encoded = serde_json::to_string(message).unwrap_or_else(|_| String::new());
        format!("3:{}\n", encoded)
    }

    fn format_finish(reason: &str) -> String {
        // Finish messages start with "d:"
        let finish = json!({
            "finishReason": reason,
            "usage": {
                "promptTokens": 0,
                "completionTokens": 0
            }
        });
        format!("d:{}\n", finish)
    }
}

/// Data stream lines for one agent event
fn format_event(event: AgentEvent) -> Vec<String> {
    match event {
        AgentEvent::TextDelta { text } => vec![ProtocolFormatter::format_text(&text)],
        AgentEvent::ToolCallStart { id, name } => {
            vec![ProtocolFormatter::format_tool_call_start(&id, &name)]
        }
        AgentEvent::ToolCallArgs { id, name, args } => {
            vec![ProtocolFormatter::format_tool_call(&id, &name, &args)]
        }
        AgentEvent::ToolResult {
            id,
            result,
            is_error,
            ..
        } => vec![ProtocolFormatter::format_tool_result(&id, &result, is_error)],
        AgentEvent::Complete { conversation } => match messages_to_ui(&conversation) {
            Ok(messages) => vec![
                ProtocolFormatter::format_data(json!({
                    "type": "conversation",
                    "messages": messages,
                    "state": {"messages": messages_to_anthropic(&conversation)},
                })),
                ProtocolFormatter::format_finish("stop"),
            ],
            Err(e) => {
                tracing::error!("Could not convert final conversation: {}", e);
                vec![
                    ProtocolFormatter::format_error(&e.to_string()),
                    ProtocolFormatter::format_finish("error"),
                ]
            }
        },
        AgentEvent::Error { kind, message } => vec![
            ProtocolFormatter::format_data(json!({
                "type": "error",
                "kind": kind,
                "message": message,
            })),
            ProtocolFormatter::format_error(&message),
            ProtocolFormatter::format_finish("error"),
        ],
    }
}

async fn handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<SseResponse, ApiError> {
    // Check protocol header (optional in our case)
    if let Some(protocol) = headers.get("x-protocol") {
        if protocol.to_str().map(|p| p != "data").unwrap_or(true) {
            return Err(ApiError::bad_request("Unsupported x-protocol, expected `data`"));
        }
    }

    let request: ReplyRequest = serde_json::from_slice(&body)
        .map_err(|e| FormatError::InvalidJson(e.to_string()))?;
    let history = if request.messages.is_empty() {
        request
            .state
            .unwrap_or_default()
            .messages
            .iter()
            .map(message_from_anthropic)
            .collect::<Result<Vec<_>, _>>()?
    } else {
        messages_from_ui(request.messages)?
    };
    let conversation = conversation_from_commands(history, request.commands)?;
    tracing::debug!(messages = conversation.len(), "starting reply");

    // Create channel for streaming
    let (tx, rx) = mpsc::channel(100);
    let stream = ReceiverStream::new(rx);

    let cancel = CancellationToken::new();
    let mut events = state
        .agent
        .reply(conversation, request.system, cancel.clone());

    // Spawn task to handle streaming
    tokio::spawn(async move {
        loop {
            match timeout(HEARTBEAT, events.next()).await {
                Ok(Some(event)) => {
                    let mut sent = true;
                    for line in format_event(event) {
                        if let Err(e) = tx.send(line).await {
                            tracing::error!("Error sending message through channel: {}", e);
                            sent = false;
                            break;
                        }
                    }
                    if !sent {
                        cancel.cancel();
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    // Heartbeat, used to detect disconnected clients and then end running tools.
                    if tx.is_closed() {
                        tracing::info!("Client disconnected, abandoning reply");
                        cancel.cancel();
                        break;
                    }
                }
            }
        }
    });

    Ok(SseResponse::new(stream))
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/reply", post(handler))
        .route("/assistant", post(handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use shopchat::{
        agent::{Agent, AgentConfig},
        errors::ToolError,
        models::tool::Tool,
        providers::mock::{MockProvider, MockRound},
        providers::base::ProviderEvent,
        tools::{ToolExecutor, ToolRegistry},
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct EchoTool;

    #[async_trait]
    impl ToolExecutor for EchoTool {
        fn tool(&self) -> Tool {
            Tool::new("echo", "Echoes back the input", json!({"type": "object"}))
        }

        async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
            Ok(arguments)
        }
    }

    /// Takes a couple of seconds, long enough to disconnect while it runs
    #[derive(Default)]
    struct NapTool {
        finished: AtomicBool,
    }

    #[async_trait]
    impl ToolExecutor for NapTool {
        fn tool(&self) -> Tool {
            Tool::new("nap", "Rests for a while", json!({"type": "object"}))
        }

        async fn execute(&self, _arguments: Value) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(2)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(json!("rested"))
        }
    }

    fn app_with(provider: Arc<MockProvider>, nap: Arc<NapTool>) -> Router {
        let registry = ToolRegistry::new()
            .with_executor(Arc::new(EchoTool))
            .and_then(|registry| registry.with_executor(nap))
            .unwrap();
        let agent = Agent::new(provider, registry, AgentConfig::default());
        routes(AppState { agent })
    }

    fn app(provider: MockProvider) -> Router {
        app_with(Arc::new(provider), Arc::default())
    }

    fn request(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn hello() -> Value {
        json!({"messages": [{"role": "user", "content": "Hi"}]})
    }

    #[tokio::test]
    async fn test_text_reply_stream() {
        let app = app(MockProvider::new(vec![MockProvider::text_round("Hello!")]));

        let response = app.oneshot(request("/reply", hello())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-vercel-ai-data-stream"], "v1");
        assert_eq!(response.headers()["content-type"], "text/event-stream");

        let body = body_text(response).await;
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines[0], r#"0:"Hel""#);
        assert_eq!(lines[1], r#"0:"lo!""#);
        assert!(lines[2].starts_with(r#"2:[{"#));
        let data: Value = serde_json::from_str(&lines[2][2..]).unwrap();
        assert_eq!(data[0]["type"], "conversation");
        assert_eq!(data[0]["messages"][1]["role"], "assistant");
        assert_eq!(data[0]["messages"][1]["content"], "Hello!");
        assert!(lines[3].starts_with(r#"d:{"finishReason":"stop""#));
        assert_eq!(lines.len(), 4);
    }

    #[tokio::test]
    async fn test_tool_call_stream() {
        let app = app(MockProvider::new(vec![
            MockProvider::tool_round(&[("t1", "echo", r#"{"message":"ping"}"#)]),
            MockProvider::text_round("pong"),
        ]));

        let response = app.oneshot(request("/assistant", hello())).await.unwrap();
        let body = body_text(response).await;
        let lines: Vec<&str> = body.lines().collect();

        assert_eq!(lines[0], r#"b:{"toolCallId":"t1","toolName":"echo"}"#);
        let call: Value = serde_json::from_str(&lines[1][2..]).unwrap();
        assert!(lines[1].starts_with("9:"));
        assert_eq!(call["args"], json!({"message": "ping"}));
        let result: Value = serde_json::from_str(&lines[2][2..]).unwrap();
        assert!(lines[2].starts_with("a:"));
        assert_eq!(
            result,
            json!({"toolCallId": "t1", "result": {"message": "ping"}, "isError": false})
        );
        assert!(body.contains(r#"0:"po""#));
        assert!(body.ends_with("}\n"));
        assert!(lines.last().unwrap().contains(r#""finishReason":"stop""#));
    }

    #[tokio::test]
    async fn test_upstream_error_stream() {
        let app = app(MockProvider::with_rounds(vec![MockRound::Error {
            events: vec![ProviderEvent::text("Hi")],
            message: "connection reset".into(),
        }]));

        let body = body_text(app.oneshot(request("/reply", hello())).await.unwrap()).await;
        let lines: Vec<&str> = body.lines().collect();

        assert_eq!(lines[0], r#"0:"Hi""#);
        let data: Value = serde_json::from_str(&lines[1][2..]).unwrap();
        assert_eq!(
            data,
            json!([{"type": "error", "kind": "upstream_stream_error", "message": "connection reset"}])
        );
        assert_eq!(lines[2], r#"3:"connection reset""#);
        assert!(lines[3].starts_with(r#"d:{"finishReason":"error""#));
    }

    #[tokio::test]
    async fn test_rejects_unknown_protocol() {
        let app = app(MockProvider::new(vec![]));
        let mut req = request("/reply", hello());
        req.headers_mut()
            .insert("x-protocol", "text".parse().unwrap());

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rejects_history_without_user_turn() {
        let app = app(MockProvider::new(vec![]));
        let body = json!({"messages": [
            {"role": "user", "content": "Hi"},
            {"role": "assistant", "content": "Hello!"}
        ]});

        let response = app.oneshot(request("/reply", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(error["error"], "Conversation must end with a user message");
    }

    #[tokio::test]
    async fn test_rejects_malformed_body() {
        let app = app(MockProvider::new(vec![]));
        let req = Request::post("/reply")
            .header("content-type", "application/json")
            .body(Body::from("{\"messages\": ["))
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert!(error["error"].as_str().unwrap().starts_with("Invalid JSON"));
    }

    #[tokio::test]
    async fn test_rejects_unresolved_tool_invocation() {
        let app = app(MockProvider::new(vec![]));
        let body = json!({"messages": [
            {"role": "user", "content": "Hi"},
            {"role": "assistant", "content": "", "toolInvocations": [
                {"state": "call", "toolCallId": "t1", "toolName": "echo", "args": {}}
            ]},
            {"role": "user", "content": "again"}
        ]});

        let response = app.oneshot(request("/reply", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_command_protocol_request() {
        let provider = Arc::new(MockProvider::new(vec![MockProvider::text_round("Hello!")]));
        let app = app_with(provider.clone(), Arc::default());
        let body = json!({
            "commands": [{
                "type": "add-message",
                "message": {"role": "user", "parts": [{"type": "text", "text": "Hi"}]}
            }],
            "state": {"messages": [
                {"role": "user", "content": "Earlier question"},
                {"role": "assistant", "content": "Earlier answer"}
            ]},
            "runConfig": {}
        });

        let response = app.oneshot(request("/assistant", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.starts_with(r#"0:"Hel""#));

        let requests = provider.requests();
        let seen = &requests[0];
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].text(), "Earlier question");
        assert_eq!(seen[2].text(), "Hi");

        // the snapshot carries state the client can send back next turn
        let line = body.lines().find(|line| line.starts_with("2:")).unwrap();
        let data: Value = serde_json::from_str(&line[2..]).unwrap();
        let state = &data[0]["state"]["messages"];
        assert_eq!(state.as_array().unwrap().len(), 4);
        assert_eq!(state[3]["content"][0]["text"], "Hello!");
    }

    #[tokio::test]
    async fn test_client_tool_result_continues_the_reply() {
        let provider = Arc::new(MockProvider::new(vec![MockProvider::text_round("It is sunny.")]));
        let app = app_with(provider.clone(), Arc::default());
        let body = json!({
            "commands": [{
                "type": "add-tool-result",
                "toolCallId": "t1",
                "toolName": "get_weather",
                "result": {"condition": "sunny"}
            }],
            "state": {"messages": [
                {"role": "user", "content": "Weather in Tokyo?"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "t1", "name": "get_weather", "input": {"location": "Tokyo"}}
                ]}
            ]}
        });

        let response = app.oneshot(request("/assistant", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        body_text(response).await;

        let requests = provider.requests();
        let seen = &requests[0];
        let result = seen[2].tool_results().next().unwrap();
        assert_eq!(result.invocation_id, "t1");
        assert_eq!(result.payload, json!({"condition": "sunny"}));
    }

    #[tokio::test]
    async fn test_rejects_orphan_tool_result_command() {
        let app = app(MockProvider::new(vec![]));
        let body = json!({
            "commands": [{"type": "add-tool-result", "toolCallId": "t9", "result": {}}],
            "state": {"messages": [{"role": "user", "content": "Hi"}]}
        });

        let response = app.oneshot(request("/assistant", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(error["error"], "Tool result t9 has no matching tool invocation");
    }

    #[tokio::test]
    async fn test_disconnect_abandons_running_tools() {
        let provider = Arc::new(MockProvider::new(vec![
            MockProvider::tool_round(&[("t1", "nap", "{}")]),
            MockProvider::text_round("Rested."),
        ]));
        let nap = Arc::new(NapTool::default());
        let app = app_with(provider.clone(), nap.clone());

        let response = app.oneshot(request("/reply", hello())).await.unwrap();
        let mut body = response.into_body();
        let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
        assert!(first.starts_with(b"b:"));
        drop(body);

        // had the reply kept running, the nap would be over and a second round started
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!nap.finished.load(Ordering::SeqCst));
        assert_eq!(provider.requests().len(), 1);
    }
}
