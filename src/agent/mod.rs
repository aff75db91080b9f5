//! Conversation orchestration: chat completions with tool calling against the
//! discovered metadata tools.

pub mod registry;

use crate::api::chat::chat_completion;
use crate::api::{ChatMessage, ChatRequest, ChatResponse, ChatToolDefinition};
use crate::core::config::RuntimeConfig;
use crate::mcp::McpSession;
use registry::ToolRegistry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const INTERRUPTED_MESSAGE: &str = "Query interrupted by user.";
pub const TIMEOUT_MESSAGE: &str = "Query timed out.";

/// Upper bound on tool rounds within a single question, so a model that keeps
/// requesting calls cannot loop forever.
const MAX_TOOL_ROUNDS: usize = 8;

const HTTP_TIMEOUT_SECONDS: u64 = 120;

const SYSTEM_PROMPT: &str = "You are a data analyst assistant for a dbt project. \
You answer questions about the project's models, sources, metrics, lineage, and \
documentation using the metadata tools available to you. Look information up with \
the tools rather than guessing, and if the tools cannot answer a question, say so \
plainly. You are read-only: never attempt to modify the warehouse or the project, \
and never invent models, columns, or metrics the tools did not report. Keep \
answers concise and grounded in what the tools returned.";

/// One conversation with the model. Holds the full message history, so
/// follow-up questions see earlier answers and tool results.
pub struct Agent {
    session: Arc<McpSession>,
    http: reqwest::Client,
    model: String,
    base_url: String,
    api_key: String,
    registry: Option<ToolRegistry>,
    api_messages: Vec<ChatMessage>,
}

impl Agent {
    pub fn new(session: Arc<McpSession>, config: &RuntimeConfig) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECONDS))
            .build()
            .map_err(|err| format!("Failed to build HTTP client: {err}"))?;
        Ok(Self {
            session,
            http,
            model: config.model.clone(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            registry: None,
            api_messages: Vec::new(),
        })
    }

    /// Answers one question. Every failure mode is folded into the returned
    /// text; this never returns an error and never panics.
    pub async fn ask(&mut self, question: &str) -> String {
        match self.run_turn(question).await {
            Ok(answer) => answer,
            Err(err) => {
                warn!(error = %err, "Question failed");
                friendly_error(&err)
            }
        }
    }

    async fn run_turn(&mut self, question: &str) -> Result<String, String> {
        self.ensure_ready().await?;

        // The turn is staged on a local copy and committed only once it
        // produces an answer. A turn that fails, or whose future is dropped
        // by cancellation mid tool round, leaves the conversation exactly as
        // it was; a half-recorded tool round (an assistant `tool_calls`
        // message with no tool results) would poison every later request.
        let mut messages = self.api_messages.clone();
        if messages.is_empty() {
            messages.push(ChatMessage::text("system", SYSTEM_PROMPT));
        }
        messages.push(ChatMessage::text("user", question));

        let tools: Option<Vec<ChatToolDefinition>> = self
            .registry
            .as_ref()
            .map(ToolRegistry::chat_tools)
            .filter(|definitions| !definitions.is_empty());

        for round in 0..MAX_TOOL_ROUNDS {
            let request = ChatRequest {
                model: self.model.clone(),
                messages: messages.clone(),
                stream: false,
                tools: tools.clone(),
            };
            let raw =
                chat_completion(&self.http, &self.base_url, &self.api_key, &request).await?;

            let parsed: ChatResponse = match serde_json::from_value(raw.clone()) {
                Ok(parsed) => parsed,
                Err(err) => {
                    // Unexpected shape: show the document verbatim rather
                    // than losing whatever the provider sent.
                    debug!(error = %err, "Chat response did not match the expected shape");
                    let dump = pretty_dump(&raw);
                    messages.push(ChatMessage::text("assistant", dump.clone()));
                    self.api_messages = messages;
                    return Ok(dump);
                }
            };
            let choice = parsed
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| "Chat response contained no choices".to_string())?;
            let message = choice.message;

            match message.tool_calls.clone().filter(|calls| !calls.is_empty()) {
                Some(calls) => {
                    debug!(round, count = calls.len(), "Model requested tool calls");
                    messages.push(ChatMessage {
                        role: "assistant".to_string(),
                        content: message.content.clone(),
                        tool_call_id: None,
                        tool_calls: Some(calls.clone()),
                    });
                    // Calls run one at a time, in the order requested.
                    for call in &calls {
                        let registry = self
                            .registry
                            .as_ref()
                            .ok_or_else(|| "Tool registry missing".to_string())?;
                        let output = registry
                            .dispatch(
                                &self.session,
                                &call.function.name,
                                &call.function.arguments,
                            )
                            .await;
                        messages.push(ChatMessage::tool_result(&call.id, output));
                    }
                }
                None => {
                    let answer = extract_answer(message, &raw);
                    messages.push(ChatMessage::text("assistant", answer.clone()));
                    self.api_messages = messages;
                    return Ok(answer);
                }
            }
        }

        Err(format!(
            "Model kept requesting tools after {MAX_TOOL_ROUNDS} rounds"
        ))
    }

    /// Connects the session and discovers tools on first use. Cheap on every
    /// later call: connect is idempotent and the registry is kept.
    async fn ensure_ready(&mut self) -> Result<(), String> {
        self.session.connect().await?;
        if self.registry.is_none() {
            self.registry = Some(ToolRegistry::discover(&self.session).await?);
        }
        Ok(())
    }

    /// Drops the conversation so the next question starts fresh. The session
    /// and discovered tools are kept.
    pub fn reset(&mut self) {
        self.api_messages.clear();
    }

    pub fn history_len(&self) -> usize {
        self.api_messages.len()
    }
}

/// Maps an internal error string to the sentence shown to the user.
fn friendly_error(err: &str) -> String {
    if err.to_ascii_lowercase().contains("timed out") {
        TIMEOUT_MESSAGE.to_string()
    } else {
        format!("Sorry, an error occurred: {err}")
    }
}

/// The assistant text exactly as the model produced it, or the raw response
/// document when the reply carried no text.
fn extract_answer(message: crate::api::ChatResponseMessage, raw: &serde_json::Value) -> String {
    message.content.unwrap_or_else(|| pretty_dump(raw))
}

fn pretty_dump(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Races a question against a cancellation token. Cancellation wins with the
/// fixed interruption sentence; the in-flight work is dropped.
pub async fn run_cancellable<F>(token: &CancellationToken, work: F) -> String
where
    F: Future<Output = String>,
{
    tokio::select! {
        _ = token.cancelled() => INTERRUPTED_MESSAGE.to_string(),
        answer = work => answer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::client::TransportFactory;
    use crate::mcp::transport::McpTransport;
    use async_trait::async_trait;
    use rust_mcp_schema::schema_utils::{NotificationFromClient, RequestFromClient, ServerMessage};
    use serde_json::{json, Value};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::Notify;

    fn test_config() -> RuntimeConfig {
        config_for("http://127.0.0.1:1/v1")
    }

    fn config_for(base_url: &str) -> RuntimeConfig {
        RuntimeConfig {
            api_key: "test-key".to_string(),
            base_url: base_url.to_string(),
            model: "gpt-5-mini".to_string(),
            credentials_file: std::path::PathBuf::from("./.env"),
        }
    }

    /// Serves one canned chat completion per connection, in order.
    async fn spawn_chat_stub(bodies: Vec<Value>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub listener");
        let addr = listener.local_addr().expect("stub address");

        tokio::spawn(async move {
            for body in bodies {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = vec![0u8; 65536];
                let mut read = 0;
                loop {
                    let Ok(n) = socket.read(&mut buf[read..]).await else {
                        return;
                    };
                    if n == 0 {
                        break;
                    }
                    read += n;
                    if let Some(header_end) =
                        buf[..read].windows(4).position(|w| w == b"\r\n\r\n")
                    {
                        let headers = String::from_utf8_lossy(&buf[..header_end]);
                        let content_length = headers
                            .lines()
                            .find_map(|line| {
                                let lower = line.to_ascii_lowercase();
                                let value = lower.strip_prefix("content-length:")?;
                                value.trim().parse::<usize>().ok()
                            })
                            .unwrap_or(0);
                        if read >= header_end + 4 + content_length {
                            break;
                        }
                    }
                }
                let payload = body.to_string();
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    payload.len(),
                    payload
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{addr}/v1")
    }

    fn stub_server_response(result: Value) -> ServerMessage {
        serde_json::from_value(json!({"jsonrpc": "2.0", "id": 0, "result": result}))
            .expect("scripted response should parse")
    }

    /// Handshake and tool listing succeed; tool calls never complete. The
    /// notify fires when a call is reached so tests can cancel at that exact
    /// point.
    struct HangingToolTransport {
        call_reached: Arc<Notify>,
    }

    #[async_trait]
    impl McpTransport for HangingToolTransport {
        async fn request(&self, request: RequestFromClient) -> Result<ServerMessage, String> {
            match request {
                RequestFromClient::InitializeRequest(_) => Ok(stub_server_response(json!({
                    "capabilities": {"tools": {}},
                    "protocolVersion": "2025-11-25",
                    "serverInfo": {"name": "stub-metadata-server", "version": "0.1.0"}
                }))),
                RequestFromClient::ListToolsRequest(_) => Ok(stub_server_response(json!({
                    "tools": [{
                        "name": "get_model_details",
                        "description": "Describe one model",
                        "inputSchema": {"type": "object", "properties": {}}
                    }]
                }))),
                RequestFromClient::CallToolRequest(_) => {
                    self.call_reached.notify_one();
                    std::future::pending().await
                }
                _ => Err("unexpected request".to_string()),
            }
        }

        async fn notify(&self, _notification: NotificationFromClient) -> Result<(), String> {
            Ok(())
        }

        async fn shutdown(&self) {}
    }

    struct HangingToolFactory {
        call_reached: Arc<Notify>,
    }

    #[async_trait]
    impl TransportFactory for HangingToolFactory {
        async fn connect(&self) -> Result<Arc<dyn McpTransport>, String> {
            Ok(Arc::new(HangingToolTransport {
                call_reached: self.call_reached.clone(),
            }))
        }
    }

    struct RefusingFactory;

    #[async_trait]
    impl TransportFactory for RefusingFactory {
        async fn connect(&self) -> Result<Arc<dyn McpTransport>, String> {
            Err("uvx not found".to_string())
        }
    }

    #[tokio::test]
    async fn ask_folds_connection_failures_into_text() {
        let session = Arc::new(McpSession::with_factory(Arc::new(RefusingFactory)));
        let mut agent = Agent::new(session, &test_config()).unwrap();

        let answer = agent.ask("how many models are there?").await;
        assert_eq!(answer, "Sorry, an error occurred: uvx not found");
    }

    #[test]
    fn timeouts_map_to_the_fixed_sentence() {
        assert_eq!(friendly_error("Request timed out."), TIMEOUT_MESSAGE);
        assert_eq!(
            friendly_error("Metadata server request timed out."),
            TIMEOUT_MESSAGE
        );
        assert_eq!(
            friendly_error("something else broke"),
            "Sorry, an error occurred: something else broke"
        );
    }

    #[test]
    fn answer_extraction_is_verbatim() {
        use serde_json::json;

        let raw = json!({"choices": []});
        let message: crate::api::ChatResponseMessage =
            serde_json::from_value(json!({"content": "  There are 42 models.\n"})).unwrap();
        assert_eq!(extract_answer(message, &raw), "  There are 42 models.\n");

        // No text at all: the caller sees the raw document instead.
        let message: crate::api::ChatResponseMessage =
            serde_json::from_value(json!({"content": null})).unwrap();
        let dumped = extract_answer(message, &raw);
        assert!(dumped.contains("\"choices\""));
    }

    #[tokio::test]
    async fn cancelling_mid_tool_round_leaves_no_half_recorded_turn() {
        let base_url = spawn_chat_stub(vec![
            json!({
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {"name": "get_model_details", "arguments": "{}"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            }),
            json!({
                "choices": [{
                    "message": {"content": "dim_customers has 4 columns."},
                    "finish_reason": "stop"
                }]
            }),
        ])
        .await;

        let call_reached = Arc::new(Notify::new());
        let session = Arc::new(McpSession::with_factory(Arc::new(HangingToolFactory {
            call_reached: call_reached.clone(),
        })));
        let mut agent = Agent::new(session.clone(), &config_for(&base_url)).unwrap();

        // Cancel at the exact point where the model's tool call is stuck
        // waiting on the metadata server.
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            call_reached.notified().await;
            cancel.cancel();
        });

        let answer = run_cancellable(&token, agent.ask("describe dim_customers")).await;
        assert_eq!(answer, INTERRUPTED_MESSAGE);

        // The interrupted turn must not leave an assistant `tool_calls`
        // message without its tool results; the endpoint would reject every
        // request after that.
        assert_eq!(agent.history_len(), 0);

        let answer = agent.ask("describe dim_customers again").await;
        assert_eq!(answer, "dim_customers has 4 columns.");
        // system prompt, user turn, assistant answer
        assert_eq!(agent.history_len(), 3);
        assert!(session.is_connected().await);
    }

    #[tokio::test]
    async fn cancellation_wins_and_leaves_the_session_connected() {
        let (_transport, session) = crate::mcp::client::testing::connected_session();
        session.connect().await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let answer = run_cancellable(&token, std::future::pending()).await;
        assert_eq!(answer, INTERRUPTED_MESSAGE);
        assert!(session.is_connected().await);
    }

    #[tokio::test]
    async fn completed_work_wins_over_a_live_token() {
        let token = CancellationToken::new();
        let answer =
            run_cancellable(&token, async { "42 models".to_string() }).await;
        assert_eq!(answer, "42 models");
    }

    #[tokio::test]
    async fn reset_clears_history() {
        let session = Arc::new(McpSession::with_factory(Arc::new(RefusingFactory)));
        let mut agent = Agent::new(session, &test_config()).unwrap();
        assert_eq!(agent.history_len(), 0);

        // A failed turn leaves no partial history behind, not even the user
        // message that started it.
        let _ = agent.ask("anything").await;
        assert_eq!(agent.history_len(), 0);
        agent.reset();
        assert_eq!(agent.history_len(), 0);
    }
}
