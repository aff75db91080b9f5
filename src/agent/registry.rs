//! Tool registry built from server-advertised descriptors.
//!
//! Nothing in here is hardcoded per tool: whatever the metadata server
//! advertises at discovery time becomes callable, and dispatch routes by name
//! against those same records.

use crate::api::{ChatFunctionDefinition, ChatToolDefinition};
use crate::mcp::McpSession;
use rust_mcp_schema::{CallToolResult, ContentBlock, Tool};
use serde_json::{json, Map, Value};
use tracing::debug;

/// One discovered tool: the name dispatch routes on, the description shown to
/// the model, and the JSON schema for its arguments.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

impl ToolSpec {
    fn from_descriptor(tool: &Tool) -> Self {
        let input_schema = serde_json::to_value(&tool.input_schema)
            .unwrap_or_else(|_| json!({"type": "object", "properties": {}}));
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema,
        }
    }
}

#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
}

impl ToolRegistry {
    /// One `tools/list` round trip against a connected session. Server order
    /// is preserved.
    pub async fn discover(session: &McpSession) -> Result<Self, String> {
        let descriptors = session.list_tools().await?;
        let tools: Vec<ToolSpec> = descriptors.iter().map(ToolSpec::from_descriptor).collect();
        debug!(count = tools.len(), "Discovered metadata tools");
        Ok(Self { tools })
    }

    pub fn specs(&self) -> &[ToolSpec] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The discovered records rendered as chat-completion tool definitions.
    pub fn chat_tools(&self) -> Vec<ChatToolDefinition> {
        self.tools
            .iter()
            .map(|spec| ChatToolDefinition {
                kind: "function".to_string(),
                function: ChatFunctionDefinition {
                    name: spec.name.clone(),
                    description: spec.description.clone(),
                    parameters: spec.input_schema.clone(),
                },
            })
            .collect()
    }

    /// Routes one model-requested call to the session. Every failure mode
    /// (unknown name, malformed arguments, remote error) comes back as a
    /// string the model can read; this never panics and never returns `Err`.
    pub async fn dispatch(&self, session: &McpSession, name: &str, raw_arguments: &str) -> String {
        if !self.tools.iter().any(|spec| spec.name == name) {
            return dispatch_error(name, "unknown tool");
        }

        let arguments = match parse_arguments(raw_arguments) {
            Ok(arguments) => arguments,
            Err(reason) => return dispatch_error(name, &reason),
        };

        match session.call_tool(name, Some(arguments)).await {
            Ok(result) => {
                if result.is_error == Some(true) {
                    dispatch_error(name, &render_result(&result))
                } else {
                    render_result(&result)
                }
            }
            Err(reason) => dispatch_error(name, &reason),
        }
    }
}

fn dispatch_error(name: &str, reason: &str) -> String {
    format!("Error calling metadata tool '{name}': {reason}")
}

/// The model sends arguments as a JSON string; an empty or blank string means
/// no arguments.
fn parse_arguments(raw: &str) -> Result<Map<String, Value>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Map::new());
    }
    serde_json::from_str::<Map<String, Value>>(trimmed)
        .map_err(|err| format!("invalid arguments JSON: {err}"))
}

/// Text blocks joined with blank lines, or a pretty JSON dump when the result
/// carries no text at all.
fn render_result(result: &CallToolResult) -> String {
    let text_blocks: Vec<&str> = result
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::TextContent(text) => Some(text.text.as_str()),
            _ => None,
        })
        .collect();
    if text_blocks.is_empty() {
        serde_json::to_string_pretty(result).unwrap_or_else(|_| format!("{result:?}"))
    } else {
        text_blocks.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::client::testing::{connected_session, tool_json, CountingFactory, FakeTransport};
    use crate::mcp::McpSession;
    use std::sync::Arc;

    #[tokio::test]
    async fn discovery_mirrors_the_server_advertisement() {
        let (_transport, session) = connected_session();
        session.connect().await.unwrap();

        let registry = ToolRegistry::discover(&session).await.unwrap();
        assert_eq!(registry.len(), 2);

        let definitions = registry.chat_tools();
        assert_eq!(definitions[0].kind, "function");
        assert_eq!(definitions[0].function.name, "list_models");
        assert_eq!(
            definitions[0].function.description.as_deref(),
            Some("List dbt models in the project")
        );
        assert_eq!(definitions[1].function.name, "get_model_details");
        assert_eq!(definitions[1].function.parameters["type"], "object");
    }

    #[tokio::test]
    async fn dispatch_returns_tool_output() {
        let (_transport, session) = connected_session();
        session.connect().await.unwrap();
        let registry = ToolRegistry::discover(&session).await.unwrap();

        let output = registry.dispatch(&session, "list_models", "{}").await;
        assert_eq!(output, "result for list_models");

        // Blank argument strings mean no arguments.
        let output = registry.dispatch(&session, "list_models", "").await;
        assert_eq!(output, "result for list_models");
    }

    #[tokio::test]
    async fn dispatch_reports_unknown_tools_without_io() {
        let (transport, session) = connected_session();
        session.connect().await.unwrap();
        let registry = ToolRegistry::discover(&session).await.unwrap();
        let before = transport.request_count().await;

        let output = registry.dispatch(&session, "drop_warehouse", "{}").await;
        assert_eq!(
            output,
            "Error calling metadata tool 'drop_warehouse': unknown tool"
        );
        assert_eq!(transport.request_count().await, before);
    }

    #[tokio::test]
    async fn dispatch_reports_malformed_arguments() {
        let (_transport, session) = connected_session();
        session.connect().await.unwrap();
        let registry = ToolRegistry::discover(&session).await.unwrap();

        let output = registry
            .dispatch(&session, "list_models", "{not json")
            .await;
        assert!(output.starts_with("Error calling metadata tool 'list_models':"));
        assert!(output.contains("invalid arguments JSON"));
    }

    #[tokio::test]
    async fn dispatch_reports_remote_failures() {
        let transport = FakeTransport::failing_calls(
            "server exploded",
            vec![tool_json("list_models", "List dbt models in the project")],
        );
        let session = McpSession::with_factory(Arc::new(CountingFactory::new(transport)));
        session.connect().await.unwrap();
        let registry = ToolRegistry::discover(&session).await.unwrap();

        let output = registry.dispatch(&session, "list_models", "{}").await;
        assert_eq!(
            output,
            "Error calling metadata tool 'list_models': server exploded"
        );
    }
}
