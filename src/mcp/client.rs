//! Session client for the metadata server.
//!
//! One [`McpSession`] owns one subprocess connection. The entry point
//! constructs a single session and shares it (`Arc`) with every consumer, so
//! the process never spawns more than one metadata server at a time.

use crate::core::config::LaunchSpec;
use crate::mcp::protocol;
use crate::mcp::transport::{McpTransport, StdioTransport};
use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{NotificationFromClient, RequestFromClient};
use rust_mcp_schema::{
    CallToolRequestParams, CallToolResult, ClientCapabilities, Implementation,
    InitializeRequestParams, InitializeResult, Tool, LATEST_PROTOCOL_VERSION,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const NOT_CONNECTED: &str = "Not connected to metadata server. Call connect() first.";

/// Creates transports on demand so [`McpSession::connect`] can be exercised
/// without launching a real subprocess.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn McpTransport>, String>;
}

pub struct StdioFactory {
    spec: LaunchSpec,
}

impl StdioFactory {
    pub fn new(spec: LaunchSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl TransportFactory for StdioFactory {
    async fn connect(&self) -> Result<Arc<dyn McpTransport>, String> {
        let transport = StdioTransport::spawn(&self.spec).await?;
        Ok(transport)
    }
}

#[derive(Default)]
struct SessionInner {
    connected: bool,
    transport: Option<Arc<dyn McpTransport>>,
    server_details: Option<InitializeResult>,
}

pub struct McpSession {
    factory: Arc<dyn TransportFactory>,
    inner: Mutex<SessionInner>,
}

impl McpSession {
    pub fn new(spec: LaunchSpec) -> Self {
        Self::with_factory(Arc::new(StdioFactory::new(spec)))
    }

    pub fn with_factory(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            inner: Mutex::new(SessionInner::default()),
        }
    }

    /// Connects to the metadata server. Idempotent: a second call while
    /// connected logs a notice and returns without spawning anything. On any
    /// handshake failure the partially-built transport is torn down and the
    /// session stays disconnected.
    pub async fn connect(&self) -> Result<(), String> {
        let mut inner = self.inner.lock().await;
        if inner.connected {
            info!("Already connected to metadata server");
            return Ok(());
        }

        let transport = self.factory.connect().await?;
        match self.handshake(transport.as_ref()).await {
            Ok(details) => {
                info!(
                    server = %details.server_info.name,
                    protocol_version = %details.protocol_version,
                    "Connected to metadata server"
                );
                inner.transport = Some(transport);
                inner.server_details = Some(details);
                inner.connected = true;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "Metadata server handshake failed");
                transport.shutdown().await;
                Err(err)
            }
        }
    }

    async fn handshake(&self, transport: &dyn McpTransport) -> Result<InitializeResult, String> {
        let params = InitializeRequestParams {
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "metascout".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("Metascout MCP Client".to_string()),
                description: Some("Metascout warehouse metadata client".to_string()),
                icons: Vec::new(),
                website_url: None,
            },
            meta: None,
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
        };

        let response = transport
            .request(RequestFromClient::InitializeRequest(params))
            .await?;
        let details = protocol::parse_initialize_result(response)?;
        transport
            .notify(NotificationFromClient::InitializedNotification(None))
            .await?;
        Ok(details)
    }

    /// One `tools/list` round trip. Descriptors come back in server order,
    /// unfiltered and uncached.
    pub async fn list_tools(&self) -> Result<Vec<Tool>, String> {
        let transport = self.require_transport().await?;
        let response = transport
            .request(RequestFromClient::ListToolsRequest(None))
            .await?;
        let list = protocol::parse_list_tools(response)?;
        Ok(list.tools)
    }

    /// Invokes a named remote tool. An omitted argument mapping is sent as an
    /// empty one. Remote failures are logged and surfaced; no retry.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult, String> {
        let transport = self.require_transport().await?;
        let params =
            CallToolRequestParams::new(name).with_arguments(arguments.unwrap_or_default());
        let response = transport
            .request(RequestFromClient::CallToolRequest(params))
            .await
            .map_err(|err| {
                warn!(tool = %name, error = %err, "Tool call failed");
                err
            })?;
        protocol::parse_call_tool(response).map_err(|err| {
            warn!(tool = %name, error = %err, "Tool call returned an error");
            err
        })
    }

    /// Releases the transport and resets the session to its initial state.
    /// Never fails; safe to call when never connected.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(transport) = inner.transport.take() {
            transport.shutdown().await;
            debug!("Metadata server session closed");
        }
        inner.server_details = None;
        inner.connected = false;
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.connected
    }

    pub async fn server_details(&self) -> Option<InitializeResult> {
        self.inner.lock().await.server_details.clone()
    }

    async fn require_transport(&self) -> Result<Arc<dyn McpTransport>, String> {
        let inner = self.inner.lock().await;
        if !inner.connected {
            return Err(NOT_CONNECTED.to_string());
        }
        inner
            .transport
            .clone()
            .ok_or_else(|| NOT_CONNECTED.to_string())
    }
}
