//! Stdio transport to the metadata server subprocess.
//!
//! The subprocess speaks newline-delimited JSON-RPC on its standard streams.
//! One reader task owns stdout and routes responses to pending requests;
//! writes go through a mutex-guarded stdin handle. When the subprocess exits
//! for any reason, the reader task drains the pending map so callers fail
//! instead of hanging.

use crate::core::config::LaunchSpec;
use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ServerMessage,
};
use rust_mcp_schema::RequestId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

const REQUEST_TIMEOUT_SECONDS: u64 = 60;
const WRITE_TIMEOUT_SECONDS: u64 = 10;

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ServerMessage>>>>;

/// Transport seam between the session client and the subprocess. Tests swap
/// in a scripted implementation.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn request(&self, request: RequestFromClient) -> Result<ServerMessage, String>;
    async fn notify(&self, notification: NotificationFromClient) -> Result<(), String>;
    /// Tears the transport down. Never fails; teardown problems are logged
    /// and swallowed so shutdown cannot block process exit.
    async fn shutdown(&self);
}

pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    pending: PendingMap,
    next_request_id: AtomicI64,
    child: Mutex<Option<Child>>,
}

impl StdioTransport {
    pub async fn spawn(spec: &LaunchSpec) -> Result<Arc<Self>, String> {
        debug!(command = %spec.command, args = ?spec.args, "Starting metadata server");
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| err.to_string())?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| "Unable to retrieve stdin.".to_string())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| "Unable to retrieve stdout.".to_string())?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| "Unable to retrieve stderr.".to_string())?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let transport = Arc::new(Self {
            stdin: Mutex::new(stdin),
            pending: pending.clone(),
            next_request_id: AtomicI64::new(0),
            child: Mutex::new(Some(child)),
        });

        Self::spawn_stdout_reader(pending, stdout);
        Self::spawn_stderr_drain(stderr);

        Ok(transport)
    }

    fn spawn_stdout_reader(pending: PendingMap, stdout: tokio::process::ChildStdout) {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                let value = match serde_json::from_str::<serde_json::Value>(&line) {
                    Ok(value) => value,
                    Err(_) => continue,
                };
                if let Some(items) = value.as_array() {
                    for item in items {
                        if let Ok(message) = serde_json::from_value::<ServerMessage>(item.clone()) {
                            Self::dispatch_message(&pending, message).await;
                        }
                    }
                } else if let Ok(message) = serde_json::from_value::<ServerMessage>(value) {
                    Self::dispatch_message(&pending, message).await;
                }
            }

            // Subprocess stdout closed; fail any caller still waiting.
            let mut pending = pending.lock().await;
            pending.clear();
            debug!("Metadata server stdout closed");
        });
    }

    fn spawn_stderr_drain(stderr: tokio::process::ChildStderr) {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                debug!(stderr = %line, "Metadata server stderr");
            }
        });
    }

    async fn dispatch_message(pending: &PendingMap, message: ServerMessage) {
        match &message {
            ServerMessage::Response(response) => {
                debug!(response_id = ?response.id, "Received metadata server response");
                if let Some(tx) = pending.lock().await.remove(&response.id) {
                    let _ = tx.send(message);
                }
            }
            ServerMessage::Error(error) => {
                debug!(
                    error_id = ?error.id,
                    error_code = error.error.code,
                    "Received metadata server error"
                );
                if let Some(id) = error.id.as_ref() {
                    if let Some(tx) = pending.lock().await.remove(id) {
                        let _ = tx.send(message);
                    }
                }
            }
            ServerMessage::Request(request) => {
                // This client advertises no capabilities; decline by ignoring.
                debug!(method = %request.method(), "Ignoring metadata server request");
            }
            ServerMessage::Notification(_) => {
                debug!("Received metadata server notification");
            }
        }
    }

    fn next_request_id(&self) -> RequestId {
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        RequestId::Integer(id)
    }

    async fn write_payload(&self, payload: &str) -> Result<(), String> {
        let lock_timeout = tokio::time::Duration::from_secs(WRITE_TIMEOUT_SECONDS);
        let write_timeout = tokio::time::Duration::from_secs(WRITE_TIMEOUT_SECONDS);
        let mut stdin = match tokio::time::timeout(lock_timeout, self.stdin.lock()).await {
            Ok(stdin) => stdin,
            Err(_) => return Err("Timed out waiting for metadata server stdin lock.".to_string()),
        };
        tokio::time::timeout(write_timeout, stdin.write_all(payload.as_bytes()))
            .await
            .map_err(|_| "Timed out writing metadata server request.".to_string())?
            .map_err(|err| err.to_string())?;
        tokio::time::timeout(write_timeout, stdin.write_all(b"\n"))
            .await
            .map_err(|_| "Timed out writing metadata server request newline.".to_string())?
            .map_err(|err| err.to_string())?;
        tokio::time::timeout(write_timeout, stdin.flush())
            .await
            .map_err(|_| "Timed out flushing metadata server request.".to_string())?
            .map_err(|err| err.to_string())?;
        Ok(())
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, request: RequestFromClient) -> Result<ServerMessage, String> {
        let request_id = self.next_request_id();
        debug!(request_id = ?request_id, "Sending metadata server request");
        let message = ClientMessage::from_message(
            MessageFromClient::RequestFromClient(request),
            Some(request_id.clone()),
        )
        .map_err(|err| err.to_string())?;
        let payload = serde_json::to_string(&message).map_err(|err| err.to_string())?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(request_id.clone(), tx);
        }

        if let Err(err) = self.write_payload(&payload).await {
            let mut pending = self.pending.lock().await;
            pending.remove(&request_id);
            return Err(err);
        }

        let timeout = tokio::time::Duration::from_secs(REQUEST_TIMEOUT_SECONDS);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(message)) => {
                debug!(request_id = ?request_id, "Metadata server response received");
                Ok(message)
            }
            Ok(Err(_)) => Err("Metadata server response channel closed.".to_string()),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                pending.remove(&request_id);
                Err("Metadata server request timed out.".to_string())
            }
        }
    }

    async fn notify(&self, notification: NotificationFromClient) -> Result<(), String> {
        let message = ClientMessage::from_message(
            MessageFromClient::NotificationFromClient(notification),
            None,
        )
        .map_err(|err| err.to_string())?;
        let payload = serde_json::to_string(&message).map_err(|err| err.to_string())?;
        self.write_payload(&payload).await
    }

    async fn shutdown(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(err) = child.start_kill() {
                warn!(error = %err, "Failed to signal metadata server shutdown");
            }
            if let Err(err) = child.wait().await {
                warn!(error = %err, "Failed to reap metadata server process");
            } else {
                debug!("Metadata server connection closed");
            }
        }
        let mut pending = self.pending.lock().await;
        pending.clear();
    }
}
