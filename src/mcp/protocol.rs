//! Parsing helpers for responses coming back from the metadata server.

use rust_mcp_schema::schema_utils::ServerMessage;
use rust_mcp_schema::{CallToolResult, InitializeResult, ListToolsResult, RpcError};
use serde_json::Value;

pub(crate) fn parse_initialize_result(message: ServerMessage) -> Result<InitializeResult, String> {
    let value = parse_response_value(message)?;
    let result =
        serde_json::from_value::<InitializeResult>(value).map_err(|err| err.to_string())?;
    if result.protocol_version.trim().is_empty() {
        return Err("Unexpected initialize response.".to_string());
    }
    Ok(result)
}

pub(crate) fn parse_list_tools(message: ServerMessage) -> Result<ListToolsResult, String> {
    parse_response(message)
}

pub(crate) fn parse_call_tool(message: ServerMessage) -> Result<CallToolResult, String> {
    parse_response(message)
}

fn parse_response<T: serde::de::DeserializeOwned>(message: ServerMessage) -> Result<T, String> {
    let value = parse_response_value(message)?;
    serde_json::from_value::<T>(value).map_err(|err| err.to_string())
}

pub(crate) fn parse_response_value(message: ServerMessage) -> Result<Value, String> {
    match message {
        ServerMessage::Response(response) => {
            serde_json::to_value(&response.result).map_err(|err| err.to_string())
        }
        ServerMessage::Error(error) => Err(format_rpc_error(&error.error)),
        other => Err(format_unexpected_server_message(&other)),
    }
}

pub(crate) fn format_unexpected_server_message(message: &ServerMessage) -> String {
    format!("Unexpected metadata server message: {message:?}")
}

pub(crate) fn format_rpc_error(error: &RpcError) -> String {
    let mut output = format!("Metadata server error {}: {}", error.code, error.message);
    if let Some(data) = &error.data {
        let details = data
            .get("details")
            .and_then(|value| value.as_str())
            .map(|value| value.to_string())
            .or_else(|| data.as_str().map(|value| value.to_string()))
            .or_else(|| serde_json::to_string_pretty(data).ok());

        if let Some(details) = details {
            if !details.is_empty() {
                output.push('\n');
                output.push_str(&details);
            }
        }
    }
    output
}
