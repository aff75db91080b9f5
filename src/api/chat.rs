//! Non-streaming chat completion over HTTP.

use crate::api::ChatRequest;
use serde_json::Value;
use tracing::debug;

/// Joins a base URL and endpoint path without doubling or dropping slashes.
pub fn construct_api_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

/// Sends one chat completion request and returns the raw response document.
/// Callers deserialize the parts they need so that an unexpected shape can
/// still be shown to the user verbatim.
pub async fn chat_completion(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    request: &ChatRequest,
) -> Result<Value, String> {
    let url = construct_api_url(base_url, "chat/completions");
    debug!(url = %url, model = %request.model, "Sending chat completion request");

    let response = client
        .post(&url)
        .bearer_auth(api_key)
        .json(request)
        .send()
        .await
        .map_err(|err| {
            if err.is_timeout() {
                "Request timed out.".to_string()
            } else if err.is_connect() {
                format!("Could not connect to {url}: {err}")
            } else {
                format!("Chat request failed: {err}")
            }
        })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| format!("Failed to read chat response: {err}"))?;

    if !status.is_success() {
        return Err(format!(
            "Chat endpoint returned {}: {}",
            status,
            error_summary(&body)
        ));
    }

    serde_json::from_str(&body).map_err(|err| format!("Invalid chat response JSON: {err}"))
}

/// Pulls the provider's error message out of a failure body when it has the
/// conventional `{"error": {"message": ...}}` shape.
fn error_summary(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = value
            .get("error")
            .and_then(|error| error.get("message"))
            .and_then(|message| message.as_str())
        {
            return message.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "(empty response body)".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_handles_trailing_slash() {
        assert_eq!(
            construct_api_url("https://api.openai.com/v1/", "chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            construct_api_url("https://api.openai.com/v1", "chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn error_summary_extracts_provider_message() {
        let body = r#"{"error": {"message": "model not found", "type": "invalid_request_error"}}"#;
        assert_eq!(error_summary(body), "model not found");
    }

    #[test]
    fn error_summary_falls_back_to_raw_body() {
        assert_eq!(error_summary("  upstream exploded  "), "upstream exploded");
        assert_eq!(error_summary(""), "(empty response body)");
    }
}
