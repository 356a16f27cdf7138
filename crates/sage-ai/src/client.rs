//! Streaming completion client over an OpenAI-compatible wire protocol

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use std::pin::Pin;
use tokio_stream::Stream;

use crate::{
    error::{Error, Result},
    types::CompletionRequest,
};

/// A finite, non-restartable sequence of text deltas. Empty fragments
/// are filtered at the source and never yielded.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// The completion boundary the orchestrator depends on.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Start a streaming completion for the given request.
    ///
    /// An `Err` return means the request itself could not be started;
    /// an `Err` item inside the stream means the stream died mid-flight.
    /// The client never touches conversation state either way.
    async fn stream_completion(&self, request: CompletionRequest) -> Result<DeltaStream>;
}

/// SSE client for OpenAI-compatible `/chat/completions` endpoints.
///
/// The reference deployment pointed this at DeepSeek, which speaks the
/// OpenAI protocol; any compatible endpoint works.
pub struct SseClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl SseClient {
    /// Create a new client with an API key and base URL
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    /// Create from `SAGE_API_KEY` and `SAGE_BASE_URL` environment variables
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("SAGE_API_KEY").map_err(|_| Error::InvalidApiKey)?;
        let base_url = std::env::var("SAGE_BASE_URL")
            .unwrap_or_else(|_| "https://api.deepseek.com/v1".to_string());
        Ok(Self::new(api_key, base_url))
    }
}

#[async_trait]
impl CompletionClient for SseClient {
    async fn stream_completion(&self, request: CompletionRequest) -> Result<DeltaStream> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "stream": true,
            "max_tokens": request.max_tokens,
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Authorization",
            format!("Bearer {}", self.api_key)
                .parse()
                .map_err(|_| Error::InvalidApiKey)?,
        );
        headers.insert("content-type", "application/json".parse().unwrap());

        let request_builder = self
            .client
            .post(&url)
            .headers(headers)
            .timeout(request.timeout)
            .json(&body);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(delta_stream(event_source)))
    }
}

/// Convert raw SSE events into a stream of non-empty text deltas.
fn delta_stream(mut event_source: EventSource) -> impl Stream<Item = Result<String>> + Send {
    stream! {
        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(message)) => {
                    if message.data == "[DONE]" {
                        break;
                    }
                    match parse_delta(&message.data) {
                        Ok(Some(text)) if !text.is_empty() => yield Ok(text),
                        Ok(_) => {}
                        Err(e) => {
                            // A single malformed chunk is not fatal
                            tracing::debug!("skipping unparseable chunk: {}", e);
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    let body = response.text().await.unwrap_or_default();
                    yield Err(parse_api_error(status, &body));
                    break;
                }
                Err(e) => {
                    yield Err(Error::Sse(e.to_string()));
                    break;
                }
            }
        }
        event_source.close();
    }
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

/// Turn a failed-status response body into an [`Error`]. OpenAI-shaped
/// endpoints return `{"error": {"message", "type", ...}}`; anything
/// else falls back to the raw status and body.
fn parse_api_error(status: reqwest::StatusCode, body: &str) -> Error {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => Error::api(
            parsed.error.error_type.unwrap_or_else(|| status.to_string()),
            parsed.error.message,
        ),
        Err(_) => Error::Sse(format!("HTTP {}: {}", status, body)),
    }
}

/// Extract the text delta from one SSE data payload, if any.
fn parse_delta(data: &str) -> Result<Option<String>> {
    let chunk: ChatChunk = serde_json::from_str(data)?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_delta_with_content() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"}}]}"#;
        assert_eq!(parse_delta(data).unwrap(), Some("Hello".to_string()));
    }

    #[test]
    fn test_parse_delta_empty_content() {
        let data = r#"{"choices":[{"delta":{"content":""}}]}"#;
        assert_eq!(parse_delta(data).unwrap(), Some(String::new()));
    }

    #[test]
    fn test_parse_delta_missing_content() {
        // Final chunks carry a role or finish_reason but no content
        let data = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert_eq!(parse_delta(data).unwrap(), None);
    }

    #[test]
    fn test_parse_delta_no_choices() {
        let data = r#"{"choices":[]}"#;
        assert_eq!(parse_delta(data).unwrap(), None);
    }

    #[test]
    fn test_parse_delta_malformed() {
        assert!(parse_delta("not json").is_err());
    }

    #[test]
    fn test_parse_api_error_openai_shape() {
        let body = r#"{"error":{"message":"Insufficient balance","type":"invalid_request_error"}}"#;
        let err = parse_api_error(reqwest::StatusCode::PAYMENT_REQUIRED, body);
        match err {
            Error::Api {
                error_type,
                message,
            } => {
                assert_eq!(error_type, "invalid_request_error");
                assert_eq!(message, "Insufficient balance");
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_api_error_missing_type_uses_status() {
        let body = r#"{"error":{"message":"nope"}}"#;
        let err = parse_api_error(reqwest::StatusCode::UNAUTHORIZED, body);
        assert_eq!(
            err.to_string(),
            "API error: nope (type: 401 Unauthorized)"
        );
    }

    #[test]
    fn test_parse_api_error_unshaped_body_falls_back() {
        let err = parse_api_error(reqwest::StatusCode::BAD_GATEWAY, "<html>gateway</html>");
        match err {
            Error::Sse(message) => {
                assert!(message.contains("502"));
                assert!(message.contains("<html>gateway</html>"));
            }
            other => panic!("expected Sse error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_delta_multibyte() {
        let data = r#"{"choices":[{"delta":{"content":"好的，我将开始"}}]}"#;
        assert_eq!(parse_delta(data).unwrap(), Some("好的，我将开始".to_string()));
    }
}
