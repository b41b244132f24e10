//! Provider trait and the common request/response shapes adapters translate.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message in a conversation. The system prompt travels separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Where an image's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

/// An image attached to the user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub source: ImageSource,
}

impl ImageAttachment {
    /// Encode raw image bytes.
    pub fn from_bytes(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::from_base64(
            media_type,
            base64::engine::general_purpose::STANDARD.encode(bytes),
        )
    }

    /// Wrap an already base64-encoded payload.
    pub fn from_base64(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            source: ImageSource::Base64 {
                media_type: media_type.into(),
                data: data.into(),
            },
        }
    }

    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            source: ImageSource::Url { url: url.into() },
        }
    }

    /// URL form accepted by OpenAI-style `image_url` parts.
    pub fn as_url(&self) -> String {
        match &self.source {
            ImageSource::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
            ImageSource::Url { url } => url.clone(),
        }
    }
}

/// Common request shape every adapter accepts. Whether the backend streams is
/// decided by calling [`LlmProvider::stream`] instead of [`LlmProvider::complete`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    /// Attached to the last user message.
    pub images: Vec<ImageAttachment>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

/// Common response shape every adapter returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Cumulative usage as reported on a streamed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// One incremental event from a streaming backend.
///
/// Backends report usage in different places: on `Start`/`End`, cumulatively on
/// every `Delta`, or not at all. The reconciler merges whichever arrive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Start { input_tokens: Option<u32> },
    Delta {
        text: String,
        usage: Option<StreamUsage>,
    },
    End { output_tokens: Option<u32> },
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

/// A backend transport able to serve catalog models.
///
/// `model` is the id to send on the wire; the router resolves it from the
/// catalog so the adapter never has to interpret gateway or native ids.
/// Errors are returned as produced by the transport so the fallback
/// controller can classify them.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name used in errors and logs.
    fn name(&self) -> &str;

    async fn complete(
        &self,
        model: &str,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, LlmError>;

    /// Open a stream. Connection and HTTP status failures surface here; failures
    /// after the stream is open arrive as `Err` items.
    async fn stream(&self, model: &str, request: &ProviderRequest)
    -> Result<EventStream, LlmError>;
}

/// Map a non-success HTTP response onto the error taxonomy.
///
/// The status line and (truncated) body travel in every error's `reason` so
/// the backend's own message reaches the caller. Successful responses are
/// handed back unchanged.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    let reason = format!("HTTP {}: {}", status, truncate(&body, 512));

    match status.as_u16() {
        401 | 403 => Err(LlmError::AuthFailed {
            provider: provider.to_string(),
            reason,
        }),
        429 => Err(LlmError::RateLimited {
            provider: provider.to_string(),
            retry_after,
            reason,
        }),
        _ => Err(LlmError::RequestFailed {
            provider: provider.to_string(),
            reason,
        }),
    }
}

/// Decode a successful JSON body.
pub(crate) async fn read_json<R: for<'de> Deserialize<'de>>(
    provider: &str,
    response: reqwest::Response,
) -> Result<R, LlmError> {
    let text = response.text().await?;
    if tracing::enabled!(tracing::Level::TRACE) {
        tracing::trace!(provider, body = %text, "response body");
    }
    serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse {
        provider: provider.to_string(),
        reason: format!("JSON parse error: {}. Raw: {}", e, truncate(&text, 512)),
    })
}

/// Turn an SSE response into an [`EventStream`].
///
/// `parse` receives each event's name and data and returns zero or more
/// normalized events. A `[DONE]` sentinel ends the stream.
pub(crate) fn sse_stream<F>(provider: &'static str, response: reqwest::Response, mut parse: F) -> EventStream
where
    F: FnMut(&str, &str) -> Result<Vec<StreamEvent>, LlmError> + Send + 'static,
{
    let events = response
        .bytes_stream()
        .eventsource()
        .take_while(|item| {
            let done = matches!(item, Ok(event) if event.data.trim() == "[DONE]");
            futures::future::ready(!done)
        })
        .flat_map(move |item| {
            let out: Vec<Result<StreamEvent, LlmError>> = match item {
                Ok(event) => match parse(&event.event, &event.data) {
                    Ok(events) => events.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                },
                Err(EventStreamError::Transport(e)) => vec![Err(LlmError::Http(e))],
                Err(e) => vec![Err(LlmError::InvalidResponse {
                    provider: provider.to_string(),
                    reason: format!("malformed event stream: {e}"),
                })],
            };
            futures::stream::iter(out)
        });
    Box::pin(events)
}

/// Rough token count for text a backend did not report usage for.
pub fn estimate_tokens(text: &str) -> u32 {
    u32::try_from(text.chars().count() / 4).unwrap_or(u32::MAX)
}

/// Build the shared HTTP client for an adapter.
///
/// Only connecting and each individual read are bounded here. A streamed body
/// may stay open for as long as the backend keeps producing, so the overall
/// deadline is applied per request by [`with_deadline`] for completions.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to build HTTP client with timeouts: {e}; using default");
            reqwest::Client::new()
        })
}

/// Bound a non-streaming request by `timeout` end to end.
pub(crate) fn with_deadline(
    request: reqwest::RequestBuilder,
    stream: bool,
    timeout: Duration,
) -> reqwest::RequestBuilder {
    if stream { request } else { request.timeout(timeout) }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
