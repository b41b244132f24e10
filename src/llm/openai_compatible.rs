//! Shared Chat Completions plumbing for the OpenAI direct adapter and the
//! OpenRouter gateway, which speak the same wire protocol.

use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, ImageAttachment, ProviderRequest, ProviderResponse, Role, StreamEvent,
    StreamUsage, check_status, estimate_tokens, http_client, read_json, with_deadline,
};

/// HTTP client bound to one Chat Completions endpoint.
pub(crate) struct ChatCompletionsClient {
    provider: &'static str,
    client: Client,
    api_key: SecretString,
    base_url: String,
    timeout: Duration,
    extra_headers: Vec<(String, String)>,
}

impl ChatCompletionsClient {
    pub(crate) fn new(
        provider: &'static str,
        api_key: SecretString,
        base_url: impl Into<String>,
        timeout: Duration,
        extra_headers: Vec<(String, String)>,
    ) -> Self {
        Self {
            provider,
            client: http_client(timeout),
            api_key,
            base_url: base_url.into(),
            timeout,
            extra_headers,
        }
    }

    /// Construct the completions URL.
    /// Strips a trailing `/v1` from base_url to avoid a double `/v1`.
    fn api_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        format!("{}/v1/chat/completions", base)
    }

    pub(crate) async fn send(&self, body: &ChatRequest) -> Result<reqwest::Response, LlmError> {
        let url = self.api_url();
        tracing::debug!(provider = self.provider, model = %body.model, stream = body.stream, "Sending chat completion request");

        let mut request = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(body);
        for (name, value) in &self.extra_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = with_deadline(request, body.stream, self.timeout)
            .send()
            .await?;
        check_status(self.provider, response).await
    }

    pub(crate) async fn complete(&self, body: &ChatRequest) -> Result<ProviderResponse, LlmError> {
        let response = self.send(body).await?;
        let parsed: ChatResponse = read_json(self.provider, response).await?;
        into_provider_response(self.provider, body, parsed)
    }
}

// -- Chat Completions request/response types --

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageRequest>,
}

/// Which field carries the output limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenLimitField {
    MaxTokens,
    MaxCompletionTokens,
}

impl ChatRequest {
    pub(crate) fn build(
        model: &str,
        request: &ProviderRequest,
        limit_field: TokenLimitField,
        stream: bool,
    ) -> Self {
        let (max_tokens, max_completion_tokens) = match limit_field {
            TokenLimitField::MaxTokens => (Some(request.max_tokens), None),
            TokenLimitField::MaxCompletionTokens => (None, Some(request.max_tokens)),
        };
        Self {
            model: model.to_string(),
            messages: convert_messages(request.system.as_deref(), &request.messages, &request.images),
            max_tokens,
            max_completion_tokens,
            temperature: request.temperature,
            stream,
            usage: None,
        }
    }

    /// Concatenated prompt text, for estimating input tokens when the
    /// backend reports none.
    pub(crate) fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| match &m.content {
                ApiContent::Text(text) => text.as_str(),
                ApiContent::Parts(parts) => parts
                    .iter()
                    .find_map(|p| match p {
                        ContentPart::Text { text } => Some(text.as_str()),
                        ContentPart::ImageUrl { .. } => None,
                    })
                    .unwrap_or(""),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct UsageRequest {
    pub include: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct ApiMessage {
    role: &'static str,
    content: ApiContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<ApiUsage>,
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    message: String,
    code: Option<serde_json::Value>,
}

// -- Conversion --

/// Convert to Chat Completions messages. The system prompt becomes the first
/// message; images become `image_url` parts on the last user message.
fn convert_messages(
    system: Option<&str>,
    messages: &[ChatMessage],
    images: &[ImageAttachment],
) -> Vec<ApiMessage> {
    let last_user = messages.iter().rposition(|m| m.role == Role::User);
    let mut out = Vec::with_capacity(messages.len() + 1);

    if let Some(system) = system {
        out.push(ApiMessage {
            role: "system",
            content: ApiContent::Text(system.to_string()),
        });
    }

    for (i, msg) in messages.iter().enumerate() {
        let role = match msg.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let content = if Some(i) == last_user && !images.is_empty() {
            let mut parts = vec![ContentPart::Text {
                text: msg.content.clone(),
            }];
            parts.extend(images.iter().map(|image| ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: image.as_url(),
                },
            }));
            ApiContent::Parts(parts)
        } else {
            ApiContent::Text(msg.content.clone())
        };
        out.push(ApiMessage { role, content });
    }
    out
}

fn into_provider_response(
    provider: &str,
    request: &ChatRequest,
    response: ChatResponse,
) -> Result<ProviderResponse, LlmError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason: "No choices in response".to_string(),
        })?;
    let content = choice.message.content.unwrap_or_default();

    let (input_tokens, output_tokens) = match response.usage {
        Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
        None => (
            estimate_tokens(&request.prompt_text()),
            estimate_tokens(&content),
        ),
    };

    Ok(ProviderResponse {
        content,
        input_tokens,
        output_tokens,
    })
}

/// Parse one streamed chunk. Any usage present is cumulative for the call.
pub(crate) fn parse_chunk(provider: &str, data: &str) -> Result<Vec<StreamEvent>, LlmError> {
    let chunk: ChatChunk = serde_json::from_str(data).map_err(|e| LlmError::InvalidResponse {
        provider: provider.to_string(),
        reason: format!("bad stream chunk: {e}"),
    })?;

    if let Some(error) = chunk.error {
        let is_rate_limit = error
            .code
            .as_ref()
            .is_some_and(|c| c.as_u64() == Some(429) || c.as_str() == Some("rate_limit_exceeded"));
        if is_rate_limit {
            return Err(LlmError::RateLimited {
                provider: provider.to_string(),
                retry_after: None,
                reason: error.message,
            });
        }
        return Err(LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: error.message,
        });
    }

    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();
    let usage = chunk.usage.map(|u| StreamUsage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
    });

    if text.is_empty() && usage.is_none() {
        return Ok(Vec::new());
    }
    Ok(vec![StreamEvent::Delta { text, usage }])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ProviderRequest {
        ProviderRequest {
            system: Some("You are terse.".to_string()),
            messages: vec![
                ChatMessage::user("first"),
                ChatMessage::assistant("ok"),
                ChatMessage::user("describe"),
            ],
            images: vec![ImageAttachment::from_base64("image/jpeg", "QUJD")],
            max_tokens: 100,
            temperature: None,
        }
    }

    #[test]
    fn test_system_first_and_images_on_last_user() {
        let body = ChatRequest::build("gpt-4o", &request(), TokenLimitField::MaxTokens, false);
        let json = serde_json::to_value(&body).unwrap();
        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "first");
        let parts = messages[3]["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/jpeg;base64,QUJD");
        assert_eq!(json["max_tokens"], 100);
        assert!(json.get("max_completion_tokens").is_none());
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_completion_token_field() {
        let body = ChatRequest::build(
            "gpt-5",
            &request(),
            TokenLimitField::MaxCompletionTokens,
            true,
        );
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["max_completion_tokens"], 100);
        assert!(json.get("max_tokens").is_none());
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_api_url_strips_v1() {
        let client = ChatCompletionsClient::new(
            "test",
            SecretString::from("k".to_string()),
            "https://openrouter.ai/api/v1/",
            Duration::from_secs(5),
            Vec::new(),
        );
        assert_eq!(client.api_url(), "https://openrouter.ai/api/v1/chat/completions");
    }

    #[test]
    fn test_response_without_usage_is_estimated() {
        let body = ChatRequest::build("m", &request(), TokenLimitField::MaxTokens, false);
        let response: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"twelve chars"}}]}"#,
        )
        .unwrap();
        let out = into_provider_response("test", &body, response).unwrap();
        assert_eq!(out.content, "twelve chars");
        assert_eq!(out.output_tokens, 3);
        assert!(out.input_tokens > 0);
    }

    #[test]
    fn test_empty_choices_is_invalid() {
        let body = ChatRequest::build("m", &request(), TokenLimitField::MaxTokens, false);
        let response: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        let err = into_provider_response("test", &body, response).unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse { .. }));
    }

    #[test]
    fn test_parse_chunk_shapes() {
        assert_eq!(
            parse_chunk("t", r#"{"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap(),
            vec![StreamEvent::Delta {
                text: "Hel".to_string(),
                usage: None
            }]
        );
        assert_eq!(
            parse_chunk(
                "t",
                r#"{"choices":[{"delta":{"content":"lo"}}],"usage":{"prompt_tokens":10,"completion_tokens":2}}"#
            )
            .unwrap(),
            vec![StreamEvent::Delta {
                text: "lo".to_string(),
                usage: Some(StreamUsage {
                    input_tokens: 10,
                    output_tokens: 2
                })
            }]
        );
        assert!(
            parse_chunk("t", r#"{"choices":[{"delta":{"role":"assistant"}}]}"#)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_parse_chunk_error() {
        let err = parse_chunk("t", r#"{"error":{"message":"Rate limited","code":429}}"#).unwrap_err();
        assert!(matches!(err, LlmError::RateLimited { .. }));
        let err = parse_chunk("t", r#"{"error":{"message":"upstream died","code":502}}"#).unwrap_err();
        assert_eq!(err.to_string(), "Provider t request failed: upstream died");
    }
}
