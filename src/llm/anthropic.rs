//! Direct adapter for the Anthropic Messages API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, EventStream, ImageAttachment, ImageSource, LlmProvider, ProviderRequest,
    ProviderResponse, Role, StreamEvent, check_status, http_client, read_json, sse_stream, with_deadline,
};

const API_VERSION: &str = "2023-06-01";
pub(crate) const PROVIDER_NAME: &str = "anthropic";

/// Native Anthropic Messages API provider.
pub struct AnthropicProvider {
    client: Client,
    api_key: SecretString,
    base_url: String,
    timeout: Duration,
}

impl AnthropicProvider {
    pub fn new(api_key: SecretString, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    async fn send(&self, body: &MessagesRequest) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        tracing::debug!(model = %body.model, stream = body.stream, "Sending request to Anthropic Messages API");

        let request = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(body);
        let response = with_deadline(request, body.stream, self.timeout)
            .send()
            .await?;

        check_status(PROVIDER_NAME, response).await
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn complete(
        &self,
        model: &str,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, LlmError> {
        let body = MessagesRequest::build(model, request, false);
        let response = self.send(&body).await?;
        let parsed: MessagesResponse = read_json(PROVIDER_NAME, response).await?;

        let content = parsed
            .content
            .iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(text.as_str()),
                ResponseBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(ProviderResponse {
            content,
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        })
    }

    async fn stream(
        &self,
        model: &str,
        request: &ProviderRequest,
    ) -> Result<EventStream, LlmError> {
        let body = MessagesRequest::build(model, request, true);
        let response = self.send(&body).await?;
        Ok(sse_stream(PROVIDER_NAME, response, |_, data| {
            parse_stream_event(data)
        }))
    }
}

// -- Anthropic Messages API request/response types --

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<ApiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

impl MessagesRequest {
    fn build(model: &str, request: &ProviderRequest, stream: bool) -> Self {
        Self {
            model: model.to_string(),
            messages: convert_messages(&request.messages, &request.images),
            max_tokens: request.max_tokens,
            system: request.system.clone(),
            temperature: request.temperature,
            stream,
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: ApiContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentBlock {
    Text { text: String },
    Image { source: ApiImageSource },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ApiImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamPayload {
    MessageStart { message: StartMessage },
    ContentBlockDelta { delta: BlockDelta },
    MessageDelta { usage: Option<DeltaUsage> },
    Error { error: ApiErrorBody },
    #[serde(other)]
    Ignored,
}

#[derive(Debug, Deserialize)]
struct StartMessage {
    usage: Option<StartUsage>,
}

#[derive(Debug, Deserialize)]
struct StartUsage {
    input_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

// -- Conversion --

/// Convert messages to the Messages API format.
///
/// Images are attached to the last user message as image blocks ahead of
/// its text.
fn convert_messages(messages: &[ChatMessage], images: &[ImageAttachment]) -> Vec<ApiMessage> {
    let last_user = messages.iter().rposition(|m| m.role == Role::User);

    messages
        .iter()
        .enumerate()
        .map(|(i, msg)| {
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            let content = if Some(i) == last_user && !images.is_empty() {
                let mut blocks: Vec<ContentBlock> = images
                    .iter()
                    .map(|image| ContentBlock::Image {
                        source: match &image.source {
                            ImageSource::Base64 { media_type, data } => ApiImageSource::Base64 {
                                media_type: media_type.clone(),
                                data: data.clone(),
                            },
                            ImageSource::Url { url } => ApiImageSource::Url { url: url.clone() },
                        },
                    })
                    .collect();
                blocks.push(ContentBlock::Text {
                    text: msg.content.clone(),
                });
                ApiContent::Blocks(blocks)
            } else {
                ApiContent::Text(msg.content.clone())
            };
            ApiMessage { role, content }
        })
        .collect()
}

/// Anthropic splits usage: input on `message_start`, output on `message_delta`.
fn parse_stream_event(data: &str) -> Result<Vec<StreamEvent>, LlmError> {
    let payload: StreamPayload =
        serde_json::from_str(data).map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER_NAME.to_string(),
            reason: format!("bad stream event: {e}"),
        })?;

    Ok(match payload {
        StreamPayload::MessageStart { message } => vec![StreamEvent::Start {
            input_tokens: message.usage.map(|u| u.input_tokens),
        }],
        StreamPayload::ContentBlockDelta {
            delta: BlockDelta::TextDelta { text },
        } => vec![StreamEvent::Delta { text, usage: None }],
        StreamPayload::ContentBlockDelta { .. } => Vec::new(),
        StreamPayload::MessageDelta { usage } => vec![StreamEvent::End {
            output_tokens: usage.map(|u| u.output_tokens),
        }],
        StreamPayload::Error { error } if error.kind == "rate_limit_error" => {
            return Err(LlmError::RateLimited {
                provider: PROVIDER_NAME.to_string(),
                retry_after: None,
                reason: format!("{}: {}", error.kind, error.message),
            });
        }
        StreamPayload::Error { error } => {
            return Err(LlmError::RequestFailed {
                provider: PROVIDER_NAME.to_string(),
                reason: format!("{}: {}", error.kind, error.message),
            });
        }
        StreamPayload::Ignored => Vec::new(),
    })
}
