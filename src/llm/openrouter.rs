//! Gateway adapter for OpenRouter, which reaches every catalog model through
//! one Chat Completions endpoint using `vendor/model` ids.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::LlmError;
use crate::llm::openai_compatible::{
    ChatCompletionsClient, ChatRequest, TokenLimitField, UsageRequest, parse_chunk,
};
use crate::llm::provider::{EventStream, LlmProvider, ProviderRequest, ProviderResponse, sse_stream};

pub(crate) const PROVIDER_NAME: &str = "openrouter";

pub struct OpenRouterProvider {
    inner: ChatCompletionsClient,
}

impl OpenRouterProvider {
    /// `extra_headers` are sent on every request (e.g. `HTTP-Referer`, `X-Title`).
    pub fn new(
        api_key: SecretString,
        base_url: impl Into<String>,
        timeout: Duration,
        extra_headers: Vec<(String, String)>,
    ) -> Self {
        Self {
            inner: ChatCompletionsClient::new(PROVIDER_NAME, api_key, base_url, timeout, extra_headers),
        }
    }

    fn build(model: &str, request: &ProviderRequest, stream: bool) -> ChatRequest {
        let mut body = ChatRequest::build(model, request, TokenLimitField::MaxTokens, stream);
        // Ask for usage accounting so streamed chunks report token counts.
        body.usage = Some(UsageRequest { include: true });
        body
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn complete(
        &self,
        model: &str,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, LlmError> {
        let body = Self::build(model, request, false);
        self.inner.complete(&body).await
    }

    async fn stream(
        &self,
        model: &str,
        request: &ProviderRequest,
    ) -> Result<EventStream, LlmError> {
        let body = Self::build(model, request, true);
        let response = self.inner.send(&body).await?;
        Ok(sse_stream(PROVIDER_NAME, response, |_, data| {
            parse_chunk(PROVIDER_NAME, data)
        }))
    }
}
