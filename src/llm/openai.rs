//! Direct adapter for the OpenAI Chat Completions API.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::LlmError;
use crate::llm::openai_compatible::{ChatCompletionsClient, ChatRequest, TokenLimitField, parse_chunk};
use crate::llm::provider::{EventStream, LlmProvider, ProviderRequest, ProviderResponse, sse_stream};

pub(crate) const PROVIDER_NAME: &str = "openai";

/// OpenAI direct provider. Streams carry no usage; the reconciler estimates it.
pub struct OpenAiProvider {
    inner: ChatCompletionsClient,
}

impl OpenAiProvider {
    pub fn new(api_key: SecretString, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            inner: ChatCompletionsClient::new(PROVIDER_NAME, api_key, base_url, timeout, Vec::new()),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn complete(
        &self,
        model: &str,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, LlmError> {
        let body = ChatRequest::build(model, request, TokenLimitField::MaxCompletionTokens, false);
        self.inner.complete(&body).await
    }

    async fn stream(
        &self,
        model: &str,
        request: &ProviderRequest,
    ) -> Result<EventStream, LlmError> {
        let body = ChatRequest::build(model, request, TokenLimitField::MaxCompletionTokens, true);
        let response = self.inner.send(&body).await?;
        Ok(sse_stream(PROVIDER_NAME, response, |_, data| {
            parse_chunk(PROVIDER_NAME, data)
        }))
    }
}
