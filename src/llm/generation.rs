//! Caller-facing request and result types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::analyzer::{TaskInput, TaskProfile};
use crate::llm::catalog::{ModelDescriptor, Tier};
use crate::llm::provider::{ChatMessage, ImageAttachment, ProviderRequest};

/// A generation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system: Option<String>,
    #[serde(default)]
    pub images: Vec<ImageAttachment>,
    /// Existing code the prompt refers to. Counted by the analyzer and sent
    /// ahead of the prompt.
    pub context: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Skip classification and use this tier.
    pub tier: Option<Tier>,
    /// Skip tier selection and use this catalog model first.
    pub model: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.images.push(image);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub(crate) fn task_input(&self) -> TaskInput<'_> {
        TaskInput {
            prompt: &self.prompt,
            image_count: self.images.len(),
            context_len: self.context.as_deref().map_or(0, |c| c.chars().count()),
        }
    }

    /// Text of the single user turn sent to the backend.
    pub(crate) fn user_content(&self) -> String {
        match self.context.as_deref() {
            Some(context) if !context.trim().is_empty() => {
                format!("Existing code:\n```\n{context}\n```\n\n{}", self.prompt)
            }
            _ => self.prompt.clone(),
        }
    }

    pub(crate) fn to_provider_request(&self, max_tokens: u32) -> ProviderRequest {
        ProviderRequest {
            system: self.system.clone(),
            messages: vec![ChatMessage::user(self.user_content())],
            images: self.images.clone(),
            max_tokens,
            temperature: self.temperature,
        }
    }
}

/// Output-token budget used when a request does not set one.
pub fn default_max_tokens(tier: Tier) -> u32 {
    match tier {
        Tier::Simple => 1024,
        Tier::Standard => 4096,
        Tier::Critical => 8192,
        Tier::Vision => 4096,
    }
}

/// Token usage and cost of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub cost_usd: Decimal,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32, cost_usd: Decimal) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
            cost_usd,
        }
    }
}

/// A completed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub id: Uuid,
    pub content: String,
    /// The model that actually answered, which may be a fallback.
    pub model: ModelDescriptor,
    pub usage: Usage,
    pub profile: TaskProfile,
    pub latency: Duration,
    /// Adapter calls spent, including retries and fallbacks.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

/// Pre-flight cost estimate. No network call is made to produce it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub model: String,
    pub estimated_input_tokens: u32,
    pub estimated_output_tokens: u32,
    pub estimated_cost: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_set_fields() {
        let request = GenerationRequest::new("make a navbar")
            .with_system("You write React.")
            .with_image(ImageAttachment::from_url("https://example.com/mock.png"))
            .with_context("export const Nav = () => null;")
            .with_max_tokens(500)
            .with_temperature(0.3)
            .with_tier(Tier::Standard)
            .with_model("openai/gpt-5")
            .streaming();
        assert_eq!(request.images.len(), 1);
        assert_eq!(request.max_tokens, Some(500));
        assert_eq!(request.tier, Some(Tier::Standard));
        assert!(request.stream);

        let input = request.task_input();
        assert_eq!(input.image_count, 1);
        assert_eq!(input.context_len, 30);
    }

    #[test]
    fn context_is_prepended_to_user_turn() {
        let request = GenerationRequest::new("rename foo to bar").with_context("fn foo() {}");
        let provider_request = request.to_provider_request(100);
        assert_eq!(provider_request.messages.len(), 1);
        let content = &provider_request.messages[0].content;
        assert!(content.starts_with("Existing code:\n```\nfn foo() {}\n```"));
        assert!(content.ends_with("rename foo to bar"));
        assert_eq!(provider_request.max_tokens, 100);
    }

    #[test]
    fn usage_total() {
        let usage = Usage::new(10, 5, Decimal::ZERO);
        assert_eq!(usage.total_tokens, 15);
    }
}
