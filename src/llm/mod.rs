//! Model routing and dispatch.
//!
//! Backends:
//! - **Anthropic**: Direct Messages API access when an Anthropic key is set
//! - **OpenAI**: Direct Chat Completions access when an OpenAI key is set
//! - **OpenRouter**: Gateway for every catalog model; always configured

pub mod analyzer;
mod anthropic;
pub mod catalog;
pub mod costs;
pub mod fallback;
mod generation;
mod openai;
mod openai_compatible;
mod openrouter;
pub mod provider;
pub mod retry;
mod router;
pub mod selector;
pub mod streaming;

pub use analyzer::{Complexity, TaskAnalyzer, TaskInput, TaskProfile};
pub use anthropic::AnthropicProvider;
pub use catalog::{
    DirectProvider, ModelCatalog, ModelDescriptor, PolicyMode, ProviderKind, Tier, TierTable,
    TierTables, Vendor,
};
pub use costs::{MetricsSnapshot, RouterMetrics, RouterStats, call_cost};
pub use generation::{
    CostEstimate, GenerationRequest, GenerationResult, Usage, default_max_tokens,
};
pub use openai::OpenAiProvider;
pub use openrouter::OpenRouterProvider;
pub use provider::{
    ChatMessage, EventStream, ImageAttachment, ImageSource, LlmProvider, ProviderRequest,
    ProviderResponse, Role, StreamEvent, StreamUsage,
};
pub use retry::{ErrorClass, RetryPolicy, classify_error};
pub use router::{ModelRouter, ModelRouterBuilder};
pub use streaming::{StreamHandler, StreamOutcome};
