//! Model routing and dispatch for LLM generation requests.
//!
//! A [`ModelRouter`](llm::ModelRouter) classifies each request into a tier,
//! picks a model from that tier's preference list, dispatches it through a
//! direct vendor adapter or the OpenRouter gateway, retries rate limits with
//! exponential backoff, falls back along the list on persistent failure, and
//! keeps running cost totals.

pub mod config;
pub mod error;
pub mod llm;

pub use config::RouterConfig;
pub use error::{ConfigError, LlmError, RouterError};
pub use llm::{GenerationRequest, GenerationResult, ModelRouter, StreamHandler, Tier};
