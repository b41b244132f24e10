//! Streaming reconciler.
//!
//! Normalizes adapter event streams into ordered token callbacks and a single
//! terminal outcome, merging the three usage-reporting shapes backends use.

use futures::StreamExt;

use crate::error::LlmError;
use crate::llm::generation::GenerationResult;
use crate::llm::provider::{EventStream, StreamEvent, StreamUsage, estimate_tokens};

/// Receives the output of `generate_stream`.
///
/// Exactly one of `on_complete` or `on_error` is called per stream, after
/// every `on_token`.
pub trait StreamHandler: Send {
    fn on_token(&mut self, token: &str);
    fn on_complete(&mut self, result: GenerationResult);
    fn on_error(&mut self, error: LlmError);
}

/// Content and token counts of a fully consumed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Default)]
struct UsageTracker {
    start_input: Option<u32>,
    end_output: Option<u32>,
    cumulative: Option<StreamUsage>,
}

impl UsageTracker {
    fn finish(self, estimated_input: u32, content: &str) -> (u32, u32) {
        let input = self
            .start_input
            .or(self.cumulative.map(|u| u.input_tokens))
            .unwrap_or(estimated_input);
        let output = self
            .end_output
            .or(self.cumulative.map(|u| u.output_tokens))
            .unwrap_or_else(|| estimate_tokens(content));
        (input, output)
    }
}

/// Drain `stream`, relaying each text delta to `on_token` as it arrives.
///
/// `estimated_input` is used when the backend never reports input tokens.
/// The first `Err` item ends the stream and is returned as-is.
pub async fn reconcile<F>(
    mut stream: EventStream,
    estimated_input: u32,
    mut on_token: F,
) -> Result<StreamOutcome, LlmError>
where
    F: FnMut(&str),
{
    let mut content = String::new();
    let mut usage = UsageTracker::default();

    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::Start { input_tokens } => {
                if input_tokens.is_some() {
                    usage.start_input = input_tokens;
                }
            }
            StreamEvent::Delta { text, usage: chunk } => {
                if !text.is_empty() {
                    on_token(&text);
                    content.push_str(&text);
                }
                if chunk.is_some() {
                    usage.cumulative = chunk;
                }
            }
            StreamEvent::End { output_tokens } => {
                if output_tokens.is_some() {
                    usage.end_output = output_tokens;
                }
            }
        }
    }

    let (input_tokens, output_tokens) = usage.finish(estimated_input, &content);
    Ok(StreamOutcome {
        content,
        input_tokens,
        output_tokens,
    })
}
