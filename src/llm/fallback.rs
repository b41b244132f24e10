//! Retry and fallback controller.
//!
//! Walks a candidate chain. Each model gets a fresh retry budget; rate-limit
//! errors back off and retry the same model, anything else moves straight to
//! the next candidate. When the chain is exhausted the last error is returned
//! unchanged.

use std::future::Future;

use crate::error::LlmError;
use crate::llm::catalog::ModelDescriptor;
use crate::llm::retry::{ErrorClass, RetryPolicy, classify_error};

/// Successful result plus the model that produced it.
#[derive(Debug)]
pub struct FallbackOutcome<'a, T> {
    pub value: T,
    pub model: &'a ModelDescriptor,
    /// Adapter calls made across every candidate, including the successful one.
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct FallbackController {
    policy: RetryPolicy,
}

impl FallbackController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Run `call` against each candidate in order until one succeeds.
    pub async fn run<'a, T, F, Fut>(
        &self,
        chain: &[&'a ModelDescriptor],
        mut call: F,
    ) -> Result<FallbackOutcome<'a, T>, LlmError>
    where
        F: FnMut(&'a ModelDescriptor) -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut last_error: Option<LlmError> = None;
        let mut attempts = 0u32;

        for (i, &model) in chain.iter().enumerate() {
            let mut attempt = 0u32;
            let err = loop {
                attempts += 1;
                tracing::debug!(model = %model.id, attempt, "Attempting model");

                let err = match call(model).await {
                    Ok(value) => {
                        return Ok(FallbackOutcome {
                            value,
                            model,
                            attempts,
                        });
                    }
                    Err(err) => err,
                };

                if classify_error(&err) != ErrorClass::RateLimited
                    || attempt >= self.policy.max_retries
                {
                    break err;
                }

                let delay = self.policy.backoff_delay(attempt);
                tracing::warn!(
                    model = %model.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            };

            if let Some(next) = chain.get(i + 1) {
                tracing::warn!(
                    from = %model.id,
                    to = %next.id,
                    error = %err,
                    "Model failed, falling back to next candidate"
                );
            }
            last_error = Some(err);
        }

        let err = last_error.unwrap_or_else(|| LlmError::UnknownModel {
            model: "<empty candidate chain>".to_string(),
        });
        tracing::error!(candidates = chain.len(), attempts, error = %err, "All candidate models failed");
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use tracing_test::traced_test;

    use super::*;
    use crate::llm::catalog::ModelCatalog;

    /// Scripted per-model outcomes; records the order of calls.
    struct Script {
        outcomes: Mutex<Vec<(String, VecDeque<Result<&'static str, LlmError>>)>>,
        calls: Mutex<Vec<String>>,
    }

    impl Script {
        fn new(outcomes: Vec<(&str, Vec<Result<&'static str, LlmError>>)>) -> Self {
            Self {
                outcomes: Mutex::new(
                    outcomes
                        .into_iter()
                        .map(|(id, results)| (id.to_string(), results.into()))
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn next(&self, id: &str) -> Result<&'static str, LlmError> {
            self.calls.lock().unwrap().push(id.to_string());
            let mut outcomes = self.outcomes.lock().unwrap();
            let (_, queue) = outcomes
                .iter_mut()
                .find(|(model, _)| model == id)
                .expect("unscripted model called");
            queue.pop_front().expect("script exhausted")
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn rate_limited() -> LlmError {
        LlmError::RateLimited {
            provider: "mock".to_string(),
            retry_after: None,
            reason: "HTTP 429 Too Many Requests: slow down".to_string(),
        }
    }

    fn chain<'a>(catalog: &'a ModelCatalog, ids: &[&str]) -> Vec<&'a ModelDescriptor> {
        ids.iter().map(|id| catalog.get(id).unwrap()).collect()
    }

    const A: &str = "anthropic/claude-sonnet-4.5";
    const B: &str = "openai/gpt-5";
    const C: &str = "google/gemini-2.5-pro";

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn retries_rate_limits_with_exponential_backoff() {
        let catalog = ModelCatalog::builtin(&[]);
        let models = chain(&catalog, &[A, B]);
        let script = Script::new(vec![(A, vec![Err(rate_limited()), Err(rate_limited()), Ok("done")])]);
        let controller = FallbackController::new(RetryPolicy::new(5, Duration::from_millis(1000)));

        let start = tokio::time::Instant::now();
        let outcome = controller
            .run(&models, |m| {
                let result = script.next(&m.id);
                async move { result }
            })
            .await
            .unwrap();

        assert_eq!(outcome.value, "done");
        assert_eq!(outcome.model.id, A);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(start.elapsed(), Duration::from_millis(1000 + 2000));
        assert!(logs_contain("Rate limited, backing off"));
        assert!(!logs_contain("falling back"));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn auth_failure_falls_back_without_sleeping() {
        let catalog = ModelCatalog::builtin(&[]);
        let models = chain(&catalog, &[A, B]);
        let script = Script::new(vec![
            (A, vec![Err(LlmError::AuthFailed {
                    provider: "mock".to_string(),
                    reason: "HTTP 401 Unauthorized: bad key".to_string(),
                })]),
            (B, vec![Ok("from b")]),
        ]);
        let controller = FallbackController::new(RetryPolicy::default());

        let start = tokio::time::Instant::now();
        let outcome = controller
            .run(&models, |m| {
                let result = script.next(&m.id);
                async move { result }
            })
            .await
            .unwrap();

        assert_eq!(outcome.model.id, B);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(script.calls(), vec![A.to_string(), B.to_string()]);
        assert!(logs_contain("falling back to next candidate"));
        assert!(!logs_contain("backing off"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retry_budget_moves_on_with_fresh_budget() {
        let catalog = ModelCatalog::builtin(&[]);
        let models = chain(&catalog, &[A, B]);
        let script = Script::new(vec![
            (A, vec![Err(rate_limited()), Err(rate_limited()), Err(rate_limited())]),
            (B, vec![Err(rate_limited()), Ok("from b")]),
        ]);
        let controller = FallbackController::new(RetryPolicy::new(2, Duration::from_millis(10)));

        let start = tokio::time::Instant::now();
        let outcome = controller
            .run(&models, |m| {
                let result = script.next(&m.id);
                async move { result }
            })
            .await
            .unwrap();

        assert_eq!(outcome.model.id, B);
        assert_eq!(outcome.attempts, 5);
        // A: 10 + 20, B restarts at 10.
        assert_eq!(start.elapsed(), Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn all_candidates_fail_returns_last_error_verbatim() {
        let catalog = ModelCatalog::builtin(&[]);
        let models = chain(&catalog, &[A, B, C]);
        let script = Script::new(vec![
            (A, vec![Err(LlmError::AuthFailed {
                    provider: "anthropic".to_string(),
                    reason: "HTTP 401 Unauthorized: invalid x-api-key".to_string(),
                })]),
            (
                B,
                vec![Err(LlmError::RequestFailed {
                    provider: "openai".to_string(),
                    reason: "HTTP 500: boom".to_string(),
                })],
            ),
            (
                C,
                vec![Err(LlmError::InvalidResponse {
                    provider: "openrouter".to_string(),
                    reason: "No choices in response".to_string(),
                })],
            ),
        ]);
        let controller = FallbackController::new(RetryPolicy::default());

        let err = controller
            .run(&models, |m| {
                let result = script.next(&m.id);
                async move { result }
            })
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Invalid response from openrouter: No choices in response"
        );
        assert_eq!(script.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_means_single_attempt_per_model() {
        let catalog = ModelCatalog::builtin(&[]);
        let models = chain(&catalog, &[A]);
        let script = Script::new(vec![(A, vec![Err(rate_limited())])]);
        let controller = FallbackController::new(RetryPolicy::new(0, Duration::from_secs(1)));

        let start = tokio::time::Instant::now();
        let err = controller
            .run(&models, |m| {
                let result = script.next(&m.id);
                async move { result }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::RateLimited { .. }));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn empty_chain_is_an_error() {
        let controller = FallbackController::new(RetryPolicy::default());
        let result: Result<FallbackOutcome<'_, ()>, _> =
            controller.run(&[], |_| async { Ok(()) }).await;
        assert!(result.is_err());
    }
}
