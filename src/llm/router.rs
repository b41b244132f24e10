//! The model router: classification, selection, dispatch with retry and
//! fallback, streaming, and cost accounting behind one call surface.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rust_decimal::Decimal;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::RouterConfig;
use crate::error::{LlmError, RouterError};
use crate::llm::analyzer::{TaskAnalyzer, TaskProfile};
use crate::llm::anthropic::AnthropicProvider;
use crate::llm::catalog::{
    DirectProvider, ModelCatalog, ModelDescriptor, PolicyMode, ProviderKind, Tier, TierTables,
    Vendor,
};
use crate::llm::costs::{RouterMetrics, RouterStats, call_cost};
use crate::llm::fallback::FallbackController;
use crate::llm::generation::{
    CostEstimate, GenerationRequest, GenerationResult, Usage, default_max_tokens,
};
use crate::llm::openai::OpenAiProvider;
use crate::llm::openrouter::OpenRouterProvider;
use crate::llm::provider::{LlmProvider, estimate_tokens};
use crate::llm::retry::RetryPolicy;
use crate::llm::selector::{ModelSelector, Selection};
use crate::llm::streaming::{StreamHandler, reconcile};

/// Adapters available to the router.
struct Providers {
    gateway: Arc<dyn LlmProvider>,
    anthropic: Option<Arc<dyn LlmProvider>>,
    openai: Option<Arc<dyn LlmProvider>>,
}

impl Providers {
    /// Adapter and wire id for `model`. A direct model whose adapter is
    /// missing goes through the gateway under its gateway id.
    fn route(&self, model: &ModelDescriptor) -> (Arc<dyn LlmProvider>, String) {
        let direct = match model.provider {
            ProviderKind::Direct(DirectProvider::Anthropic) => self.anthropic.as_ref(),
            ProviderKind::Direct(DirectProvider::OpenAi) => self.openai.as_ref(),
            ProviderKind::Gateway => None,
        };
        match direct {
            Some(provider) => (Arc::clone(provider), model.wire_id().to_string()),
            None => (Arc::clone(&self.gateway), model.id.clone()),
        }
    }
}

/// Builder for [`ModelRouter`]. Adapters and metrics can be injected; anything
/// not injected is built from the [`RouterConfig`].
pub struct ModelRouterBuilder {
    config: RouterConfig,
    catalog: Option<ModelCatalog>,
    tables: Option<TierTables>,
    gateway: Option<Arc<dyn LlmProvider>>,
    anthropic: Option<Arc<dyn LlmProvider>>,
    openai: Option<Arc<dyn LlmProvider>>,
    metrics: Option<Arc<RouterMetrics>>,
}

impl ModelRouterBuilder {
    pub fn with_catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_tier_tables(mut self, tables: TierTables) -> Self {
        self.tables = Some(tables);
        self
    }

    pub fn with_gateway_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.gateway = Some(provider);
        self
    }

    /// Use `provider` for a direct vendor. Its models dispatch directly even
    /// when the config has no credential for that vendor.
    pub fn with_direct_provider(
        mut self,
        kind: DirectProvider,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        match kind {
            DirectProvider::Anthropic => self.anthropic = Some(provider),
            DirectProvider::OpenAi => self.openai = Some(provider),
        }
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<RouterMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<ModelRouter, RouterError> {
        let config = self.config;
        config.validate()?;

        // Injected adapters count as configured even without a key.
        let mut direct = config.direct_providers();
        for (provider, injected) in [
            (DirectProvider::Anthropic, self.anthropic.is_some()),
            (DirectProvider::OpenAi, self.openai.is_some()),
        ] {
            if injected && !direct.contains(&provider) {
                direct.push(provider);
            }
        }

        let anthropic = self.anthropic.or_else(|| {
            config.anthropic_api_key.clone().map(|key| {
                Arc::new(AnthropicProvider::new(
                    key,
                    config.anthropic_base_url.clone(),
                    config.request_timeout,
                )) as Arc<dyn LlmProvider>
            })
        });
        let openai = self.openai.or_else(|| {
            config.openai_api_key.clone().map(|key| {
                Arc::new(OpenAiProvider::new(
                    key,
                    config.openai_base_url.clone(),
                    config.request_timeout,
                )) as Arc<dyn LlmProvider>
            })
        });
        let gateway = self.gateway.unwrap_or_else(|| {
            Arc::new(OpenRouterProvider::new(
                config.gateway_api_key.clone(),
                config.gateway_base_url.clone(),
                config.request_timeout,
                config.gateway_extra_headers.clone(),
            ))
        });

        let catalog = self
            .catalog
            .unwrap_or_else(|| ModelCatalog::builtin(&direct));
        let tables = self.tables.unwrap_or_else(TierTables::builtin);
        tables.validate(&catalog)?;

        tracing::debug!(
            models = catalog.models().len(),
            direct = ?direct,
            premium = config.premium_mode,
            "Model router ready"
        );

        Ok(ModelRouter {
            catalog,
            tables,
            analyzer: TaskAnalyzer::default(),
            providers: Providers {
                gateway,
                anthropic,
                openai,
            },
            controller: FallbackController::new(RetryPolicy::new(
                config.max_retries,
                config.base_retry_delay,
            )),
            preferred_providers: config.preferred_providers,
            premium_mode: AtomicBool::new(config.premium_mode),
            metrics: self.metrics.unwrap_or_default(),
        })
    }
}

/// Routes generation requests to catalog models.
///
/// All methods take `&self`; share a router across tasks with `Arc`.
pub struct ModelRouter {
    catalog: ModelCatalog,
    tables: TierTables,
    analyzer: TaskAnalyzer<'static>,
    providers: Providers,
    controller: FallbackController,
    preferred_providers: Vec<Vendor>,
    premium_mode: AtomicBool,
    metrics: Arc<RouterMetrics>,
}

impl ModelRouter {
    /// Build a router with real adapters from `config`.
    pub fn new(config: RouterConfig) -> Result<Self, RouterError> {
        Self::builder(config).build()
    }

    pub fn builder(config: RouterConfig) -> ModelRouterBuilder {
        ModelRouterBuilder {
            config,
            catalog: None,
            tables: None,
            gateway: None,
            anthropic: None,
            openai: None,
            metrics: None,
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn tier_tables(&self) -> &TierTables {
        &self.tables
    }

    pub fn metrics(&self) -> Arc<RouterMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn mode(&self) -> PolicyMode {
        PolicyMode::from_premium(self.premium_mode.load(Ordering::Relaxed))
    }

    /// Switch policy mode. Calls already past selection are unaffected.
    pub fn set_premium_mode(&self, enabled: bool) {
        let previous = self.premium_mode.swap(enabled, Ordering::Relaxed);
        if previous != enabled {
            tracing::info!(premium = enabled, "Policy mode changed");
        }
    }

    /// Classify a request, honoring an explicit tier.
    pub fn analyze(&self, request: &GenerationRequest) -> TaskProfile {
        let input = request.task_input();
        match request.tier {
            Some(tier) => self.analyzer.with_tier(&input, tier),
            None => self.analyzer.analyze(&input),
        }
    }

    /// Active preference list for `tier`, after provider filtering.
    pub fn candidates(&self, tier: Tier) -> Vec<&ModelDescriptor> {
        self.selector()
            .candidates(tier, self.mode(), &self.preferred_providers)
    }

    /// The model a request would be sent to first.
    pub fn select_model(&self, request: &GenerationRequest) -> Result<&ModelDescriptor, LlmError> {
        let profile = self.analyze(request);
        Ok(self.select(&profile, request, self.mode())?.model())
    }

    fn selector(&self) -> ModelSelector<'_> {
        ModelSelector::new(&self.catalog, &self.tables)
    }

    fn select(
        &self,
        profile: &TaskProfile,
        request: &GenerationRequest,
        mode: PolicyMode,
    ) -> Result<Selection<'_>, LlmError> {
        self.selector().select(
            profile,
            mode,
            &self.preferred_providers,
            request.model.as_deref(),
        )
    }

    fn max_tokens_for(request: &GenerationRequest, tier: Tier, model: &ModelDescriptor) -> u32 {
        request
            .max_tokens
            .unwrap_or_else(|| default_max_tokens(tier))
            .min(model.max_output_tokens)
    }

    /// Generate a completion, retrying and falling back across the tier's
    /// candidates. Fails only when every candidate has failed, with the last
    /// adapter error unchanged.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, LlmError> {
        let started = Instant::now();
        let profile = self.analyze(request);
        let selection = self.select(&profile, request, self.mode())?;

        let outcome = self
            .controller
            .run(&selection.chain, |model| {
                let (provider, wire_id) = self.providers.route(model);
                let provider_request = request.to_provider_request(Self::max_tokens_for(
                    request,
                    profile.tier,
                    model,
                ));
                async move { provider.complete(&wire_id, &provider_request).await }
            })
            .await?;

        let response = outcome.value;
        Ok(self.finish(
            response.content,
            response.input_tokens,
            response.output_tokens,
            outcome.model,
            profile,
            started,
            outcome.attempts,
        ))
    }

    /// Stream a completion into `handler`.
    ///
    /// Opening the stream goes through the same retry and fallback as
    /// [`generate`](Self::generate). Once events flow, a failure is terminal.
    /// Exactly one of `on_complete` or `on_error` is called.
    pub async fn generate_stream<H>(&self, request: &GenerationRequest, handler: &mut H)
    where
        H: StreamHandler + ?Sized,
    {
        let started = Instant::now();
        let profile = self.analyze(request);
        let selection = match self.select(&profile, request, self.mode()) {
            Ok(selection) => selection,
            Err(err) => {
                handler.on_error(err);
                return;
            }
        };

        let opened = self
            .controller
            .run(&selection.chain, |model| {
                let (provider, wire_id) = self.providers.route(model);
                let provider_request = request.to_provider_request(Self::max_tokens_for(
                    request,
                    profile.tier,
                    model,
                ));
                async move { provider.stream(&wire_id, &provider_request).await }
            })
            .await;

        let opened = match opened {
            Ok(opened) => opened,
            Err(err) => {
                handler.on_error(err);
                return;
            }
        };

        let prompt_text = match &request.system {
            Some(system) => format!("{system}\n{}", request.user_content()),
            None => request.user_content(),
        };
        let reconciled = reconcile(opened.value, estimate_tokens(&prompt_text), |token| {
            handler.on_token(token)
        })
        .await;

        match reconciled {
            Ok(stream) => {
                let result = self.finish(
                    stream.content,
                    stream.input_tokens,
                    stream.output_tokens,
                    opened.model,
                    profile,
                    started,
                    opened.attempts,
                );
                handler.on_complete(result);
            }
            Err(err) => {
                tracing::error!(model = %opened.model.id, error = %err, "Stream failed after it started");
                handler.on_error(err);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        content: String,
        input_tokens: u32,
        output_tokens: u32,
        model: &ModelDescriptor,
        profile: TaskProfile,
        started: Instant,
        attempts: u32,
    ) -> GenerationResult {
        let cost = call_cost(model, input_tokens, output_tokens);
        self.metrics.record_call(cost);
        let latency = started.elapsed();

        tracing::info!(
            model = %model.id,
            input_tokens,
            output_tokens,
            cost_usd = %cost,
            latency_ms = latency.as_millis() as u64,
            attempts,
            "Generation complete"
        );

        GenerationResult {
            id: Uuid::new_v4(),
            content,
            model: model.clone(),
            usage: Usage::new(input_tokens, output_tokens, cost),
            profile,
            latency,
            attempts,
            created_at: chrono::Utc::now(),
        }
    }

    /// Estimate the cost of a request without calling any backend.
    pub fn estimate_cost(&self, request: &GenerationRequest) -> Result<CostEstimate, LlmError> {
        let profile = self.analyze(request);
        let model = self.select(&profile, request, self.mode())?.model();
        let output_tokens = Self::max_tokens_for(request, profile.tier, model);
        Ok(CostEstimate {
            model: model.id.clone(),
            estimated_input_tokens: profile.estimated_tokens,
            estimated_output_tokens: output_tokens,
            estimated_cost: call_cost(model, profile.estimated_tokens, output_tokens),
        })
    }

    pub fn get_stats(&self) -> RouterStats {
        RouterStats::from_snapshot(
            self.metrics.snapshot(),
            self.premium_mode.load(Ordering::Relaxed),
        )
    }

    /// Record cost a caller spent fixing an earlier result.
    pub fn track_error_correction(&self, cost: Decimal) {
        self.metrics.track_error_correction(cost);
    }

    pub fn reset_stats(&self) {
        self.metrics.reset();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::llm::provider::{EventStream, ProviderRequest, ProviderResponse, StreamEvent};

    /// Answers every model with canned usage and records what it was asked.
    struct EchoProvider {
        name: &'static str,
        calls: Mutex<Vec<(String, ProviderRequest)>>,
        failing: Mutex<HashMap<String, u32>>,
    }

    impl EchoProvider {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: Mutex::new(Vec::new()),
                failing: Mutex::new(HashMap::new()),
            })
        }

        /// Make the next `times` calls for `model` fail with a transport error.
        fn fail(&self, model: &str, times: u32) {
            self.failing.lock().unwrap().insert(model.to_string(), times);
        }

        fn models_called(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
        }

        fn check(&self, model: &str, request: &ProviderRequest) -> Result<(), LlmError> {
            self.calls
                .lock()
                .unwrap()
                .push((model.to_string(), request.clone()));
            let mut failing = self.failing.lock().unwrap();
            if let Some(left) = failing.get_mut(model)
                && *left > 0
            {
                *left -= 1;
                return Err(LlmError::RequestFailed {
                    provider: self.name.to_string(),
                    reason: format!("HTTP 503: {model} unavailable"),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn complete(
            &self,
            model: &str,
            request: &ProviderRequest,
        ) -> Result<ProviderResponse, LlmError> {
            self.check(model, request)?;
            Ok(ProviderResponse {
                content: format!("{} via {}", model, self.name),
                input_tokens: 1000,
                output_tokens: 500,
            })
        }

        async fn stream(
            &self,
            model: &str,
            request: &ProviderRequest,
        ) -> Result<EventStream, LlmError> {
            self.check(model, request)?;
            Ok(Box::pin(futures::stream::iter(vec![
                Ok(StreamEvent::Start {
                    input_tokens: Some(10),
                }),
                Ok(StreamEvent::Delta {
                    text: "one ".to_string(),
                    usage: None,
                }),
                Ok(StreamEvent::Delta {
                    text: "two".to_string(),
                    usage: None,
                }),
                Ok(StreamEvent::End {
                    output_tokens: Some(2),
                }),
            ])))
        }
    }

    #[derive(Default)]
    struct Collect {
        tokens: Vec<String>,
        completed: Vec<GenerationResult>,
        errors: Vec<String>,
    }

    impl StreamHandler for Collect {
        fn on_token(&mut self, token: &str) {
            self.tokens.push(token.to_string());
        }

        fn on_complete(&mut self, result: GenerationResult) {
            self.completed.push(result);
        }

        fn on_error(&mut self, error: LlmError) {
            self.errors.push(error.to_string());
        }
    }

    fn router_with(
        config: RouterConfig,
        gateway: Arc<EchoProvider>,
        anthropic: Option<Arc<EchoProvider>>,
    ) -> ModelRouter {
        let mut builder = ModelRouter::builder(config).with_gateway_provider(gateway);
        if let Some(anthropic) = anthropic {
            builder = builder.with_direct_provider(DirectProvider::Anthropic, anthropic);
        }
        builder.build().unwrap()
    }

    #[test]
    fn new_requires_gateway_key() {
        let err = ModelRouter::new(RouterConfig::new("")).err().unwrap();
        assert!(matches!(err, RouterError::Config(_)));
    }

    #[test]
    fn new_builds_real_adapters() {
        let router = ModelRouter::new(RouterConfig::new("sk-or").with_anthropic_key("sk-ant")).unwrap();
        let sonnet = router.catalog().get("anthropic/claude-sonnet-4.5").unwrap();
        assert_eq!(sonnet.provider, ProviderKind::Direct(DirectProvider::Anthropic));
        let (provider, wire) = router.providers.route(sonnet);
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(wire, "claude-sonnet-4-5");

        let flash = router.catalog().get("google/gemini-2.5-flash").unwrap();
        let (provider, wire) = router.providers.route(flash);
        assert_eq!(provider.name(), "openrouter");
        assert_eq!(wire, "google/gemini-2.5-flash");
    }

    #[tokio::test]
    async fn direct_credential_routes_vendor_models_directly() {
        let gateway = EchoProvider::new("gateway");
        let anthropic = EchoProvider::new("anthropic");
        let router = router_with(
            RouterConfig::new("k"),
            Arc::clone(&gateway),
            Some(Arc::clone(&anthropic)),
        );

        let request = GenerationRequest::new("harden the login flow against csrf");
        let result = router.generate(&request).await.unwrap();
        assert_eq!(result.profile.tier, Tier::Critical);
        assert_eq!(result.model.id, "anthropic/claude-sonnet-4.5");
        assert_eq!(anthropic.models_called(), vec!["claude-sonnet-4-5".to_string()]);
        assert!(gateway.models_called().is_empty());
    }

    #[tokio::test]
    async fn fallback_cost_uses_answering_model() {
        let gateway = EchoProvider::new("gateway");
        gateway.fail("google/gemini-2.5-flash", 1);
        let router = router_with(RouterConfig::new("k"), Arc::clone(&gateway), None);

        let result = router
            .generate(&GenerationRequest::new("fix the typo in the header"))
            .await
            .unwrap();

        assert_eq!(result.model.id, "openai/gpt-5-mini");
        assert_eq!(result.attempts, 2);
        // 1000 * 0.25/M + 500 * 2/M
        assert_eq!(result.usage.cost_usd, dec!(0.00125));
        assert_eq!(result.usage.total_tokens, 1500);
        assert_eq!(router.get_stats().total_cost, dec!(0.00125));
    }

    #[tokio::test]
    async fn premium_toggle_applies_to_next_call() {
        let gateway = EchoProvider::new("gateway");
        let router = router_with(RouterConfig::new("k"), Arc::clone(&gateway), None);
        let request = GenerationRequest::new("add a comment");

        let standard = router.generate(&request).await.unwrap();
        router.set_premium_mode(true);
        let premium = router.generate(&request).await.unwrap();

        assert_eq!(standard.model.id, "google/gemini-2.5-flash");
        assert_eq!(premium.model.id, "anthropic/claude-haiku-4.5");
        assert!(router.get_stats().premium_mode);
    }

    #[tokio::test]
    async fn max_tokens_defaults_by_tier_and_caps_at_model_limit() {
        let gateway = EchoProvider::new("gateway");
        let router = router_with(RouterConfig::new("k"), Arc::clone(&gateway), None);

        router
            .generate(&GenerationRequest::new("add a comment"))
            .await
            .unwrap();
        router
            .generate(
                &GenerationRequest::new("add a comment")
                    .with_model("openai/gpt-4o")
                    .with_max_tokens(1_000_000),
            )
            .await
            .unwrap();

        let calls = gateway.calls.lock().unwrap();
        assert_eq!(calls[0].1.max_tokens, 1024);
        assert_eq!(calls[1].1.max_tokens, 16_384);
    }

    #[tokio::test]
    async fn streaming_relays_tokens_and_completes_once() {
        let gateway = EchoProvider::new("gateway");
        let router = router_with(RouterConfig::new("k"), Arc::clone(&gateway), None);
        let mut handler = Collect::default();

        router
            .generate_stream(&GenerationRequest::new("add a comment").streaming(), &mut handler)
            .await;

        assert_eq!(handler.tokens, vec!["one ", "two"]);
        assert_eq!(handler.completed.len(), 1);
        assert!(handler.errors.is_empty());
        let result = &handler.completed[0];
        assert_eq!(result.content, "one two");
        assert_eq!(result.usage.input_tokens, 10);
        assert_eq!(result.usage.output_tokens, 2);
        assert_eq!(router.get_stats().request_count, 1);
    }

    #[tokio::test]
    async fn streaming_unknown_model_reports_error() {
        let gateway = EchoProvider::new("gateway");
        let router = router_with(RouterConfig::new("k"), gateway, None);
        let mut handler = Collect::default();

        router
            .generate_stream(&GenerationRequest::new("hi").with_model("acme/x"), &mut handler)
            .await;

        assert!(handler.completed.is_empty());
        assert_eq!(handler.errors.len(), 1);
        assert_eq!(router.get_stats().request_count, 0);
    }

    #[test]
    fn estimate_cost_is_offline() {
        let gateway = EchoProvider::new("gateway");
        let router = router_with(RouterConfig::new("k"), Arc::clone(&gateway), None);

        let estimate = router
            .estimate_cost(&GenerationRequest::new("add a comment").with_max_tokens(1000))
            .unwrap();

        assert_eq!(estimate.model, "google/gemini-2.5-flash");
        // 13 chars / 4 + 200 overhead
        assert_eq!(estimate.estimated_input_tokens, 203);
        assert_eq!(estimate.estimated_output_tokens, 1000);
        // 203 * 0.30/M + 1000 * 2.50/M
        assert_eq!(estimate.estimated_cost, dec!(0.0025609));
        assert!(gateway.models_called().is_empty());
    }

    #[test]
    fn candidates_respect_preferred_providers() {
        let gateway = EchoProvider::new("gateway");
        let router = router_with(
            RouterConfig::new("k").with_preferred_providers(vec![Vendor::OpenAi]),
            gateway,
            None,
        );
        let ids: Vec<&str> = router
            .candidates(Tier::Critical)
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["openai/gpt-5"]);
    }

    #[tokio::test]
    async fn shared_metrics_and_reset() {
        let metrics = Arc::new(RouterMetrics::new());
        let router = ModelRouter::builder(RouterConfig::new("k"))
            .with_gateway_provider(EchoProvider::new("gateway"))
            .with_metrics(Arc::clone(&metrics))
            .build()
            .unwrap();

        router.generate(&GenerationRequest::new("hi")).await.unwrap();
        router.track_error_correction(dec!(0.0001));
        assert_eq!(metrics.snapshot().request_count, 1);
        assert_eq!(metrics.snapshot().error_correction_cost, dec!(0.0001));

        router.reset_stats();
        assert_eq!(router.get_stats().request_count, 0);
        assert_eq!(metrics.snapshot().total_cost, Decimal::ZERO);
    }
}
