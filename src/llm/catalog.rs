//! Model catalog and per-tier preference tables.
//!
//! The catalog is built once per router. Each [`ModelDescriptor`] gets its
//! [`ProviderKind`] at build time from the set of direct credentials that were
//! configured, so dispatch never has to re-derive it from the model id.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Quality/cost bucket that decides which preference list is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Simple,
    Standard,
    Critical,
    Vision,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Simple, Tier::Standard, Tier::Critical, Tier::Vision];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Standard => "standard",
            Self::Critical => "critical",
            Self::Vision => "vision",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "standard" => Ok(Self::Standard),
            "critical" => Ok(Self::Critical),
            "vision" => Ok(Self::Vision),
            other => Err(format!(
                "invalid tier '{other}', expected one of: simple, standard, critical, vision"
            )),
        }
    }
}

/// Company that trains and serves a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Anthropic,
    OpenAi,
    Google,
    DeepSeek,
}

impl Vendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Google => "google",
            Self::DeepSeek => "deepseek",
        }
    }

    /// The direct adapter able to serve this vendor's models, if one exists.
    pub fn direct_provider(&self) -> Option<DirectProvider> {
        match self {
            Self::Anthropic => Some(DirectProvider::Anthropic),
            Self::OpenAi => Some(DirectProvider::OpenAi),
            Self::Google | Self::DeepSeek => None,
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vendor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "google" | "gemini" => Ok(Self::Google),
            "deepseek" => Ok(Self::DeepSeek),
            other => Err(format!(
                "invalid provider '{other}', expected one of: anthropic, openai, google, deepseek"
            )),
        }
    }
}

/// Backends reachable without going through the aggregator gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectProvider {
    Anthropic,
    OpenAi,
}

/// How a model is dispatched. Fixed when the catalog is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Direct(DirectProvider),
    Gateway,
}

/// Immutable description of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Gateway-style id, e.g. `anthropic/claude-sonnet-4.5`.
    pub id: String,
    /// Id used by the vendor's own API.
    pub native_id: String,
    pub vendor: Vendor,
    pub provider: ProviderKind,
    pub display_name: String,
    pub context_window: u32,
    pub max_output_tokens: u32,
    /// USD per million input tokens.
    pub input_price_per_million: Decimal,
    /// USD per million output tokens.
    pub output_price_per_million: Decimal,
    pub supports_vision: bool,
    pub supports_streaming: bool,
    /// The tier whose preference lists may hold this model.
    pub tier: Tier,
}

impl ModelDescriptor {
    /// The id to put on the wire for this model's adapter.
    pub fn wire_id(&self) -> &str {
        match self.provider {
            ProviderKind::Direct(_) => &self.native_id,
            ProviderKind::Gateway => &self.id,
        }
    }
}

struct ModelSpec {
    id: &'static str,
    native_id: &'static str,
    vendor: Vendor,
    display_name: &'static str,
    context_window: u32,
    max_output_tokens: u32,
    input_price: Decimal,
    output_price: Decimal,
    vision: bool,
    tier: Tier,
}

fn builtin_specs() -> Vec<ModelSpec> {
    vec![
        ModelSpec {
            id: "anthropic/claude-opus-4.1",
            native_id: "claude-opus-4-1",
            vendor: Vendor::Anthropic,
            display_name: "Claude Opus 4.1",
            context_window: 200_000,
            max_output_tokens: 32_000,
            input_price: dec!(15),
            output_price: dec!(75),
            vision: true,
            tier: Tier::Critical,
        },
        ModelSpec {
            id: "anthropic/claude-sonnet-4.5",
            native_id: "claude-sonnet-4-5",
            vendor: Vendor::Anthropic,
            display_name: "Claude Sonnet 4.5",
            context_window: 200_000,
            max_output_tokens: 64_000,
            input_price: dec!(3),
            output_price: dec!(15),
            vision: true,
            tier: Tier::Critical,
        },
        ModelSpec {
            id: "anthropic/claude-haiku-4.5",
            native_id: "claude-haiku-4-5",
            vendor: Vendor::Anthropic,
            display_name: "Claude Haiku 4.5",
            context_window: 200_000,
            max_output_tokens: 64_000,
            input_price: dec!(1),
            output_price: dec!(5),
            vision: true,
            tier: Tier::Simple,
        },
        ModelSpec {
            id: "anthropic/claude-sonnet-4",
            native_id: "claude-sonnet-4-0",
            vendor: Vendor::Anthropic,
            display_name: "Claude Sonnet 4",
            context_window: 200_000,
            max_output_tokens: 64_000,
            input_price: dec!(3),
            output_price: dec!(15),
            vision: true,
            tier: Tier::Standard,
        },
        ModelSpec {
            id: "openai/gpt-5",
            native_id: "gpt-5",
            vendor: Vendor::OpenAi,
            display_name: "GPT-5",
            context_window: 400_000,
            max_output_tokens: 128_000,
            input_price: dec!(1.25),
            output_price: dec!(10),
            vision: true,
            tier: Tier::Critical,
        },
        ModelSpec {
            id: "openai/gpt-5-mini",
            native_id: "gpt-5-mini",
            vendor: Vendor::OpenAi,
            display_name: "GPT-5 Mini",
            context_window: 400_000,
            max_output_tokens: 128_000,
            input_price: dec!(0.25),
            output_price: dec!(2),
            vision: true,
            tier: Tier::Simple,
        },
        ModelSpec {
            id: "openai/gpt-4.1",
            native_id: "gpt-4.1",
            vendor: Vendor::OpenAi,
            display_name: "GPT-4.1",
            context_window: 1_047_576,
            max_output_tokens: 32_768,
            input_price: dec!(2),
            output_price: dec!(8),
            vision: true,
            tier: Tier::Standard,
        },
        ModelSpec {
            id: "openai/gpt-4o",
            native_id: "gpt-4o",
            vendor: Vendor::OpenAi,
            display_name: "GPT-4o",
            context_window: 128_000,
            max_output_tokens: 16_384,
            input_price: dec!(2.5),
            output_price: dec!(10),
            vision: true,
            tier: Tier::Vision,
        },
        ModelSpec {
            id: "openai/gpt-4o-mini",
            native_id: "gpt-4o-mini",
            vendor: Vendor::OpenAi,
            display_name: "GPT-4o Mini",
            context_window: 128_000,
            max_output_tokens: 16_384,
            input_price: dec!(0.15),
            output_price: dec!(0.60),
            vision: true,
            tier: Tier::Vision,
        },
        ModelSpec {
            id: "google/gemini-2.5-pro",
            native_id: "gemini-2.5-pro",
            vendor: Vendor::Google,
            display_name: "Gemini 2.5 Pro",
            context_window: 1_048_576,
            max_output_tokens: 65_536,
            input_price: dec!(1.25),
            output_price: dec!(10),
            vision: true,
            tier: Tier::Critical,
        },
        ModelSpec {
            id: "google/gemini-2.5-flash",
            native_id: "gemini-2.5-flash",
            vendor: Vendor::Google,
            display_name: "Gemini 2.5 Flash",
            context_window: 1_048_576,
            max_output_tokens: 65_536,
            input_price: dec!(0.30),
            output_price: dec!(2.50),
            vision: true,
            tier: Tier::Simple,
        },
        ModelSpec {
            id: "deepseek/deepseek-chat-v3.1",
            native_id: "deepseek-chat",
            vendor: Vendor::DeepSeek,
            display_name: "DeepSeek V3.1",
            context_window: 163_840,
            max_output_tokens: 32_768,
            input_price: dec!(0.27),
            output_price: dec!(1.10),
            vision: false,
            tier: Tier::Standard,
        },
    ]
}

/// Registry of every model the router may dispatch to.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
    index: HashMap<String, usize>,
}

impl ModelCatalog {
    /// Build the builtin catalog.
    ///
    /// A vendor's models dispatch directly only when that vendor's direct
    /// credential is in `direct`; otherwise they go through the gateway.
    pub fn builtin(direct: &[DirectProvider]) -> Self {
        let models = builtin_specs()
            .into_iter()
            .map(|spec| {
                let provider = match spec.vendor.direct_provider() {
                    Some(p) if direct.contains(&p) => ProviderKind::Direct(p),
                    _ => ProviderKind::Gateway,
                };
                ModelDescriptor {
                    id: spec.id.to_string(),
                    native_id: spec.native_id.to_string(),
                    vendor: spec.vendor,
                    provider,
                    display_name: spec.display_name.to_string(),
                    context_window: spec.context_window,
                    max_output_tokens: spec.max_output_tokens,
                    input_price_per_million: spec.input_price,
                    output_price_per_million: spec.output_price,
                    supports_vision: spec.vision,
                    supports_streaming: true,
                    tier: spec.tier,
                }
            })
            .collect();
        Self::new(models)
    }

    /// Build a catalog from explicit descriptors. Later duplicates replace earlier ones.
    pub fn new(descriptors: Vec<ModelDescriptor>) -> Self {
        let mut models: Vec<ModelDescriptor> = Vec::with_capacity(descriptors.len());
        let mut index = HashMap::new();
        for descriptor in descriptors {
            match index.get(&descriptor.id) {
                Some(&pos) => models[pos] = descriptor,
                None => {
                    index.insert(descriptor.id.clone(), models.len());
                    models.push(descriptor);
                }
            }
        }
        Self { models, index }
    }

    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.index.get(id).map(|&i| &self.models[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn models_by_vendor(&self, vendor: Vendor) -> Vec<&ModelDescriptor> {
        self.models.iter().filter(|m| m.vendor == vendor).collect()
    }
}

/// Router-wide policy that picks which tier table applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Cost-optimized ordering.
    #[default]
    Standard,
    /// Quality-first ordering.
    Premium,
}

impl PolicyMode {
    pub fn from_premium(premium: bool) -> Self {
        if premium { Self::Premium } else { Self::Standard }
    }
}

/// Ordered candidate model ids per tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTable {
    tiers: BTreeMap<Tier, Vec<String>>,
}

impl TierTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the preference list for a tier, replacing any previous one.
    pub fn with_tier<I, S>(mut self, tier: Tier, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tiers
            .insert(tier, ids.into_iter().map(Into::into).collect());
        self
    }

    /// Preference list for `tier`; empty if the tier is missing.
    pub fn candidates(&self, tier: Tier) -> &[String] {
        self.tiers.get(&tier).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// The two table variants, one per [`PolicyMode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTables {
    pub standard: TierTable,
    pub premium: TierTable,
}

impl TierTables {
    pub fn builtin() -> Self {
        let standard = TierTable::new()
            .with_tier(
                Tier::Simple,
                [
                    "google/gemini-2.5-flash",
                    "openai/gpt-5-mini",
                    "anthropic/claude-haiku-4.5",
                ],
            )
            .with_tier(
                Tier::Standard,
                [
                    "deepseek/deepseek-chat-v3.1",
                    "openai/gpt-4.1",
                    "anthropic/claude-sonnet-4",
                ],
            )
            .with_tier(
                Tier::Critical,
                [
                    "anthropic/claude-sonnet-4.5",
                    "openai/gpt-5",
                    "google/gemini-2.5-pro",
                    "anthropic/claude-opus-4.1",
                ],
            )
            .with_tier(Tier::Vision, ["openai/gpt-4o-mini", "openai/gpt-4o"]);

        let premium = TierTable::new()
            .with_tier(
                Tier::Simple,
                [
                    "anthropic/claude-haiku-4.5",
                    "openai/gpt-5-mini",
                    "google/gemini-2.5-flash",
                ],
            )
            .with_tier(
                Tier::Standard,
                [
                    "anthropic/claude-sonnet-4",
                    "openai/gpt-4.1",
                    "deepseek/deepseek-chat-v3.1",
                ],
            )
            .with_tier(
                Tier::Critical,
                [
                    "anthropic/claude-opus-4.1",
                    "anthropic/claude-sonnet-4.5",
                    "openai/gpt-5",
                    "google/gemini-2.5-pro",
                ],
            )
            .with_tier(Tier::Vision, ["openai/gpt-4o", "openai/gpt-4o-mini"]);

        Self { standard, premium }
    }

    pub fn for_mode(&self, mode: PolicyMode) -> &TierTable {
        match mode {
            PolicyMode::Standard => &self.standard,
            PolicyMode::Premium => &self.premium,
        }
    }

    /// Check that every tier has a candidate in both variants and that every
    /// listed id is a catalog model of that same tier. Vision entries must
    /// also accept images.
    pub fn validate(&self, catalog: &ModelCatalog) -> Result<(), ConfigError> {
        for (variant, table) in [("standard", &self.standard), ("premium", &self.premium)] {
            for tier in Tier::ALL {
                let candidates = table.candidates(tier);
                if candidates.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        key: format!("tier_tables.{variant}.{tier}"),
                        message: "tier has no candidate models".to_string(),
                    });
                }
                for id in candidates {
                    let Some(model) = catalog.get(id) else {
                        return Err(ConfigError::InvalidValue {
                            key: format!("tier_tables.{variant}.{tier}"),
                            message: format!("model '{id}' is not in the catalog"),
                        });
                    };
                    if model.tier != tier {
                        return Err(ConfigError::InvalidValue {
                            key: format!("tier_tables.{variant}.{tier}"),
                            message: format!("model '{id}' belongs to tier {}", model.tier),
                        });
                    }
                    if tier == Tier::Vision && !model.supports_vision {
                        return Err(ConfigError::InvalidValue {
                            key: format!("tier_tables.{variant}.{tier}"),
                            message: format!("model '{id}' does not accept images"),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
