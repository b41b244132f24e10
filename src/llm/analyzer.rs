//! Task analysis: classifies a request into a [`TaskProfile`].
//!
//! Classification runs an ordered rule table; the first rule whose predicate
//! matches decides the tier. The table is plain data so it can be swapped or
//! tested independently of the router.

use std::sync::LazyLock;

use regex::RegexSet;
use serde::{Deserialize, Serialize};

use crate::llm::catalog::Tier;

/// Coarse size/difficulty bucket derived from the tier and token estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Classification result for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProfile {
    pub tier: Tier,
    pub estimated_tokens: u32,
    pub requires_vision: bool,
    pub complexity: Complexity,
    pub rationale: String,
}

/// What the analyzer looks at.
#[derive(Debug, Clone, Copy)]
pub struct TaskInput<'a> {
    pub prompt: &'a str,
    pub image_count: usize,
    /// Length in characters of any existing code sent along with the prompt.
    pub context_len: usize,
}

/// Condition tested against a [`TaskInput`].
#[derive(Debug)]
pub enum Predicate {
    HasImages,
    /// Case-insensitive match of any pattern in the set.
    MatchesAny(RegexSet),
    /// Trimmed prompt length in characters is at least this.
    LengthAtLeast(usize),
    /// Trimmed prompt length in characters is at most this.
    LengthAtMost(usize),
}

impl Predicate {
    fn matches(&self, input: &TaskInput<'_>) -> bool {
        match self {
            Self::HasImages => input.image_count > 0,
            Self::MatchesAny(set) => set.is_match(input.prompt),
            Self::LengthAtLeast(n) => input.prompt.trim().chars().count() >= *n,
            Self::LengthAtMost(n) => input.prompt.trim().chars().count() <= *n,
        }
    }
}

#[derive(Debug)]
pub struct Rule {
    pub name: &'static str,
    pub predicate: Predicate,
    pub tier: Tier,
}

/// Prompts at least this long are treated as critical.
pub const CRITICAL_LENGTH: usize = 2000;
/// Prompts at most this long are treated as simple.
pub const SIMPLE_LENGTH: usize = 80;

fn pattern_set(patterns: &[&str]) -> RegexSet {
    RegexSet::new(patterns.iter().map(|p| format!("(?i){p}")))
        .expect("builtin analyzer patterns are valid")
}

static DEFAULT_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        Rule {
            name: "image attachments",
            predicate: Predicate::HasImages,
            tier: Tier::Vision,
        },
        Rule {
            name: "architecture keywords",
            predicate: Predicate::MatchesAny(pattern_set(&[
                r"\barchitect(ure|ural)?\b",
                r"\bsystem design\b",
                r"\bmicroservices?\b",
                r"\bscalab(le|ility)\b",
                r"\bdatabase schema\b",
            ])),
            tier: Tier::Critical,
        },
        Rule {
            name: "security keywords",
            predicate: Predicate::MatchesAny(pattern_set(&[
                r"\bsecur(e|ity)\b",
                r"\bvulnerab(le|ility|ilities)\b",
                r"\bencrypt(ion|ed)?\b",
                r"\bxss\b",
                r"\bcsrf\b",
                r"\bsql injection\b",
            ])),
            tier: Tier::Critical,
        },
        Rule {
            name: "payment keywords",
            predicate: Predicate::MatchesAny(pattern_set(&[
                r"\bpayments?\b",
                r"\bbilling\b",
                r"\bcheckout\b",
                r"\bstripe\b",
                r"\bsubscriptions?\b",
            ])),
            tier: Tier::Critical,
        },
        Rule {
            name: "authentication keywords",
            predicate: Predicate::MatchesAny(pattern_set(&[
                r"\bauth(entication)?\b",
                r"\bauthoriz(e|ation)\b",
                r"\boauth\b",
                r"\blog ?in flow\b",
                r"\bsign ?up flow\b",
                r"\bsessions? management\b",
                r"\bjwt\b",
            ])),
            tier: Tier::Critical,
        },
        Rule {
            name: "design quality keywords",
            predicate: Predicate::MatchesAny(pattern_set(&[
                r"\bpixel[- ]perfect\b",
                r"\bdesign system\b",
                r"\bpremium (design|look|feel)\b",
                r"\bproduction[- ]ready\b",
                r"\bpolished\b",
            ])),
            tier: Tier::Critical,
        },
        Rule {
            name: "long prompt",
            predicate: Predicate::LengthAtLeast(CRITICAL_LENGTH),
            tier: Tier::Critical,
        },
        Rule {
            name: "simple edit keywords",
            predicate: Predicate::MatchesAny(pattern_set(&[
                r"\badd (a )?comments?\b",
                r"\bfix (a |the |this )?typos?\b",
                r"\brename\b",
                r"\bformat(ting)?\b",
                r"\bchange (the )?(colou?r|text|label|font)\b",
                r"\bindent(ation)?\b",
                r"\bspelling\b",
            ])),
            tier: Tier::Simple,
        },
        Rule {
            name: "short prompt",
            predicate: Predicate::LengthAtMost(SIMPLE_LENGTH),
            tier: Tier::Simple,
        },
    ]
});

/// Deterministic request classifier.
#[derive(Debug, Clone, Copy)]
pub struct TaskAnalyzer<'r> {
    rules: &'r [Rule],
}

impl Default for TaskAnalyzer<'static> {
    fn default() -> Self {
        Self {
            rules: &DEFAULT_RULES,
        }
    }
}

impl<'r> TaskAnalyzer<'r> {
    /// Use a custom rule table. Requests no rule matches are `Standard`.
    pub fn with_rules(rules: &'r [Rule]) -> Self {
        Self { rules }
    }

    /// Classify a request. Never fails.
    pub fn analyze(&self, input: &TaskInput<'_>) -> TaskProfile {
        let (tier, rationale) = self
            .rules
            .iter()
            .find(|rule| rule.predicate.matches(input))
            .map(|rule| (rule.tier, format!("matched rule: {}", rule.name)))
            .unwrap_or_else(|| (Tier::Standard, "no rule matched".to_string()));

        let profile = build_profile(input, tier, rationale);
        tracing::debug!(
            tier = %profile.tier,
            estimated_tokens = profile.estimated_tokens,
            rationale = %profile.rationale,
            "Classified task"
        );
        profile
    }

    /// Profile for a caller-supplied tier; only the size estimate is computed.
    pub fn with_tier(&self, input: &TaskInput<'_>, tier: Tier) -> TaskProfile {
        build_profile(input, tier, "explicit tier override".to_string())
    }
}

/// Fixed token overhead added to the estimate for each tier.
pub fn tier_overhead(tier: Tier) -> u32 {
    match tier {
        Tier::Simple => 200,
        Tier::Standard => 500,
        Tier::Critical => 1000,
        Tier::Vision => 1500,
    }
}

fn build_profile(input: &TaskInput<'_>, tier: Tier, rationale: String) -> TaskProfile {
    let chars = input.prompt.chars().count() + input.context_len;
    let estimated_tokens = u32::try_from(chars / 4)
        .unwrap_or(u32::MAX)
        .saturating_add(tier_overhead(tier));

    let complexity = match tier {
        Tier::Critical => Complexity::High,
        Tier::Simple => Complexity::Low,
        Tier::Standard | Tier::Vision => match estimated_tokens {
            0..1000 => Complexity::Low,
            1000..8000 => Complexity::Medium,
            _ => Complexity::High,
        },
    };

    TaskProfile {
        tier,
        estimated_tokens,
        requires_vision: input.image_count > 0,
        complexity,
        rationale,
    }
}
