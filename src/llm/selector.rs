//! Model selection: turns a task profile and policy into an ordered chain of
//! candidate models.

use crate::error::LlmError;
use crate::llm::analyzer::TaskProfile;
use crate::llm::catalog::{ModelCatalog, ModelDescriptor, PolicyMode, Tier, TierTables, Vendor};

/// The chosen model and the ordered fallback chain it heads.
#[derive(Debug, Clone)]
pub struct Selection<'a> {
    /// Always non-empty; `chain[0]` is the selected model.
    pub chain: Vec<&'a ModelDescriptor>,
}

impl<'a> Selection<'a> {
    pub fn model(&self) -> &'a ModelDescriptor {
        self.chain[0]
    }
}

/// Pure resolver over a catalog and its tier tables.
#[derive(Debug, Clone, Copy)]
pub struct ModelSelector<'a> {
    catalog: &'a ModelCatalog,
    tables: &'a TierTables,
}

impl<'a> ModelSelector<'a> {
    pub fn new(catalog: &'a ModelCatalog, tables: &'a TierTables) -> Self {
        Self { catalog, tables }
    }

    /// The tier's preference list for `mode`, narrowed to `preferred` vendors.
    ///
    /// If no candidate matches the allow-list the unfiltered list is returned.
    pub fn candidates(
        &self,
        tier: Tier,
        mode: PolicyMode,
        preferred: &[Vendor],
    ) -> Vec<&'a ModelDescriptor> {
        let all: Vec<&'a ModelDescriptor> = self
            .tables
            .for_mode(mode)
            .candidates(tier)
            .iter()
            .filter_map(|id| self.catalog.get(id))
            .collect();

        if preferred.is_empty() {
            return all;
        }

        let filtered: Vec<&'a ModelDescriptor> = all
            .iter()
            .copied()
            .filter(|m| preferred.contains(&m.vendor))
            .collect();
        if filtered.is_empty() {
            tracing::debug!(%tier, "No candidate matches preferred providers, using full list");
            all
        } else {
            filtered
        }
    }

    /// Resolve the model chain for a request.
    ///
    /// A forced model heads the chain and is followed by the rest of its own
    /// tier's list. Otherwise the chain is the profile tier's candidate list.
    pub fn select(
        &self,
        profile: &TaskProfile,
        mode: PolicyMode,
        preferred: &[Vendor],
        forced: Option<&str>,
    ) -> Result<Selection<'a>, LlmError> {
        let chain = match forced {
            Some(id) => {
                let forced = self.catalog.get(id).ok_or_else(|| LlmError::UnknownModel {
                    model: id.to_string(),
                })?;
                if profile.requires_vision && !forced.supports_vision {
                    tracing::warn!(model = %forced.id, "Forced model does not accept images");
                }
                let mut chain = vec![forced];
                chain.extend(
                    self.candidates(forced.tier, mode, preferred)
                        .into_iter()
                        .filter(|m| m.id != forced.id),
                );
                chain
            }
            None => self.candidates(profile.tier, mode, preferred),
        };

        if chain.is_empty() {
            // Only reachable with tier tables that were never validated.
            return Err(LlmError::UnknownModel {
                model: format!("<no candidates for tier {}>", profile.tier),
            });
        }

        tracing::debug!(
            model = %chain[0].id,
            tier = %profile.tier,
            ?mode,
            candidates = chain.len(),
            "Selected model"
        );
        Ok(Selection { chain })
    }
}
