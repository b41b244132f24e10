//! Per-call cost computation and running totals.

use std::sync::Mutex;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::llm::catalog::ModelDescriptor;

const TOKENS_PER_MILLION: u32 = 1_000_000;

/// USD cost of a call, priced with `model`'s own rate card.
pub fn call_cost(model: &ModelDescriptor, input_tokens: u32, output_tokens: u32) -> Decimal {
    let per_million = Decimal::from(TOKENS_PER_MILLION);
    let input = Decimal::from(input_tokens) / per_million * model.input_price_per_million;
    let output = Decimal::from(output_tokens) / per_million * model.output_price_per_million;
    (input + output).max(Decimal::ZERO)
}

#[derive(Debug, Default)]
struct Totals {
    request_count: u64,
    total_cost: Decimal,
    error_correction_cost: Decimal,
}

/// Running totals owned by one router.
///
/// Shared as `Arc<RouterMetrics>` so several routers (or a caller's own
/// dashboard) can observe the same ledger.
#[derive(Debug, Default)]
pub struct RouterMetrics {
    totals: Mutex<Totals>,
}

/// Point-in-time copy of [`RouterMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub request_count: u64,
    pub total_cost: Decimal,
    pub error_correction_cost: Decimal,
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Totals> {
        self.totals.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record one completed call.
    pub fn record_call(&self, cost: Decimal) {
        let mut totals = self.lock();
        totals.request_count += 1;
        totals.total_cost += cost.max(Decimal::ZERO);
    }

    /// Add cost a caller spent correcting a previous result. Negative
    /// amounts are ignored.
    pub fn track_error_correction(&self, cost: Decimal) {
        if cost.is_sign_negative() && !cost.is_zero() {
            tracing::warn!(cost = %cost, "Ignoring negative error-correction cost");
            return;
        }
        self.lock().error_correction_cost += cost;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let totals = self.lock();
        MetricsSnapshot {
            request_count: totals.request_count,
            total_cost: totals.total_cost,
            error_correction_cost: totals.error_correction_cost,
        }
    }

    pub fn reset(&self) {
        *self.lock() = Totals::default();
    }
}

/// Caller-facing statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStats {
    pub request_count: u64,
    pub total_cost: Decimal,
    pub average_cost_per_request: Decimal,
    pub error_correction_cost: Decimal,
    pub premium_mode: bool,
    /// `total_cost - error_correction_cost`, never below zero.
    pub effective_cost: Decimal,
}

impl RouterStats {
    pub fn from_snapshot(snapshot: MetricsSnapshot, premium_mode: bool) -> Self {
        let average_cost_per_request = if snapshot.request_count == 0 {
            Decimal::ZERO
        } else {
            snapshot.total_cost / Decimal::from(snapshot.request_count)
        };
        Self {
            request_count: snapshot.request_count,
            total_cost: snapshot.total_cost,
            average_cost_per_request,
            error_correction_cost: snapshot.error_correction_cost,
            premium_mode,
            effective_cost: (snapshot.total_cost - snapshot.error_correction_cost)
                .max(Decimal::ZERO),
        }
    }
}
