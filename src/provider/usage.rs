//! Usage accounting and budget enforcement.
//!
//! Aggregates token and cost usage per model within a provider's budget
//! window. Budgets bound tokens and/or dollar cost; when a window is set the
//! accumulation resets once the window elapses.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

use super::limiter::ProviderError;
use crate::exec::TokenUsage;

// Flat fallback rates; per-model rates for the current generation.
const DEFAULT_INPUT_COST_PER_TOKEN: f64 = 0.000003; // $3 per million tokens
const DEFAULT_OUTPUT_COST_PER_TOKEN: f64 = 0.000015; // $15 per million tokens

/// Budget bounds configured on a provider node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BudgetLimits {
    pub max_tokens: Option<u64>,
    pub max_cost_usd: Option<f64>,
    pub window: Option<Duration>,
}

impl BudgetLimits {
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let object = value.as_object()?;
        Some(Self {
            max_tokens: object.get("maxTokens").and_then(|v| v.as_u64()),
            max_cost_usd: object.get("maxCostUsd").and_then(|v| v.as_f64()),
            window: object
                .get("windowMs")
                .and_then(|v| v.as_u64())
                .map(Duration::from_millis),
        })
    }
}

/// Usage aggregated for one model.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ModelUsage {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Aggregated usage across a provider subtree.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct UsageSummary {
    pub per_model: HashMap<String, ModelUsage>,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub total_requests: u64,
}

#[derive(Debug)]
struct LedgerState {
    budget: Option<BudgetLimits>,
    per_model: HashMap<String, ModelUsage>,
    window_started: DateTime<Utc>,
}

/// Per-provider usage ledger with budget checks.
#[derive(Debug)]
pub struct UsageLedger {
    state: Mutex<LedgerState>,
}

impl UsageLedger {
    pub fn new(budget: Option<BudgetLimits>) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                budget,
                per_model: HashMap::new(),
                window_started: Utc::now(),
            }),
        }
    }

    pub async fn set_budget(&self, budget: Option<BudgetLimits>) {
        self.state.lock().await.budget = budget;
    }

    /// Record one agent call's usage. Returns the updated summary.
    pub async fn record(&self, model: &str, usage: TokenUsage) -> UsageSummary {
        let mut state = self.state.lock().await;
        maybe_reset_window(&mut state);
        let cost = estimate_cost(model, &usage);
        let entry = state.per_model.entry(model.to_string()).or_default();
        entry.requests += 1;
        entry.input_tokens += usage.input_tokens;
        entry.output_tokens += usage.output_tokens;
        entry.cost_usd += cost;
        summarize(&state)
    }

    /// Check the budget before dispatching a call. An exceeded budget is a
    /// real limit event.
    pub async fn check_budget(&self) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        maybe_reset_window(&mut state);
        let Some(budget) = state.budget.clone() else {
            return Ok(());
        };
        let summary = summarize(&state);
        if let Some(max_tokens) = budget.max_tokens
            && summary.total_tokens >= max_tokens
        {
            return Err(ProviderError::BudgetExceeded(format!(
                "{} tokens used of a {} token budget",
                summary.total_tokens, max_tokens
            )));
        }
        if let Some(max_cost) = budget.max_cost_usd
            && summary.total_cost_usd >= max_cost
        {
            return Err(ProviderError::BudgetExceeded(format!(
                "${:.4} spent of a ${:.2} budget",
                summary.total_cost_usd, max_cost
            )));
        }
        Ok(())
    }

    pub async fn summary(&self) -> UsageSummary {
        let state = self.state.lock().await;
        summarize(&state)
    }
}

fn maybe_reset_window(state: &mut LedgerState) {
    if let Some(window) = state.budget.as_ref().and_then(|b| b.window)
        && Utc::now().signed_duration_since(state.window_started)
            >= chrono::Duration::from_std(window).unwrap_or_default()
    {
        state.per_model.clear();
        state.window_started = Utc::now();
    }
}

fn summarize(state: &LedgerState) -> UsageSummary {
    let mut summary = UsageSummary {
        per_model: state.per_model.clone(),
        ..Default::default()
    };
    for usage in state.per_model.values() {
        summary.total_tokens += usage.input_tokens + usage.output_tokens;
        summary.total_cost_usd += usage.cost_usd;
        summary.total_requests += usage.requests;
    }
    summary
}

/// Per-model cost estimate; unknown models use the default Sonnet-class
/// rates.
pub fn estimate_cost(model: &str, usage: &TokenUsage) -> f64 {
    let (input_rate, output_rate) = if model.contains("haiku") {
        (0.000001, 0.000005)
    } else if model.contains("opus") {
        (0.000015, 0.000075)
    } else {
        (DEFAULT_INPUT_COST_PER_TOKEN, DEFAULT_OUTPUT_COST_PER_TOKEN)
    };
    usage.input_tokens as f64 * input_rate + usage.output_tokens as f64 * output_rate
}
