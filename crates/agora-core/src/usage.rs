use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The kind of LLM call a usage record accounts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    DebateResponse,
    Synthesis,
    ConsensusCheck,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::DebateResponse => "debate_response",
            Operation::Synthesis => "synthesis",
            Operation::ConsensusCheck => "consensus_check",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debate_response" => Some(Operation::DebateResponse),
            "synthesis" => Some(Operation::Synthesis),
            "consensus_check" => Some(Operation::ConsensusCheck),
            _ => None,
        }
    }
}

/// Pricing for an LLM provider/model. Prices are per 1M tokens in USD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPricing {
    pub provider: String,
    pub model: String,
    pub input_price_per_1m: Decimal,
    pub output_price_per_1m: Decimal,
    /// Some providers charge differently for cached input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_input_price_per_1m: Option<Decimal>,
}

impl ProviderPricing {
    /// Total cost for the given token counts. The cached term is omitted
    /// when no cached tokens were used or no cached price is known.
    pub fn calculate_cost(
        &self,
        input_tokens: u64,
        output_tokens: u64,
        cached_tokens: u64,
    ) -> Decimal {
        let million = Decimal::from(1_000_000u64);
        let input = Decimal::from(input_tokens) / million * self.input_price_per_1m;
        let output = Decimal::from(output_tokens) / million * self.output_price_per_1m;
        let cached = match (cached_tokens, self.cached_input_price_per_1m) {
            (0, _) | (_, None) => Decimal::ZERO,
            (n, Some(price)) => Decimal::from(n) / million * price,
        };
        input + output + cached
    }
}

/// Partial usage record supplied by callers; the recorder fills in
/// identity, cost, and timestamps.
#[derive(Debug, Clone, Default)]
pub struct UsageDraft {
    pub debate_id: Option<Uuid>,
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub operation: Option<Operation>,
    pub personality: Option<String>,
    pub round_number: Option<u32>,
    /// True when token counts came from the local estimator rather than
    /// provider-reported usage metadata.
    pub estimated: bool,
}

/// An immutable, append-only record of one LLM call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debate_id: Option<Uuid>,
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    /// Derived: input + output.
    pub total_tokens: u64,
    pub cost: Decimal,
    pub operation: Operation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_number: Option<u32>,
    pub estimated: bool,
    pub created_at: DateTime<Utc>,
}

/// Estimated cost for an operation, used for credit pre-checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEstimate {
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub input_cost: Decimal,
    pub output_cost: Decimal,
    pub total_cost: Decimal,
    pub input_price_per_1m: Decimal,
    pub output_price_per_1m: Decimal,
}

/// Totals for one summary bucket (a provider or an operation).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageBucket {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Decimal,
}

impl UsageBucket {
    pub fn add(&mut self, record: &UsageRecord) {
        self.requests += 1;
        self.input_tokens += record.input_tokens;
        self.output_tokens += record.output_tokens;
        self.cost += record.cost;
    }
}

/// Aggregated usage for a user over a time period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSummary {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    pub total_requests: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: Decimal,
    pub by_provider: HashMap<String, UsageBucket>,
    pub by_operation: HashMap<String, UsageBucket>,
}
