use chrono::{DateTime, Datelike, NaiveDate, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use agora_core::{
    AgoraError, CostEstimate, Result, UsageBucket, UsageDraft, UsageRecord, UsageSummary,
};
use agora_store::UsageStore;

use crate::pricing::PricingResolver;

/// Records per-call usage, prices it, and aggregates summaries.
pub struct UsageService {
    pricing: Arc<PricingResolver>,
    store: Arc<dyn UsageStore>,
    /// Cheap per-user month-to-date rollup, keyed by (user, "YYYY-MM").
    rollups: RwLock<HashMap<(String, String), UsageBucket>>,
}

impl UsageService {
    pub fn new(pricing: Arc<PricingResolver>, store: Arc<dyn UsageStore>) -> Self {
        Self {
            pricing,
            store,
            rollups: RwLock::new(HashMap::new()),
        }
    }

    pub fn pricing(&self) -> &Arc<PricingResolver> {
        &self.pricing
    }

    /// Complete a partial record with identity, computed cost, and
    /// timestamps, then append it to the store.
    pub async fn record(&self, user_id: &str, draft: UsageDraft) -> Result<UsageRecord> {
        let operation = draft.operation.ok_or_else(|| {
            AgoraError::validation("operation", "usage draft must carry an operation")
        })?;

        let pricing = self.pricing.price(&draft.provider, &draft.model).await;
        let cost = pricing.calculate_cost(
            draft.input_tokens,
            draft.output_tokens,
            draft.cached_tokens,
        );

        let record = UsageRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            debate_id: draft.debate_id,
            provider: draft.provider,
            model: draft.model,
            input_tokens: draft.input_tokens,
            output_tokens: draft.output_tokens,
            cached_tokens: draft.cached_tokens,
            total_tokens: draft.input_tokens + draft.output_tokens,
            cost,
            operation,
            personality: draft.personality,
            round_number: draft.round_number,
            estimated: draft.estimated,
            created_at: Utc::now(),
        };

        self.store.append(&record).await?;

        let key = (user_id.to_string(), month_key(record.created_at));
        self.rollups.write().entry(key).or_default().add(&record);
        debug!(
            user = user_id,
            operation = operation.as_str(),
            tokens = record.total_tokens,
            "recorded usage"
        );

        Ok(record)
    }

    /// Price an operation without side effects.
    pub async fn estimate(
        &self,
        provider: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> CostEstimate {
        let pricing = self.pricing.price(provider, model).await;
        let input_cost = pricing.calculate_cost(input_tokens, 0, 0);
        let output_cost = pricing.calculate_cost(0, output_tokens, 0);
        CostEstimate {
            provider: provider.to_string(),
            model: model.to_string(),
            input_tokens,
            output_tokens,
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
            input_price_per_1m: pricing.input_price_per_1m,
            output_price_per_1m: pricing.output_price_per_1m,
        }
    }

    /// Aggregate totals and breakdowns; the default period is the current
    /// calendar month in UTC.
    pub async fn summary(
        &self,
        user_id: &str,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<UsageSummary> {
        let (start, end) = range.unwrap_or_else(|| current_month_utc(Utc::now()));
        let records = self.store.for_range(user_id, Some((start, end))).await?;

        let mut summary = UsageSummary {
            user_id: user_id.to_string(),
            start_date: Some(start),
            end_date: Some(end),
            total_requests: 0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_tokens: 0,
            total_cost: Decimal::ZERO,
            by_provider: HashMap::new(),
            by_operation: HashMap::new(),
        };

        for record in &records {
            summary.total_requests += 1;
            summary.total_input_tokens += record.input_tokens;
            summary.total_output_tokens += record.output_tokens;
            summary.total_tokens += record.total_tokens;
            summary.total_cost += record.cost;
            summary
                .by_provider
                .entry(record.provider.clone())
                .or_default()
                .add(record);
            summary
                .by_operation
                .entry(record.operation.as_str().to_string())
                .or_default()
                .add(record);
        }

        Ok(summary)
    }

    /// Month-to-date totals from the in-process rollup, without touching
    /// the store. Empty bucket when nothing was recorded this process.
    pub fn month_to_date(&self, user_id: &str) -> UsageBucket {
        let key = (user_id.to_string(), month_key(Utc::now()));
        self.rollups.read().get(&key).cloned().unwrap_or_default()
    }

    /// Most-recent-first usage history.
    pub async fn history(
        &self,
        user_id: &str,
        limit: u32,
        offset: u32,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<UsageRecord>> {
        self.store.list(user_id, limit, offset, range).await
    }
}

fn month_key(at: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", at.year(), at.month())
}

/// [start of this month, start of next month) in UTC.
pub fn current_month_utc(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start_date =
        NaiveDate::from_ymd_opt(now.year(), now.month(), 1).unwrap_or(now.date_naive());
    let (next_year, next_month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    let end_date =
        NaiveDate::from_ymd_opt(next_year, next_month, 1).unwrap_or(now.date_naive());

    let to_utc = |d: NaiveDate| {
        DateTime::<Utc>::from_naive_utc_and_offset(
            d.and_hms_opt(0, 0, 0).unwrap_or_default(),
            Utc,
        )
    };
    (to_utc(start_date), to_utc(end_date))
}
