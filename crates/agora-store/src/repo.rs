use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use agora_core::{
    Debate, DebateListPage, DebateSettings, DebateStatus, PersonalityResponse, Result, UsageRecord,
};

/// Fields needed to create a debate; the repository generates the id and
/// timestamps.
#[derive(Debug, Clone)]
pub struct DebateDraft {
    pub user_id: String,
    pub question: String,
    pub provider: String,
    pub model: String,
    pub settings: DebateSettings,
}

/// Typed persistence contract for debates.
///
/// Authorization is NOT performed here; the service layer owns ownership
/// checks. Lookup misses surface as `AgoraError::NotFound`.
#[async_trait]
pub trait DebateRepository: Send + Sync {
    async fn create_debate(&self, draft: DebateDraft) -> Result<Debate>;

    async fn get_by_id(
        &self,
        id: Uuid,
        include_rounds: bool,
        include_synthesis: bool,
    ) -> Result<Debate>;

    async fn list_by_user(
        &self,
        user_id: &str,
        page: u32,
        page_size: u32,
        status: Option<DebateStatus>,
    ) -> Result<DebateListPage>;

    /// Update status, optionally the round counter and error message.
    /// Sets `started_at` on the first transition to active and
    /// `completed_at` on the transition to completed.
    async fn update_status(
        &self,
        id: Uuid,
        status: DebateStatus,
        current_round: Option<u32>,
        error_message: Option<String>,
    ) -> Result<()>;

    async fn update_totals(
        &self,
        id: Uuid,
        input_tokens: u64,
        output_tokens: u64,
        cost: Decimal,
    ) -> Result<()>;

    async fn save_round(&self, debate_id: Uuid, round_number: u32) -> Result<Uuid>;

    async fn save_response(&self, round_id: Uuid, response: &PersonalityResponse) -> Result<Uuid>;

    async fn save_synthesis(
        &self,
        debate_id: Uuid,
        content: &str,
        input_tokens: u64,
        output_tokens: u64,
        cost: Decimal,
    ) -> Result<Uuid>;

    /// Delete a debate; rounds, responses, and synthesis cascade. Usage
    /// records are independently owned and survive for auditing.
    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// Append-only store for usage records, keyed by user.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn append(&self, record: &UsageRecord) -> Result<()>;

    /// Most-recent-first page of records, optionally bounded to a range.
    async fn list(
        &self,
        user_id: &str,
        limit: u32,
        offset: u32,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<UsageRecord>>;

    /// All records for a user within a range (for aggregation).
    async fn for_range(
        &self,
        user_id: &str,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<UsageRecord>>;
}
