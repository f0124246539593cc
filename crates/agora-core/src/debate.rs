use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AgoraError, Result};

/// Maximum question length accepted at create time.
pub const MAX_QUESTION_CHARS: usize = 10_000;

/// Debate execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebateStatus {
    /// Created but not started.
    Pending,
    /// Currently executing.
    Active,
    /// Finished successfully.
    Completed,
    /// Failed with an error.
    Failed,
    /// Cancelled by the user.
    Cancelled,
}

impl DebateStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DebateStatus::Completed | DebateStatus::Failed | DebateStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DebateStatus::Pending => "pending",
            DebateStatus::Active => "active",
            DebateStatus::Completed => "completed",
            DebateStatus::Failed => "failed",
            DebateStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DebateStatus::Pending),
            "active" => Some(DebateStatus::Active),
            "completed" => Some(DebateStatus::Completed),
            "failed" => Some(DebateStatus::Failed),
            "cancelled" => Some(DebateStatus::Cancelled),
            _ => None,
        }
    }
}

/// Configurable debate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebateSettings {
    /// Maximum number of debate rounds (1..=10).
    pub max_rounds: u32,
    /// LLM temperature (0.0..=2.0).
    pub temperature: f32,
    /// Personality names participating, in declared order.
    pub personalities: Vec<String>,
    /// Whether to generate a final synthesis.
    pub include_synthesis: bool,
}

impl Default for DebateSettings {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            temperature: 0.7,
            personalities: vec!["optimist".into(), "pessimist".into(), "analyst".into()],
            include_synthesis: true,
        }
    }
}

impl DebateSettings {
    /// Validate ranges. Out-of-range values are a local error for the caller.
    pub fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.max_rounds) {
            return Err(AgoraError::validation(
                "max_rounds",
                format!("must be between 1 and 10, got {}", self.max_rounds),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(AgoraError::validation(
                "temperature",
                format!("must be between 0.0 and 2.0, got {}", self.temperature),
            ));
        }
        if self.personalities.is_empty() {
            return Err(AgoraError::validation(
                "personalities",
                "at least one personality is required",
            ));
        }
        Ok(())
    }
}

/// Request to create a new debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDebateRequest {
    /// The question or topic to debate.
    pub question: String,
    /// LLM provider tag (e.g. "anthropic", "openai").
    pub provider: String,
    /// Model identifier (e.g. "claude-sonnet-4-20250514").
    pub model: String,
    #[serde(default)]
    pub settings: DebateSettings,
}

impl CreateDebateRequest {
    pub fn validate(&self) -> Result<()> {
        if self.question.is_empty() {
            return Err(AgoraError::validation("question", "must not be empty"));
        }
        if self.question.chars().count() > MAX_QUESTION_CHARS {
            return Err(AgoraError::validation(
                "question",
                format!("must be at most {MAX_QUESTION_CHARS} characters"),
            ));
        }
        if self.provider.is_empty() {
            return Err(AgoraError::validation("provider", "must not be empty"));
        }
        if self.model.is_empty() {
            return Err(AgoraError::validation("model", "must not be empty"));
        }
        self.settings.validate()
    }
}

/// A single personality's response in a round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalityResponse {
    pub personality: String,
    /// Extended thinking content, when the model emitted a `<think>` block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    pub answer: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Decimal,
    pub created_at: DateTime<Utc>,
}

/// A single round of the debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateRound {
    pub id: Uuid,
    pub debate_id: Uuid,
    /// 1-indexed, strictly monotone per debate.
    pub round_number: u32,
    /// One entry per participating personality, in declared order.
    pub responses: Vec<PersonalityResponse>,
    pub created_at: DateTime<Utc>,
}

/// Final synthesis combining all perspectives. At most one per debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateSynthesis {
    pub id: Uuid,
    pub debate_id: Uuid,
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Full debate with all data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debate {
    pub id: Uuid,
    pub user_id: String,
    pub question: String,
    pub status: DebateStatus,
    pub provider: String,
    pub model: String,
    pub settings: DebateSettings,

    /// Round counter: 0 before the first round, then the last completed round.
    pub current_round: u32,

    #[serde(default)]
    pub rounds: Vec<DebateRound>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<DebateSynthesis>,

    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost: Decimal,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Debate {
    pub fn max_rounds(&self) -> u32 {
        self.settings.max_rounds
    }
}

/// Summary item for debate lists (no round content).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateListItem {
    pub id: Uuid,
    /// Question truncated to 100 chars for display.
    pub question: String,
    pub status: DebateStatus,
    pub provider: String,
    pub model: String,
    pub current_round: u32,
    pub max_rounds: u32,
    pub total_cost: Decimal,
    pub created_at: DateTime<Utc>,
}

impl DebateListItem {
    pub fn from_debate(d: &Debate) -> Self {
        Self {
            id: d.id,
            question: truncate_question(&d.question),
            status: d.status,
            provider: d.provider.clone(),
            model: d.model.clone(),
            current_round: d.current_round,
            max_rounds: d.max_rounds(),
            total_cost: d.total_cost,
            created_at: d.created_at,
        }
    }
}

/// Paginated list of debates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateListPage {
    pub debates: Vec<DebateListItem>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub has_more: bool,
}

fn truncate_question(question: &str) -> String {
    let mut chars = question.chars();
    let head: String = chars.by_ref().take(100).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(question: &str) -> CreateDebateRequest {
        CreateDebateRequest {
            question: question.into(),
            provider: "anthropic".into(),
            model: "claude-sonnet-4-20250514".into(),
            settings: DebateSettings::default(),
        }
    }

    #[test]
    fn test_question_length_boundaries() {
        let at_limit = "x".repeat(MAX_QUESTION_CHARS);
        assert!(request(&at_limit).validate().is_ok());

        let over_limit = "x".repeat(MAX_QUESTION_CHARS + 1);
        let err = request(&over_limit).validate().unwrap_err();
        assert!(matches!(err, AgoraError::Validation { .. }));

        assert!(request("").validate().is_err());
    }

    #[test]
    fn test_settings_ranges() {
        let mut s = DebateSettings::default();
        s.max_rounds = 0;
        assert!(s.validate().is_err());
        s.max_rounds = 11;
        assert!(s.validate().is_err());
        s.max_rounds = 10;
        assert!(s.validate().is_ok());

        s.temperature = 2.5;
        assert!(s.validate().is_err());
        s.temperature = 0.0;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_empty_personalities_rejected() {
        let mut s = DebateSettings::default();
        s.personalities.clear();
        let err = s.validate().unwrap_err();
        match err {
            AgoraError::Validation { field, .. } => assert_eq!(field, "personalities"),
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn test_status_transitions_and_terminality() {
        assert!(!DebateStatus::Pending.is_terminal());
        assert!(!DebateStatus::Active.is_terminal());
        assert!(DebateStatus::Completed.is_terminal());
        assert!(DebateStatus::Failed.is_terminal());
        assert!(DebateStatus::Cancelled.is_terminal());
        assert_eq!(DebateStatus::parse("active"), Some(DebateStatus::Active));
        assert_eq!(DebateStatus::parse("bogus"), None);
    }

    #[test]
    fn test_list_item_truncates_question() {
        let long = "q".repeat(250);
        let item_question = truncate_question(&long);
        assert_eq!(item_question.chars().count(), 103);
        assert!(item_question.ends_with("..."));

        let short = truncate_question("short question");
        assert_eq!(short, "short question");
    }
}
