use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::debate::{DebateSynthesis, PersonalityResponse};

/// Client-facing event envelope carried by SSE.
///
/// The payload is a tagged sum internally; serialization flattens it into
/// the flat envelope shape (`type` plus the fields the variant carries,
/// with absent fields omitted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateEvent {
    pub debate_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: DebateEventKind,
}

impl DebateEvent {
    pub fn new(debate_id: Uuid, kind: DebateEventKind) -> Self {
        Self {
            debate_id,
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Event type string used as the SSE `event:` field.
    pub fn event_type(&self) -> &'static str {
        self.kind.type_name()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            DebateEventKind::DebateCompleted { .. } | DebateEventKind::DebateFailed { .. }
        )
    }

    /// Render as an SSE frame: `event: <type>\ndata: <json>\n\n`.
    pub fn to_sse(&self) -> String {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".into());
        format!("event: {}\ndata: {}\n\n", self.event_type(), data)
    }
}

/// One variant per event type; each carries exactly the fields it uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DebateEventKind {
    DebateStarted {
        progress: serde_json::Value,
    },
    DebateCompleted {
        progress: serde_json::Value,
        cost: Decimal,
    },
    DebateFailed {
        error: String,
    },

    RoundStarted {
        round_number: u32,
    },
    RoundCompleted {
        round_number: u32,
        progress: serde_json::Value,
    },

    PersonalityStarted {
        round_number: u32,
        personality: String,
    },
    ThinkingChunk {
        round_number: u32,
        personality: String,
        content: String,
    },
    AnswerChunk {
        round_number: u32,
        personality: String,
        content: String,
    },
    PersonalityCompleted {
        round_number: u32,
        personality: String,
        response: PersonalityResponse,
    },

    SynthesisStarted,
    SynthesisChunk {
        content: String,
    },
    SynthesisCompleted {
        synthesis: DebateSynthesis,
    },

    ProgressUpdate {
        progress: serde_json::Value,
    },
    CostUpdate {
        cost: Decimal,
    },

    Error {
        error: String,
    },
}

impl DebateEventKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            DebateEventKind::DebateStarted { .. } => "debate_started",
            DebateEventKind::DebateCompleted { .. } => "debate_completed",
            DebateEventKind::DebateFailed { .. } => "debate_failed",
            DebateEventKind::RoundStarted { .. } => "round_started",
            DebateEventKind::RoundCompleted { .. } => "round_completed",
            DebateEventKind::PersonalityStarted { .. } => "personality_started",
            DebateEventKind::ThinkingChunk { .. } => "thinking_chunk",
            DebateEventKind::AnswerChunk { .. } => "answer_chunk",
            DebateEventKind::PersonalityCompleted { .. } => "personality_completed",
            DebateEventKind::SynthesisStarted => "synthesis_started",
            DebateEventKind::SynthesisChunk { .. } => "synthesis_chunk",
            DebateEventKind::SynthesisCompleted { .. } => "synthesis_completed",
            DebateEventKind::ProgressUpdate { .. } => "progress_update",
            DebateEventKind::CostUpdate { .. } => "cost_update",
            DebateEventKind::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_envelope_flattens_variant_fields() {
        let event = DebateEvent::new(
            Uuid::new_v4(),
            DebateEventKind::AnswerChunk {
                round_number: 2,
                personality: "optimist".into(),
                content: "four".into(),
            },
        );
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "answer_chunk");
        assert_eq!(json["round_number"], 2);
        assert_eq!(json["personality"], "optimist");
        assert_eq!(json["content"], "four");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_sse_frame_shape() {
        let event = DebateEvent::new(
            Uuid::new_v4(),
            DebateEventKind::CostUpdate { cost: dec!(0.05) },
        );
        let frame = event.to_sse();
        assert!(frame.starts_with("event: cost_update\ndata: {"));
        assert!(frame.ends_with("\n\n"));
    }

    #[test]
    fn test_terminal_variants() {
        let id = Uuid::new_v4();
        let completed = DebateEvent::new(
            id,
            DebateEventKind::DebateCompleted {
                progress: serde_json::json!({}),
                cost: dec!(0),
            },
        );
        let failed = DebateEvent::new(
            id,
            DebateEventKind::DebateFailed {
                error: "boom".into(),
            },
        );
        let chunk = DebateEvent::new(
            id,
            DebateEventKind::SynthesisChunk {
                content: "x".into(),
            },
        );
        assert!(completed.is_terminal());
        assert!(failed.is_terminal());
        assert!(!chunk.is_terminal());
    }
}
