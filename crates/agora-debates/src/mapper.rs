//! Event mapper: turns the engine's internal stream into client-facing
//! envelopes and performs every persistence side-effect that happens
//! during streaming.
//!
//! Delivery discipline: a row is durable before the envelope announcing
//! it goes out — save_round before `round_started`, save_response before
//! `personality_completed`, save_synthesis before `synthesis_completed`.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use agora_core::{
    split_thinking, DebateEvent, DebateEventKind, DebateStatus, DebateSynthesis, Operation,
    PersonalityResponse, Result, UsageDraft,
};
use agora_engine::{EngineEvent, Marker, SYNTHESIZER};
use agora_llm::ChatUsage;
use agora_store::DebateRepository;
use agora_usage::UsageService;

/// Identity of the debate a mapper is serving.
#[derive(Debug, Clone)]
pub struct MapperTarget {
    pub debate_id: Uuid,
    pub user_id: String,
    pub provider: String,
    pub model: String,
}

pub struct EventMapper {
    target: MapperTarget,
    repo: Arc<dyn DebateRepository>,
    usage: Arc<UsageService>,

    current_round: u32,
    current_round_id: Option<Uuid>,
    /// Per-personality streaming buffer.
    buffers: HashMap<String, String>,
    in_synthesis: bool,

    total_input_tokens: u64,
    total_output_tokens: u64,
    total_cost: Decimal,
}

impl EventMapper {
    pub fn new(
        target: MapperTarget,
        repo: Arc<dyn DebateRepository>,
        usage: Arc<UsageService>,
    ) -> Self {
        Self {
            target,
            repo,
            usage,
            current_round: 0,
            current_round_id: None,
            buffers: HashMap::new(),
            in_synthesis: false,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cost: Decimal::ZERO,
        }
    }

    pub fn totals(&self) -> (u64, u64, Decimal) {
        (
            self.total_input_tokens,
            self.total_output_tokens,
            self.total_cost,
        )
    }

    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    fn envelope(&self, kind: DebateEventKind) -> DebateEvent {
        DebateEvent::new(self.target.debate_id, kind)
    }

    /// Map one engine event to zero or more client envelopes, performing
    /// persistence side-effects first.
    pub async fn map(&mut self, event: EngineEvent) -> Result<Vec<DebateEvent>> {
        match event {
            EngineEvent::Token { personality, delta } => Ok(self.on_token(personality, delta)),
            EngineEvent::Marker(marker) => self.on_marker(marker).await,
            // State deltas track the in-memory graph; nothing client-facing.
            EngineEvent::State(_) => Ok(vec![]),
        }
    }

    fn on_token(&mut self, personality: String, delta: String) -> Vec<DebateEvent> {
        self.buffers
            .entry(personality.clone())
            .or_default()
            .push_str(&delta);

        let kind = if self.in_synthesis && personality == SYNTHESIZER {
            DebateEventKind::SynthesisChunk { content: delta }
        } else {
            DebateEventKind::AnswerChunk {
                round_number: self.current_round,
                personality,
                content: delta,
            }
        };
        vec![self.envelope(kind)]
    }

    async fn on_marker(&mut self, marker: Marker) -> Result<Vec<DebateEvent>> {
        match marker {
            Marker::RoundStarted { round_number } => {
                self.current_round = round_number;
                self.buffers.clear();
                let round_id = self.repo.save_round(self.target.debate_id, round_number).await?;
                self.current_round_id = Some(round_id);
                Ok(vec![
                    self.envelope(DebateEventKind::RoundStarted { round_number })
                ])
            }

            Marker::PersonalityStarted {
                round_number,
                personality,
            } => {
                self.buffers.insert(personality.clone(), String::new());
                Ok(vec![self.envelope(DebateEventKind::PersonalityStarted {
                    round_number,
                    personality,
                })])
            }

            Marker::PersonalityCompleted {
                round_number,
                personality,
                usage,
            } => {
                let full = self.buffers.remove(&personality).unwrap_or_default();
                let (thinking, answer) = split_thinking(&full);

                let record = self
                    .record_usage(
                        Operation::DebateResponse,
                        &usage,
                        Some(personality.clone()),
                        Some(round_number),
                    )
                    .await?;

                let response = PersonalityResponse {
                    personality: personality.clone(),
                    thinking,
                    answer,
                    input_tokens: record.input_tokens,
                    output_tokens: record.output_tokens,
                    cost: record.cost,
                    created_at: record.created_at,
                };

                if let Some(round_id) = self.current_round_id {
                    self.repo.save_response(round_id, &response).await?;
                }

                Ok(vec![
                    self.envelope(DebateEventKind::PersonalityCompleted {
                        round_number,
                        personality,
                        response,
                    }),
                    self.envelope(DebateEventKind::CostUpdate {
                        cost: self.total_cost,
                    }),
                ])
            }

            Marker::RoundCompleted {
                round_number,
                response_count,
            } => {
                let envelope = self.envelope(DebateEventKind::RoundCompleted {
                    round_number,
                    progress: serde_json::json!({ "response_count": response_count }),
                });
                self.repo
                    .update_status(
                        self.target.debate_id,
                        DebateStatus::Active,
                        Some(round_number),
                        None,
                    )
                    .await?;
                Ok(vec![envelope])
            }

            Marker::ConsensusCheck {
                round_number,
                skipped,
            } => Ok(vec![self.envelope(DebateEventKind::ProgressUpdate {
                progress: serde_json::json!({
                    "phase": "consensus_check",
                    "round_number": round_number,
                    "skipped": skipped,
                }),
            })]),

            Marker::ConsensusResult {
                consensus_reached,
                reasoning,
                usage,
            } => {
                // The judge's call is billed to the user but stays out of
                // the debate's running totals, which cover only responses
                // and the synthesis.
                if let Some(usage) = usage {
                    self.usage
                        .record(
                            &self.target.user_id,
                            UsageDraft {
                                debate_id: Some(self.target.debate_id),
                                provider: self.target.provider.clone(),
                                model: self.target.model.clone(),
                                input_tokens: usage.input_tokens,
                                output_tokens: usage.output_tokens,
                                cached_tokens: usage.cached_tokens,
                                operation: Some(Operation::ConsensusCheck),
                                personality: None,
                                round_number: Some(self.current_round),
                                estimated: usage.estimated,
                            },
                        )
                        .await?;
                }
                Ok(vec![self.envelope(DebateEventKind::ProgressUpdate {
                    progress: serde_json::json!({
                        "phase": "consensus_result",
                        "consensus_reached": consensus_reached,
                        "reasoning": reasoning,
                    }),
                })])
            }

            Marker::SynthesisStarted => {
                self.in_synthesis = true;
                self.buffers.insert(SYNTHESIZER.to_string(), String::new());
                Ok(vec![self.envelope(DebateEventKind::SynthesisStarted)])
            }

            Marker::SynthesisCompleted { usage } => {
                self.in_synthesis = false;
                let content = self.buffers.remove(SYNTHESIZER).unwrap_or_default();

                let record = self
                    .record_usage(Operation::Synthesis, &usage, None, None)
                    .await?;

                let synthesis_id = self
                    .repo
                    .save_synthesis(
                        self.target.debate_id,
                        &content,
                        record.input_tokens,
                        record.output_tokens,
                        record.cost,
                    )
                    .await?;

                let synthesis = DebateSynthesis {
                    id: synthesis_id,
                    debate_id: self.target.debate_id,
                    content,
                    input_tokens: record.input_tokens,
                    output_tokens: record.output_tokens,
                    cost: record.cost,
                    created_at: Utc::now(),
                };

                Ok(vec![
                    self.envelope(DebateEventKind::SynthesisCompleted { synthesis }),
                    self.envelope(DebateEventKind::CostUpdate {
                        cost: self.total_cost,
                    }),
                ])
            }
        }
    }

    /// Record one LLM call's usage, fold it into the running totals, and
    /// keep the persisted totals in step.
    async fn record_usage(
        &mut self,
        operation: Operation,
        usage: &ChatUsage,
        personality: Option<String>,
        round_number: Option<u32>,
    ) -> Result<agora_core::UsageRecord> {
        let record = self
            .usage
            .record(
                &self.target.user_id,
                UsageDraft {
                    debate_id: Some(self.target.debate_id),
                    provider: self.target.provider.clone(),
                    model: self.target.model.clone(),
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                    cached_tokens: usage.cached_tokens,
                    operation: Some(operation),
                    personality,
                    round_number,
                    estimated: usage.estimated,
                },
            )
            .await?;

        self.total_input_tokens += record.input_tokens;
        self.total_output_tokens += record.output_tokens;
        self.total_cost += record.cost;

        self.repo
            .update_totals(
                self.target.debate_id,
                self.total_input_tokens,
                self.total_output_tokens,
                self.total_cost,
            )
            .await?;

        Ok(record)
    }
}
