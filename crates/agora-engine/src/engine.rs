//! The debate state machine.
//!
//! start -> debate_round -> check_consensus -> (debate_round | synthesize) -> end.
//! After round N the driver enters synthesis iff consensus was reached or
//! N hit the round limit; the conditional is one comparison after the
//! judge runs.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use agora_core::{AgoraError, Result};
use agora_llm::{ChatProvider, ModelConfig};

use crate::consensus::ConsensusJudge;
use crate::event::{Marker, StateDelta};
use crate::personality::PersonalityRegistry;
use crate::rounds::{run_round, RoundContext};
use crate::sink::EventSink;
use crate::state::DebateState;
use crate::synthesis::Synthesizer;

pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(240);

/// Per-debate inputs for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub question: String,
    /// Non-system personalities, in declared order.
    pub personalities: Vec<String>,
    pub max_rounds: u32,
    pub temperature: f32,
    pub include_synthesis: bool,
    pub provider_tag: String,
    pub model: String,
}

/// Drives a debate to completion, emitting the three-mode event stream
/// into the sink as it goes.
pub struct DebateEngine {
    provider: Arc<dyn ChatProvider>,
    prompts: Arc<PersonalityRegistry>,
    turn_timeout: Duration,
    synthesis_timeout: Duration,
}

impl DebateEngine {
    pub fn new(provider: Arc<dyn ChatProvider>, prompts: Arc<PersonalityRegistry>) -> Self {
        Self {
            provider,
            prompts,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            synthesis_timeout: DEFAULT_SYNTHESIS_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, turn: Duration, synthesis: Duration) -> Self {
        self.turn_timeout = turn;
        self.synthesis_timeout = synthesis;
        self
    }

    /// Run the debate. Returns the final in-memory state; errors leave the
    /// caller responsible for marking the debate failed.
    pub async fn run(
        &self,
        config: EngineConfig,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<DebateState> {
        if config.personalities.is_empty() {
            return Err(AgoraError::validation(
                "personalities",
                "at least one personality is required",
            ));
        }

        let mut state = DebateState::new(
            config.question.clone(),
            config.personalities.clone(),
            config.max_rounds,
        );

        let round_ctx = RoundContext {
            provider: Arc::clone(&self.provider),
            prompts: Arc::clone(&self.prompts),
            provider_tag: config.provider_tag.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            turn_timeout: self.turn_timeout,
        };
        let judge = ConsensusJudge::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.prompts),
            ModelConfig::new(&config.model).with_temperature(config.temperature),
        );

        loop {
            if cancel.is_cancelled() {
                return Err(AgoraError::Cancelled);
            }

            let round_number = state.current_round + 1;
            info!(round_number, "starting debate round");
            sink.marker(Marker::RoundStarted { round_number }).await?;

            let previous = state.previous_round().map(<[_]>::to_vec);
            let results = run_round(
                &round_ctx,
                round_number,
                &state.question,
                previous.as_deref(),
                &config.personalities,
                sink,
                cancel,
            )
            .await?;

            let responses: Vec<(String, String)> = results
                .iter()
                .map(|(personality, text, _)| (personality.clone(), text.clone()))
                .collect();
            state.rounds.push(responses.clone());
            state.current_round = round_number;

            sink.marker(Marker::RoundCompleted {
                round_number,
                response_count: responses.len(),
            })
            .await?;
            sink.state(StateDelta::RoundAppended {
                round_number,
                responses,
            })
            .await?;

            if cancel.is_cancelled() {
                return Err(AgoraError::Cancelled);
            }

            let skipped = round_number < 2;
            sink.marker(Marker::ConsensusCheck {
                round_number,
                skipped,
            })
            .await?;

            let (verdict, judge_usage) = judge
                .check(state.previous_round().unwrap_or(&[]), round_number)
                .await;
            state.consensus_reached = verdict.consensus;
            state.consensus_reasoning = verdict.reasoning.clone();

            if !skipped {
                sink.marker(Marker::ConsensusResult {
                    consensus_reached: verdict.consensus,
                    reasoning: verdict.reasoning.clone(),
                    usage: judge_usage,
                })
                .await?;
            }
            sink.state(StateDelta::ConsensusUpdated {
                consensus_reached: verdict.consensus,
                reasoning: verdict.reasoning,
            })
            .await?;

            if state.should_synthesize() {
                break;
            }
        }

        if config.include_synthesis {
            debug!("entering synthesis");
            let synthesizer = Synthesizer::new(
                Arc::clone(&self.provider),
                Arc::clone(&self.prompts),
                ModelConfig::new(&config.model).with_temperature(config.temperature),
                self.synthesis_timeout,
            );
            let (content, _usage) = synthesizer
                .run(
                    &state.question,
                    &state.rounds,
                    &state.consensus_reasoning,
                    sink,
                    cancel,
                )
                .await?;
            state.final_synthesis = Some(content.clone());
            sink.state(StateDelta::SynthesisSet { content }).await?;
        }

        info!(
            rounds = state.current_round,
            consensus = state.consensus_reached,
            "debate finished"
        );
        Ok(state)
    }
}
