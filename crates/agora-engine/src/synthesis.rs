//! Synthesizer: the final turn that reads the whole transcript and
//! produces one integrated answer, streamed like a personality turn.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use agora_core::{AgoraError, Result};
use agora_llm::{ChatProvider, ChatUsage, ModelConfig, StreamChunk};

use crate::event::Marker;
use crate::personality::{display_name, PersonalityRegistry, DEFAULT_SYNTHESIZER_PROMPT};
use crate::rounds::{normalize_usage, truncate_with_ellipsis};
use crate::sink::EventSink;

/// Per-response budget when quoting rounds into the synthesis prompt.
pub const SYNTHESIS_RESPONSE_BUDGET: usize = 1_500;

/// The personality tag synthesis tokens stream under.
pub const SYNTHESIZER: &str = "synthesizer";

/// Build the synthesizer's user message from the full transcript.
pub fn build_synthesis_prompt(
    question: &str,
    rounds: &[Vec<(String, String)>],
    consensus_reasoning: &str,
) -> String {
    let mut parts = vec![format!("Original Question: {question}\n")];

    for (i, round) in rounds.iter().enumerate() {
        parts.push(format!("\n## Round {} Responses\n", i + 1));
        for (personality, response) in round {
            parts.push(format!(
                "**{}**: {}\n",
                display_name(personality),
                truncate_with_ellipsis(response, SYNTHESIS_RESPONSE_BUDGET),
            ));
        }
    }

    parts.push(format!("\n## Debate Status\n{consensus_reasoning}\n"));
    parts.push(
        "\n---\n\nProvide a final integrated perspective \
         that captures the key insights from all viewpoints and rounds of debate."
            .to_string(),
    );
    parts.concat()
}

pub struct Synthesizer {
    provider: Arc<dyn ChatProvider>,
    prompts: Arc<PersonalityRegistry>,
    model_config: ModelConfig,
    timeout: Duration,
}

impl Synthesizer {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        prompts: Arc<PersonalityRegistry>,
        model_config: ModelConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            prompts,
            model_config,
            timeout,
        }
    }

    /// Stream the synthesis turn. Emits `SynthesisStarted`, synthesis
    /// tokens tagged as the synthesizer, and `SynthesisCompleted`.
    pub async fn run(
        &self,
        question: &str,
        rounds: &[Vec<(String, String)>],
        consensus_reasoning: &str,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<(String, ChatUsage)> {
        let system = self
            .prompts
            .get(SYNTHESIZER)
            .unwrap_or(DEFAULT_SYNTHESIZER_PROMPT);
        let user = build_synthesis_prompt(question, rounds, consensus_reasoning);

        sink.marker(Marker::SynthesisStarted).await?;

        let mut rx = self
            .provider
            .stream_chat(&self.model_config, system, &user)
            .await?;
        let provider_name = self.provider.name().to_string();

        let stream_task = async {
            let mut text = String::new();
            let mut reported: Option<ChatUsage> = None;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(AgoraError::Cancelled),
                    chunk = rx.recv() => match chunk {
                        Some(StreamChunk::Delta(delta)) => {
                            text.push_str(&delta);
                            sink.token(SYNTHESIZER, &delta);
                        }
                        Some(StreamChunk::Usage(usage)) => reported = Some(usage),
                        Some(StreamChunk::Done) | None => break,
                        Some(StreamChunk::Error(message)) => {
                            return Err(AgoraError::provider(provider_name.as_str(), message));
                        }
                    },
                }
            }
            Ok((text, reported))
        };

        let (text, reported) = tokio::time::timeout(self.timeout, stream_task)
            .await
            .map_err(|_| {
                AgoraError::provider(
                    self.provider.name(),
                    format!("synthesis timed out after {}s", self.timeout.as_secs()),
                )
            })??;

        let usage = normalize_usage(reported, system, &user, &text, &self.model_config.model);
        sink.marker(Marker::SynthesisCompleted {
            usage: usage.clone(),
        })
        .await?;

        Ok((text, usage))
    }
}
