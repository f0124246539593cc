//! Consensus judge: one non-streamed LLM call that decides whether the
//! latest round reached substantial agreement.
//!
//! The judge never raises to the caller. Any error — provider failure,
//! unparseable verdict, missing prompt — downgrades to a `false` verdict
//! so the debate proceeds to at worst the round limit.

use std::sync::Arc;
use tracing::{debug, warn};

use agora_llm::{collect_stream, ChatProvider, ChatUsage, ModelConfig};

use crate::personality::{display_name, PersonalityRegistry, DEFAULT_CONSENSUS_PROMPT};

/// Maximum raw content echoed into a parse-failure reasoning string.
const PARSE_FAILURE_PREVIEW: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusVerdict {
    pub consensus: bool,
    pub reasoning: String,
}

impl ConsensusVerdict {
    fn no(reasoning: impl Into<String>) -> Self {
        Self {
            consensus: false,
            reasoning: reasoning.into(),
        }
    }
}

pub struct ConsensusJudge {
    provider: Arc<dyn ChatProvider>,
    prompts: Arc<PersonalityRegistry>,
    model_config: ModelConfig,
}

impl ConsensusJudge {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        prompts: Arc<PersonalityRegistry>,
        model_config: ModelConfig,
    ) -> Self {
        Self {
            provider,
            prompts,
            model_config,
        }
    }

    /// Judge the latest round. Returns the verdict plus the judge call's
    /// usage when an LLM call was actually made.
    pub async fn check(
        &self,
        round: &[(String, String)],
        round_number: u32,
    ) -> (ConsensusVerdict, Option<ChatUsage>) {
        if round.is_empty() {
            return (ConsensusVerdict::no("No responses yet"), None);
        }

        // Always run at least two rounds before judging.
        if round_number < 2 {
            debug!("skipping consensus check on first round");
            return (
                ConsensusVerdict::no("First round - continuing debate"),
                None,
            );
        }

        let system = self
            .prompts
            .get("consensus_check")
            .unwrap_or(DEFAULT_CONSENSUS_PROMPT);

        let response_text = round
            .iter()
            .map(|(personality, text)| format!("**{}**: {}", display_name(personality), text))
            .collect::<Vec<_>>()
            .join("\n\n");
        let user = format!("Analyze these responses for consensus:\n\n{response_text}");

        let rx = match self
            .provider
            .stream_chat(&self.model_config, system, &user)
            .await
        {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "consensus check call failed");
                return (
                    ConsensusVerdict::no(format!("Consensus check failed: {e}")),
                    None,
                );
            }
        };

        let (content, usage) = match collect_stream(rx, self.provider.name()).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "consensus check stream failed");
                return (
                    ConsensusVerdict::no(format!("Consensus check failed: {e}")),
                    None,
                );
            }
        };

        (parse_verdict(&content), usage)
    }
}

/// Locate the first `{...}` substring and JSON-decode it. Any failure
/// yields a `false` verdict echoing a truncated preview of the content.
pub fn parse_verdict(content: &str) -> ConsensusVerdict {
    let preview = || {
        let head: String = content.chars().take(PARSE_FAILURE_PREVIEW).collect();
        ConsensusVerdict::no(format!("Could not parse response: {head}"))
    };

    let Some(open) = content.find('{') else {
        return preview();
    };
    let Some(close_offset) = content[open..].find('}') else {
        return preview();
    };
    let candidate = &content[open..=open + close_offset];

    match serde_json::from_str::<serde_json::Value>(candidate) {
        Ok(value) => ConsensusVerdict {
            consensus: value["consensus"].as_bool().unwrap_or(false),
            reasoning: value["reasoning"]
                .as_str()
                .unwrap_or("No reasoning provided")
                .to_string(),
        },
        Err(_) => preview(),
    }
}
