//! Round executor: parallel fan-out of one provider stream per
//! personality, with fail-fast error handling and per-turn timeouts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use agora_core::{AgoraError, Result};
use agora_llm::{ChatProvider, ChatUsage, ModelConfig, StreamChunk};
use agora_usage::{count_chat_tokens, count_tokens};

use crate::event::Marker;
use crate::personality::{display_name, PersonalityRegistry};
use crate::sink::EventSink;

/// Per-response budget when quoting the previous round into a prompt.
pub const PRIOR_RESPONSE_BUDGET: usize = 2_000;

/// Shared inputs for executing rounds of one debate.
pub struct RoundContext {
    pub provider: Arc<dyn ChatProvider>,
    pub prompts: Arc<PersonalityRegistry>,
    pub provider_tag: String,
    pub model: String,
    pub temperature: f32,
    pub turn_timeout: Duration,
}

impl RoundContext {
    fn model_config(&self, instance: u32) -> ModelConfig {
        let mut config = ModelConfig::new(&self.model).with_temperature(self.temperature);
        config.instance = Some(instance);
        config
    }
}

/// Truncate to a character budget, marking the cut with an ellipsis.
pub fn truncate_with_ellipsis(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    let head: String = text.chars().take(budget).collect();
    format!("{head}...")
}

/// Format the previous round's responses for inclusion in a personality's
/// user message. First round gets an empty suffix.
pub fn format_previous_round(previous: Option<&[(String, String)]>) -> String {
    let Some(previous) = previous.filter(|p| !p.is_empty()) else {
        return String::new();
    };
    let mut out = String::from("\n\n## Previous Round Responses\n");
    for (personality, response) in previous {
        out.push_str(&format!(
            "**{}**: {}\n",
            display_name(personality),
            truncate_with_ellipsis(response, PRIOR_RESPONSE_BUDGET),
        ));
    }
    out.push_str("\n---\n\nNow provide your response, considering the above perspectives.");
    out
}

/// Assign instance numbers per provider type, not globally: numbering
/// restarts for each distinct provider participating in the round.
pub fn provider_instances(assignments: &[(String, String)]) -> HashMap<String, u32> {
    let mut counts: HashMap<String, u32> = HashMap::new();
    let mut instances = HashMap::new();
    for (personality, provider) in assignments {
        let next = counts.entry(provider.clone()).or_insert(0);
        instances.insert(personality.clone(), *next);
        *next += 1;
    }
    instances
}

/// Prefer provider-reported usage; fall back to the local estimator and
/// flag the result.
pub fn normalize_usage(
    reported: Option<ChatUsage>,
    system: &str,
    user: &str,
    output: &str,
    model: &str,
) -> ChatUsage {
    match reported {
        Some(usage) => usage,
        None => ChatUsage {
            input_tokens: count_chat_tokens(system, user, model),
            output_tokens: count_tokens(output, model),
            cached_tokens: 0,
            estimated: true,
        },
    }
}

/// Run one round: all personalities in parallel against the same question
/// enriched with the previous round. Returns (personality, text, usage) in
/// declared order. Any failure cancels the rest of the round.
pub async fn run_round(
    ctx: &RoundContext,
    round_number: u32,
    question: &str,
    previous: Option<&[(String, String)]>,
    personalities: &[String],
    sink: &EventSink,
    cancel: &CancellationToken,
) -> Result<Vec<(String, String, ChatUsage)>> {
    // Resolve every prompt up front so a missing one fails the round
    // before any stream starts.
    let mut prompts = Vec::with_capacity(personalities.len());
    for personality in personalities {
        prompts.push(ctx.prompts.require(personality)?.to_string());
    }

    let assignments: Vec<(String, String)> = personalities
        .iter()
        .map(|p| (p.clone(), ctx.provider_tag.clone()))
        .collect();
    let instances = provider_instances(&assignments);

    let user_message = format!("{question}{}", format_previous_round(previous));
    let round_cancel = cancel.child_token();

    let mut set: JoinSet<(usize, Result<(String, ChatUsage)>)> = JoinSet::new();
    for (idx, personality) in personalities.iter().enumerate() {
        let provider = Arc::clone(&ctx.provider);
        let personality = personality.clone();
        let system = prompts[idx].clone();
        let user = user_message.clone();
        let model_config = ctx.model_config(instances.get(&personality).copied().unwrap_or(0));
        let model = ctx.model.clone();
        let sink = sink.clone();
        let task_cancel = round_cancel.clone();
        let turn_timeout = ctx.turn_timeout;

        set.spawn(async move {
            let outcome = run_turn(
                provider,
                model_config,
                &model,
                &personality,
                round_number,
                &system,
                &user,
                &sink,
                &task_cancel,
                turn_timeout,
            )
            .await;
            (idx, outcome)
        });
    }

    let mut results: Vec<Option<(String, ChatUsage)>> = vec![None; personalities.len()];
    let mut first_error: Option<AgoraError> = None;

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, Ok(outcome))) => results[idx] = Some(outcome),
            Ok((idx, Err(e))) => {
                warn!(
                    personality = %personalities[idx],
                    error = %e,
                    "personality turn failed, cancelling round"
                );
                round_cancel.cancel();
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
            Err(join_err) if join_err.is_cancelled() => {}
            Err(join_err) => {
                round_cancel.cancel();
                if first_error.is_none() {
                    first_error = Some(AgoraError::provider(
                        ctx.provider_tag.clone(),
                        format!("personality task panicked: {join_err}"),
                    ));
                }
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    let mut ordered = Vec::with_capacity(personalities.len());
    for (idx, personality) in personalities.iter().enumerate() {
        let (text, usage) = results[idx].take().ok_or_else(|| {
            AgoraError::provider(
                ctx.provider_tag.clone(),
                format!("no result for {personality}"),
            )
        })?;
        ordered.push((personality.clone(), text, usage));
    }
    debug!(round_number, responses = ordered.len(), "round complete");
    Ok(ordered)
}

#[allow(clippy::too_many_arguments)]
async fn run_turn(
    provider: Arc<dyn ChatProvider>,
    model_config: ModelConfig,
    model: &str,
    personality: &str,
    round_number: u32,
    system: &str,
    user: &str,
    sink: &EventSink,
    cancel: &CancellationToken,
    turn_timeout: Duration,
) -> Result<(String, ChatUsage)> {
    if cancel.is_cancelled() {
        return Err(AgoraError::Cancelled);
    }

    sink.marker(Marker::PersonalityStarted {
        round_number,
        personality: personality.to_string(),
    })
    .await?;

    let mut rx = provider.stream_chat(&model_config, system, user).await?;
    let provider_name = provider.name().to_string();

    let stream_task = async {
        let mut text = String::new();
        let mut reported: Option<ChatUsage> = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(AgoraError::Cancelled),
                chunk = rx.recv() => match chunk {
                    Some(StreamChunk::Delta(delta)) => {
                        text.push_str(&delta);
                        sink.token(personality, &delta);
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

    let (text, reported) = tokio::time::timeout(turn_timeout, stream_task)
        .await
        .map_err(|_| {
            AgoraError::provider(
                provider.name(),
                format!("turn timed out after {}s", turn_timeout.as_secs()),
            )
        })??;

    let usage = normalize_usage(reported, system, user, &text, model);
    sink.marker(Marker::PersonalityCompleted {
        round_number,
        personality: personality.to_string(),
        usage: usage.clone(),
    })
    .await?;

    Ok((text, usage))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_round_has_no_suffix() {
        assert_eq!(format_previous_round(None), "");
        assert_eq!(format_previous_round(Some(&[])), "");
    }

    #[test]
    fn test_previous_round_formatting() {
        let previous = vec![
            ("optimist".to_string(), "it will work".to_string()),
            ("pessimist".to_string(), "it will not".to_string()),
        ];
        let formatted = format_previous_round(Some(&previous));
        assert!(formatted.starts_with("\n\n## Previous Round Responses\n"));
        assert!(formatted.contains("**Optimist**: it will work"));
        assert!(formatted.contains("**Pessimist**: it will not"));
        assert!(formatted.ends_with("considering the above perspectives."));
    }

    #[test]
    fn test_long_prior_responses_truncated() {
        let long = "x".repeat(PRIOR_RESPONSE_BUDGET + 500);
        let previous = vec![("analyst".to_string(), long)];
        let formatted = format_previous_round(Some(&previous));
        assert!(formatted.contains(&format!("{}...", "x".repeat(PRIOR_RESPONSE_BUDGET))));
        assert!(!formatted.contains(&"x".repeat(PRIOR_RESPONSE_BUDGET + 1)));
    }

    #[test]
    fn test_instance_numbering_resets_per_provider() {
        let assignments = vec![
            ("a".to_string(), "lm_studio".to_string()),
            ("b".to_string(), "ollama".to_string()),
            ("c".to_string(), "lm_studio".to_string()),
            ("d".to_string(), "lm_studio".to_string()),
        ];
        let instances = provider_instances(&assignments);
        assert_eq!(instances["a"], 0);
        assert_eq!(instances["b"], 0);
        assert_eq!(instances["c"], 1);
        assert_eq!(instances["d"], 2);
    }

    #[test]
    fn test_usage_normalization_prefers_reported() {
        let reported = ChatUsage {
            input_tokens: 42,
            output_tokens: 7,
            cached_tokens: 0,
            estimated: false,
        };
        let usage = normalize_usage(Some(reported), "sys", "user", "out", "gpt-4");
        assert_eq!(usage.input_tokens, 42);
        assert!(!usage.estimated);
    }

    #[test]
    fn test_usage_normalization_falls_back_to_estimator() {
        let usage = normalize_usage(None, "system prompt", "user question", "an answer", "gpt-4");
        assert!(usage.estimated);
        assert!(usage.input_tokens > 0);
        assert!(usage.output_tokens > 0);
    }

    #[test]
    fn test_truncate_char_boundary_safe() {
        let text = "héllo wörld".repeat(300);
        let truncated = truncate_with_ellipsis(&text, 100);
        assert_eq!(truncated.chars().count(), 103);
    }
}
