//! Drives a live debate: engine in one task, the mapper consuming its
//! event stream, envelopes flowing out to the client channel.
//!
//! Terminal-event discipline: the first terminal envelope that reaches
//! the writer is authoritative for the client; the repository keeps the
//! last status written. When cancellation races a normal completion, a
//! client may therefore see `debate_completed` while storage says
//! `cancelled` — by design.

use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use agora_core::{AgoraError, Debate, DebateEvent, DebateEventKind, DebateStatus};
use agora_engine::{DebateEngine, EngineConfig, EventSink, PersonalityRegistry};
use agora_store::DebateRepository;
use agora_usage::UsageService;

use crate::billing::BillingService;
use crate::mapper::{EventMapper, MapperTarget};

/// Everything a live debate run needs.
pub struct StreamContext {
    pub repo: Arc<dyn DebateRepository>,
    pub usage: Arc<UsageService>,
    pub billing: Arc<dyn BillingService>,
    pub engine: DebateEngine,
}

/// Run a debate to its terminal state, sending envelopes to `out`.
///
/// The caller has already validated status and ownership; this function
/// owns every transition from `active` onward.
pub async fn run_debate_stream(
    ctx: StreamContext,
    debate: Debate,
    cancel: CancellationToken,
    out: mpsc::Sender<DebateEvent>,
) {
    let StreamContext {
        repo,
        usage,
        billing,
        engine,
    } = ctx;
    let debate_id = debate.id;

    if let Err(e) = repo
        .update_status(debate_id, DebateStatus::Active, None, None)
        .await
    {
        warn!(error = %e, "failed to mark debate active");
        let _ = out
            .send(DebateEvent::new(
                debate_id,
                DebateEventKind::DebateFailed {
                    error: e.to_string(),
                },
            ))
            .await;
        return;
    }

    // Participants are the declared personalities minus system ones.
    let personalities: Vec<String> = debate
        .settings
        .personalities
        .iter()
        .filter(|p| !PersonalityRegistry::is_system(p))
        .cloned()
        .collect();

    let started = DebateEvent::new(
        debate_id,
        DebateEventKind::DebateStarted {
            progress: serde_json::json!({
                "question": debate.question,
                "max_rounds": debate.max_rounds(),
                "personalities": debate.settings.personalities,
            }),
        },
    );
    if out.send(started).await.is_err() {
        cancel.cancel();
        return;
    }

    let config = EngineConfig {
        question: debate.question.clone(),
        personalities,
        max_rounds: debate.max_rounds(),
        temperature: debate.settings.temperature,
        include_synthesis: debate.settings.include_synthesis,
        provider_tag: debate.provider.clone(),
        model: debate.model.clone(),
    };

    let (sink, mut engine_rx) = EventSink::with_defaults(cancel.clone());
    let engine_cancel = cancel.clone();
    let driver = tokio::spawn(async move { engine.run(config, &sink, &engine_cancel).await });

    let mut mapper = EventMapper::new(
        MapperTarget {
            debate_id,
            user_id: debate.user_id.clone(),
            provider: debate.provider.clone(),
            model: debate.model.clone(),
        },
        Arc::clone(&repo),
        Arc::clone(&usage),
    );

    let mut mapper_error: Option<AgoraError> = None;
    while let Some(event) = engine_rx.recv().await {
        match mapper.map(event).await {
            Ok(envelopes) => {
                let mut client_gone = false;
                for envelope in envelopes {
                    if out.send(envelope).await.is_err() {
                        // Client disconnected; cancel cooperatively but keep
                        // draining so persistence stays consistent.
                        client_gone = true;
                        break;
                    }
                }
                if client_gone {
                    cancel.cancel();
                }
            }
            Err(e) => {
                warn!(error = %e, "event mapper failed, aborting debate");
                cancel.cancel();
                mapper_error = Some(e);
                break;
            }
        }
    }
    // Drain anything the engine still emits after a mapper abort, so its
    // marker sends never block on a full channel.
    if mapper_error.is_some() {
        while engine_rx.recv().await.is_some() {}
    }

    let engine_result = match driver.await {
        Ok(result) => result,
        Err(join_err) => Err(AgoraError::repository(format!(
            "engine task panicked: {join_err}"
        ))),
    };

    let outcome = match (mapper_error, engine_result) {
        (Some(e), _) => Err(e),
        (None, result) => result,
    };

    let (total_input, total_output, total_cost) = mapper.totals();

    match outcome {
        Ok(state) => {
            let completed = finish_completed(
                &repo,
                &billing,
                debate_id,
                &debate.user_id,
                state.current_round,
                total_input,
                total_output,
                total_cost,
            )
            .await;
            let _ = out.send(completed).await;
        }
        Err(AgoraError::Cancelled) => {
            info!(%debate_id, "debate cancelled");
            if let Err(e) = repo
                .update_status(debate_id, DebateStatus::Cancelled, None, None)
                .await
            {
                warn!(error = %e, "failed to mark debate cancelled");
            }
            let _ = out
                .send(DebateEvent::new(
                    debate_id,
                    DebateEventKind::Error {
                        error: "cancelled".into(),
                    },
                ))
                .await;
            let _ = out
                .send(DebateEvent::new(
                    debate_id,
                    DebateEventKind::DebateFailed {
                        error: "cancelled".into(),
                    },
                ))
                .await;
        }
        Err(e) => {
            warn!(%debate_id, error = %e, "debate failed");
            if let Err(repo_err) = repo
                .update_status(debate_id, DebateStatus::Failed, None, Some(e.to_string()))
                .await
            {
                warn!(error = %repo_err, "failed to mark debate failed");
            }
            let _ = out
                .send(DebateEvent::new(
                    debate_id,
                    DebateEventKind::Error {
                        error: e.to_string(),
                    },
                ))
                .await;
            let _ = out
                .send(DebateEvent::new(
                    debate_id,
                    DebateEventKind::DebateFailed {
                        error: e.to_string(),
                    },
                ))
                .await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn finish_completed(
    repo: &Arc<dyn DebateRepository>,
    billing: &Arc<dyn BillingService>,
    debate_id: uuid::Uuid,
    user_id: &str,
    total_rounds: u32,
    total_input: u64,
    total_output: u64,
    total_cost: Decimal,
) -> DebateEvent {
    if let Err(e) = repo
        .update_status(
            debate_id,
            DebateStatus::Completed,
            Some(total_rounds),
            None,
        )
        .await
    {
        warn!(error = %e, "failed to mark debate completed");
    }
    if let Err(e) = repo
        .update_totals(debate_id, total_input, total_output, total_cost)
        .await
    {
        warn!(error = %e, "failed to update debate totals");
    }
    if let Err(e) = billing
        .deduct_credits(user_id, total_cost, "debate", Some(debate_id))
        .await
    {
        warn!(error = %e, "credit deduction failed after completion");
    }

    info!(%debate_id, total_rounds, %total_cost, "debate completed");
    DebateEvent::new(
        debate_id,
        DebateEventKind::DebateCompleted {
            progress: serde_json::json!({
                "total_rounds": total_rounds,
                "total_input_tokens": total_input,
                "total_output_tokens": total_output,
            }),
            cost: total_cost,
        },
    )
}
