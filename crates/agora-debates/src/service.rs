use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use agora_core::{
    AgoraError, CostEstimate, CreateDebateRequest, Debate, DebateEvent, DebateListPage,
    DebateStatus, Result,
};
use agora_engine::{DebateEngine, PersonalityRegistry};
use agora_llm::{provider_spec, ChatProvider};
use agora_store::{DebateDraft, DebateRepository};
use agora_usage::{count_tokens, UsageService};

use crate::billing::BillingService;
use crate::stream::{run_debate_stream, StreamContext};

/// Builds a provider instance for a debate's provider tag.
pub type ProviderFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn ChatProvider>> + Send + Sync>;

/// Assumed tokens per personality response when pre-checking credits.
const AVG_RESPONSE_TOKENS: u64 = 800;
/// Prompt framing overhead assumed per call in the pre-check.
const PROMPT_OVERHEAD_TOKENS: u64 = 200;

/// Capacity of the per-stream envelope channel handed to clients.
const CLIENT_CHANNEL_CAPACITY: usize = 256;

/// Façade over debate lifecycle operations. Every method authorizes by
/// user id; debates owned by someone else answer `NotFound` so existence
/// is never disclosed.
pub struct DebateService {
    repo: Arc<dyn DebateRepository>,
    usage: Arc<UsageService>,
    billing: Arc<dyn BillingService>,
    prompts: Arc<PersonalityRegistry>,
    provider_factory: ProviderFactory,
    /// Cancellation handles for live streams.
    active: Arc<DashMap<Uuid, CancellationToken>>,
}

impl DebateService {
    pub fn new(
        repo: Arc<dyn DebateRepository>,
        usage: Arc<UsageService>,
        billing: Arc<dyn BillingService>,
        prompts: Arc<PersonalityRegistry>,
        provider_factory: ProviderFactory,
    ) -> Self {
        Self {
            repo,
            usage,
            billing,
            prompts,
            provider_factory,
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn usage(&self) -> &Arc<UsageService> {
        &self.usage
    }

    /// All registered personality names.
    pub fn personality_names(&self) -> Vec<String> {
        self.prompts.names()
    }

    /// Names eligible as debate participants.
    pub fn debate_personality_names(&self) -> Vec<String> {
        self.prompts.debate_names()
    }

    /// Validate the request, pre-check credits, and persist a pending
    /// debate.
    pub async fn create(&self, user_id: &str, request: CreateDebateRequest) -> Result<Debate> {
        request.validate()?;

        if provider_spec(&request.provider).is_none() && request.provider != "mock" {
            return Err(AgoraError::validation(
                "provider",
                format!("unknown provider '{}'", request.provider),
            ));
        }

        let participants: Vec<&String> = request
            .settings
            .personalities
            .iter()
            .filter(|p| !PersonalityRegistry::is_system(p))
            .collect();
        if participants.is_empty() {
            return Err(AgoraError::validation(
                "personalities",
                "at least one non-system personality is required",
            ));
        }

        let estimate = self.estimate_debate_cost(&request).await;
        self.billing
            .check_credits(user_id, estimate.total_cost)
            .await?;

        let debate = self
            .repo
            .create_debate(DebateDraft {
                user_id: user_id.to_string(),
                question: request.question,
                provider: request.provider,
                model: request.model,
                settings: request.settings,
            })
            .await?;

        info!(debate_id = %debate.id, user = user_id, "created debate");
        Ok(debate)
    }

    /// Worst-case cost for the credit pre-check:
    /// max_rounds × participants × average response size.
    pub async fn estimate_debate_cost(&self, request: &CreateDebateRequest) -> CostEstimate {
        let participants = request
            .settings
            .personalities
            .iter()
            .filter(|p| !PersonalityRegistry::is_system(p))
            .count() as u64;
        let calls = u64::from(request.settings.max_rounds) * participants.max(1);

        let input_per_call =
            count_tokens(&request.question, &request.model) + PROMPT_OVERHEAD_TOKENS;
        self.usage
            .estimate(
                &request.provider,
                &request.model,
                calls * input_per_call,
                calls * AVG_RESPONSE_TOKENS,
            )
            .await
    }

    /// Load with ownership check; foreign debates read as NotFound.
    pub async fn get(&self, debate_id: Uuid, user_id: &str) -> Result<Debate> {
        let debate = self.repo.get_by_id(debate_id, true, true).await?;
        if debate.user_id != user_id {
            return Err(AgoraError::NotFound(format!("debate {debate_id}")));
        }
        Ok(debate)
    }

    pub async fn list(
        &self,
        user_id: &str,
        page: u32,
        page_size: u32,
        status: Option<DebateStatus>,
    ) -> Result<DebateListPage> {
        self.repo
            .list_by_user(user_id, page, page_size, status)
            .await
    }

    /// Start streaming a pending debate. Returns the envelope channel;
    /// the run continues in the background until a terminal event.
    pub async fn start_stream(
        &self,
        debate_id: Uuid,
        user_id: &str,
    ) -> Result<mpsc::Receiver<DebateEvent>> {
        let debate = self.get(debate_id, user_id).await?;

        if debate.status != DebateStatus::Pending {
            return Err(AgoraError::validation(
                "status",
                format!(
                    "debate can only be started from pending, found {}",
                    debate.status.as_str()
                ),
            ));
        }

        let estimate_request = CreateDebateRequest {
            question: debate.question.clone(),
            provider: debate.provider.clone(),
            model: debate.model.clone(),
            settings: debate.settings.clone(),
        };
        let estimate = self.estimate_debate_cost(&estimate_request).await;
        self.billing
            .check_credits(user_id, estimate.total_cost)
            .await?;

        let provider = (self.provider_factory)(&debate.provider)?;
        let cancel = CancellationToken::new();
        self.active.insert(debate_id, cancel.clone());

        let ctx = StreamContext {
            repo: Arc::clone(&self.repo),
            usage: Arc::clone(&self.usage),
            billing: Arc::clone(&self.billing),
            engine: DebateEngine::new(provider, Arc::clone(&self.prompts)),
        };

        let (tx, rx) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            run_debate_stream(ctx, debate, cancel, tx).await;
            active.remove(&debate_id);
        });

        debug!(%debate_id, "debate stream started");
        Ok(rx)
    }

    /// Cancel a pending or active debate. No credit refund. An in-flight
    /// stream is interrupted cooperatively.
    pub async fn cancel(&self, debate_id: Uuid, user_id: &str) -> Result<Debate> {
        let debate = self.get(debate_id, user_id).await?;

        if debate.status.is_terminal() {
            return Err(AgoraError::validation(
                "status",
                format!("cannot cancel debate in status {}", debate.status.as_str()),
            ));
        }

        if let Some(token) = self.active.get(&debate_id) {
            token.cancel();
        }
        self.repo
            .update_status(debate_id, DebateStatus::Cancelled, None, None)
            .await?;

        info!(%debate_id, "debate cancelled by user");
        self.get(debate_id, user_id).await
    }

    /// Delete a debate from any terminal state; rounds, responses, and
    /// synthesis cascade. Usage records survive for auditing.
    pub async fn delete(&self, debate_id: Uuid, user_id: &str) -> Result<()> {
        let debate = self.get(debate_id, user_id).await?;

        if !debate.status.is_terminal() {
            return Err(AgoraError::validation(
                "status",
                format!(
                    "debate must be in a terminal state to delete, found {}",
                    debate.status.as_str()
                ),
            ));
        }

        self.repo.delete(debate_id).await
    }
}
