use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use agora_core::Result;

/// Per-call model parameters. Connection details (base URL, key) live on
/// the provider instance; this carries what varies per debate.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Model identifier, e.g. "claude-sonnet-4-20250514".
    pub model: String,
    /// Sampling temperature (0.0..=2.0).
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Instance number for providers that need distinct model handles for
    /// parallel calls (LM Studio). None or 0 adds no suffix.
    pub instance: Option<u32>,
}

impl ModelConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.7,
            max_tokens: 8192,
            instance: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_instance(mut self, instance: u32) -> Self {
        self.instance = Some(instance);
        self
    }
}

/// Token usage reported by a provider, normalized across back-ends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    /// True when counts came from a local estimator, not the provider.
    pub estimated: bool,
}

/// A chunk of a streaming chat response. The sequence is finite and
/// non-restartable; `Done` is the terminal element.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// Content text delta.
    Delta(String),
    /// Usage metadata. May arrive mid-stream or at completion; the latest
    /// one wins.
    Usage(ChatUsage),
    /// Stream finished normally.
    Done,
    /// The stream failed mid-flight.
    Error(String),
}

/// Trait implemented by each LLM back-end.
///
/// One operation: start a streaming chat turn and hand back a channel of
/// chunks. Providers that can't stream adapt internally.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider tag, e.g. "anthropic".
    fn name(&self) -> &str;

    /// Start a streaming chat call. Fails before any network I/O when the
    /// provider requires an API key and none is configured.
    async fn stream_chat(
        &self,
        config: &ModelConfig,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<tokio::sync::mpsc::Receiver<StreamChunk>>;
}

/// Drain a chat stream into a single string plus whatever usage the
/// provider reported. Used for non-streamed calls (the consensus judge).
pub async fn collect_stream(
    mut rx: tokio::sync::mpsc::Receiver<StreamChunk>,
    provider: &str,
) -> Result<(String, Option<ChatUsage>)> {
    let mut text = String::new();
    let mut usage = None;
    while let Some(chunk) = rx.recv().await {
        match chunk {
            StreamChunk::Delta(delta) => text.push_str(&delta),
            StreamChunk::Usage(u) => usage = Some(u),
            StreamChunk::Done => break,
            StreamChunk::Error(message) => {
                return Err(agora_core::AgoraError::provider(provider, message));
            }
        }
    }
    Ok((text, usage))
}
