//! # agora-llm
//!
//! Uniform streaming chat interface over heterogeneous LLM back-ends.
//! One operation — `stream_chat` — with usage metadata normalized across
//! the OpenAI-compatible family, Anthropic, and Gemini.

pub mod anthropic;
pub mod factory;
pub mod gemini;
pub mod mock;
pub mod openai_compatible;
pub mod provider;
pub mod spec;

pub use factory::build_provider;
pub use mock::{MockProvider, MockReply};
pub use provider::{collect_stream, ChatProvider, ChatUsage, ModelConfig, StreamChunk};
pub use spec::{instance_model_name, provider_spec, ProviderSpec, PROVIDER_SPECS};
