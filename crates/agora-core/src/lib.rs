//! # agora-core
//!
//! Core types and primitives for the Agora debate engine. This crate
//! defines the shared vocabulary used by every other crate in the
//! workspace: debate entities, the event envelope, usage accounting
//! types, and the unified error type.

pub mod debate;
pub mod error;
pub mod event;
pub mod thinking;
pub mod usage;

pub use debate::{
    CreateDebateRequest, Debate, DebateListItem, DebateListPage, DebateRound, DebateSettings,
    DebateStatus, DebateSynthesis, PersonalityResponse, MAX_QUESTION_CHARS,
};
pub use error::{AgoraError, Result};
pub use event::{DebateEvent, DebateEventKind};
pub use thinking::{reassemble, split_thinking};
pub use usage::{
    CostEstimate, Operation, ProviderPricing, UsageBucket, UsageDraft, UsageRecord, UsageSummary,
};
