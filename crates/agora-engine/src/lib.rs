//! # agora-engine
//!
//! The debate orchestration engine: a round-by-round state machine with
//! parallel personality fan-out, an LLM-backed consensus judge, and a
//! final synthesis turn. Execution yields a three-mode event stream
//! (tokens, lifecycle markers, state deltas) through a bounded sink.

pub mod consensus;
pub mod engine;
pub mod event;
pub mod personality;
pub mod rounds;
pub mod sink;
pub mod state;
pub mod synthesis;

pub use consensus::{parse_verdict, ConsensusJudge, ConsensusVerdict};
pub use engine::{DebateEngine, EngineConfig, DEFAULT_SYNTHESIS_TIMEOUT, DEFAULT_TURN_TIMEOUT};
pub use event::{EngineEvent, Marker, StateDelta};
pub use personality::{
    display_name, PersonalityRegistry, DEFAULT_CONSENSUS_PROMPT, DEFAULT_SYNTHESIZER_PROMPT,
    SYSTEM_PERSONALITIES,
};
pub use rounds::{format_previous_round, provider_instances, PRIOR_RESPONSE_BUDGET};
pub use sink::{EventSink, DEFAULT_SINK_CAPACITY, DEFAULT_STALL_DEADLINE};
pub use state::DebateState;
pub use synthesis::{build_synthesis_prompt, Synthesizer, SYNTHESIS_RESPONSE_BUDGET, SYNTHESIZER};
