//! Internal engine event stream.
//!
//! The state machine yields three modes of events while a debate runs:
//! streamed message tokens, lifecycle markers, and node-level state
//! deltas. The event mapper downstream turns these into client envelopes
//! and performs persistence.

use agora_llm::ChatUsage;

/// One event in the engine's multi-mode stream.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A streamed content delta from one personality (or the synthesizer).
    Token { personality: String, delta: String },
    /// A lifecycle marker. Markers are never dropped or coalesced.
    Marker(Marker),
    /// A node-level delta to the in-memory debate state.
    State(StateDelta),
}

#[derive(Debug, Clone)]
pub enum Marker {
    RoundStarted {
        round_number: u32,
    },
    PersonalityStarted {
        round_number: u32,
        personality: String,
    },
    PersonalityCompleted {
        round_number: u32,
        personality: String,
        usage: ChatUsage,
    },
    RoundCompleted {
        round_number: u32,
        response_count: usize,
    },
    ConsensusCheck {
        round_number: u32,
        skipped: bool,
    },
    ConsensusResult {
        consensus_reached: bool,
        reasoning: String,
        usage: Option<ChatUsage>,
    },
    SynthesisStarted,
    SynthesisCompleted {
        usage: ChatUsage,
    },
}

#[derive(Debug, Clone)]
pub enum StateDelta {
    RoundAppended {
        round_number: u32,
        /// (personality, full text) in declared order.
        responses: Vec<(String, String)>,
    },
    ConsensusUpdated {
        consensus_reached: bool,
        reasoning: String,
    },
    SynthesisSet {
        content: String,
    },
}
