//! In-memory debate state carried across the round loop.

/// State accumulated while a debate runs. Owned by the driver; child
/// tasks never touch it directly.
#[derive(Debug, Clone)]
pub struct DebateState {
    pub question: String,
    /// Participating personalities, in declared order.
    pub personalities: Vec<String>,
    pub max_rounds: u32,
    /// Monotone round counter; 0 until the first round completes.
    pub current_round: u32,
    /// Append-only history: one (personality, full text) list per round.
    pub rounds: Vec<Vec<(String, String)>>,
    pub consensus_reached: bool,
    pub consensus_reasoning: String,
    pub final_synthesis: Option<String>,
}

impl DebateState {
    pub fn new(question: String, personalities: Vec<String>, max_rounds: u32) -> Self {
        Self {
            question,
            personalities,
            max_rounds,
            current_round: 0,
            rounds: Vec::new(),
            consensus_reached: false,
            consensus_reasoning: String::new(),
            final_synthesis: None,
        }
    }

    /// The previous round's responses, if any.
    pub fn previous_round(&self) -> Option<&[(String, String)]> {
        self.rounds.last().map(Vec::as_slice)
    }

    /// Transition rule: synthesize after round N iff consensus was reached
    /// or N hit the round limit.
    pub fn should_synthesize(&self) -> bool {
        self.consensus_reached || self.current_round >= self.max_rounds
    }
}
