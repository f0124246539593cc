//! Personality registry: named system prompts.
//!
//! Built-in debate personalities ship embedded; a prompts directory can
//! add or override entries. The two system personalities drive consensus
//! checking and synthesis and never participate in a debate round.

use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use agora_core::{AgoraError, Result};

/// Personalities reserved for the engine itself.
pub const SYSTEM_PERSONALITIES: &[&str] = &["consensus_check", "synthesizer"];

pub const DEFAULT_CONSENSUS_PROMPT: &str = "\
You are analyzing a multi-perspective debate. Review the responses below \
and determine if the participants have reached substantial agreement on \
the core points, even if they differ in emphasis or framing.

Respond with JSON only: {\"consensus\": true/false, \"reasoning\": \"brief explanation\"}";

pub const DEFAULT_SYNTHESIZER_PROMPT: &str =
    "You are a rational, dispassionate synthesizer of multiple perspectives.";

const BUILTIN_PROMPTS: &[(&str, &str)] = &[
    (
        "optimist",
        "You are the Optimist. You look for the upside in every question: the \
opportunities, the best plausible outcomes, and the reasons an idea could \
work. Stay grounded in reality, but always lead with what is possible. \
Keep responses focused and under a few paragraphs.",
    ),
    (
        "pessimist",
        "You are the Pessimist. You probe for risks, failure modes, hidden \
costs, and the ways a plan goes wrong. You are not cynical for its own \
sake; your job is to make sure no weakness goes unexamined. Keep responses \
focused and under a few paragraphs.",
    ),
    (
        "analyst",
        "You are the Analyst. You weigh evidence, quantify where possible, and \
separate what is known from what is assumed. Structure your reasoning and \
state your confidence. Keep responses focused and under a few paragraphs.",
    ),
    (
        "creative",
        "You are the Creative. You approach the question sideways: analogies, \
reframings, and options nobody else has put on the table. Push past the \
obvious answer. Keep responses focused and under a few paragraphs.",
    ),
    (
        "pragmatist",
        "You are the Pragmatist. You care about what can actually be done: \
cost, effort, sequencing, and the simplest path that works. Prefer the \
concrete over the abstract. Keep responses focused and under a few \
paragraphs.",
    ),
    ("consensus_check", DEFAULT_CONSENSUS_PROMPT),
    ("synthesizer", DEFAULT_SYNTHESIZER_PROMPT),
];

/// Registry of personality name -> system prompt.
#[derive(Debug, Clone, Default)]
pub struct PersonalityRegistry {
    prompts: BTreeMap<String, String>,
}

impl PersonalityRegistry {
    /// Registry with only the built-in prompts.
    pub fn builtin() -> Self {
        let prompts = BUILTIN_PROMPTS
            .iter()
            .map(|(name, prompt)| (name.to_string(), prompt.to_string()))
            .collect();
        Self { prompts }
    }

    /// Empty registry (for tests exercising fallback paths).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Merge `<name>.txt` files from a directory over the current entries.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            return Err(AgoraError::Config(format!(
                "prompts directory not found: {}",
                dir.display()
            )));
        }
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let prompt = std::fs::read_to_string(&path)?;
            self.prompts.insert(name.to_string(), prompt.trim().to_string());
            loaded += 1;
        }
        debug!(count = loaded, dir = %dir.display(), "loaded personality prompts");
        Ok(loaded)
    }

    pub fn insert(&mut self, name: impl Into<String>, prompt: impl Into<String>) {
        self.prompts.insert(name.into(), prompt.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.prompts.get(name).map(String::as_str)
    }

    /// Prompt for a debate participant; missing prompts are a config error.
    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name).ok_or_else(|| {
            AgoraError::Config(format!("no prompt registered for personality '{name}'"))
        })
    }

    pub fn is_system(name: &str) -> bool {
        SYSTEM_PERSONALITIES.contains(&name)
    }

    /// All registered names.
    pub fn names(&self) -> Vec<String> {
        self.prompts.keys().cloned().collect()
    }

    /// Names eligible as debate participants (system personalities excluded).
    pub fn debate_names(&self) -> Vec<String> {
        self.prompts
            .keys()
            .filter(|name| !Self::is_system(name))
            .cloned()
            .collect()
    }
}

/// "deep_thinker" -> "Deep Thinker", for prompt transcripts.
pub fn display_name(personality: &str) -> String {
    personality
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
