//! Deterministic token estimation.
//!
//! Used for cost pre-checks before a call and as the last-resort count
//! when a provider reports no usage. Tokenizer handles are expensive to
//! build, so one process-wide LRU holds one handle per encoder family.

use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

/// Encoder families the estimator distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncoderFamily {
    /// GPT-4 era; also a good approximation for Claude, Gemini, Grok, Llama.
    Cl100k,
    /// GPT-4o and the o-series.
    O200k,
}

/// Pick the encoder family for a model id.
pub fn family_for_model(model: &str) -> EncoderFamily {
    let model = model.to_lowercase();
    if model.starts_with("gpt-4o")
        || model.starts_with("gpt-5")
        || model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
    {
        EncoderFamily::O200k
    } else {
        EncoderFamily::Cl100k
    }
}

static ENCODERS: Lazy<Mutex<LruCache<EncoderFamily, Arc<CoreBPE>>>> =
    Lazy::new(|| Mutex::new(LruCache::new(NonZeroUsize::new(4).expect("nonzero"))));

fn encoder(family: EncoderFamily) -> Arc<CoreBPE> {
    let mut cache = ENCODERS.lock();
    if let Some(bpe) = cache.get(&family) {
        return Arc::clone(bpe);
    }
    let bpe = match family {
        EncoderFamily::Cl100k => tiktoken_rs::cl100k_base(),
        EncoderFamily::O200k => tiktoken_rs::o200k_base(),
    }
    .expect("bundled tokenizer data loads");
    let bpe = Arc::new(bpe);
    cache.put(family, Arc::clone(&bpe));
    bpe
}

/// Count tokens in a text for the given model. Empty input is 0.
pub fn count_tokens(text: &str, model: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    let bpe = encoder(family_for_model(model));
    bpe.encode_ordinary(text).len() as u64
}

/// Count tokens for a system + user message pair, including the per-message
/// framing overhead chat APIs add.
pub fn count_chat_tokens(system: &str, user: &str, model: &str) -> u64 {
    // Each message carries role/delimiter framing; replies are primed with
    // an assistant header.
    const PER_MESSAGE_OVERHEAD: u64 = 4;
    const REPLY_PRIMING: u64 = 2;
    count_tokens(system, model)
        + count_tokens(user, model)
        + 2 * PER_MESSAGE_OVERHEAD
        + REPLY_PRIMING
}
