//! Splitting model output into thinking and answer parts.
//!
//! Models that expose chain-of-thought wrap it in a `<think>...</think>`
//! block. The split happens once, when a personality turn completes; the
//! live stream forwards raw chunks.

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

/// Split a response body into `(thinking, answer)`.
///
/// `X <think>Y</think> Z` becomes thinking `Y` and answer `X Z`, both
/// trimmed. Without a `<think>` block, thinking is `None` and the whole
/// body is the answer. An unterminated block treats everything after
/// `<think>` as thinking.
pub fn split_thinking(body: &str) -> (Option<String>, String) {
    let Some(open) = body.find(OPEN_TAG) else {
        return (None, body.trim().to_string());
    };

    let before = &body[..open];
    let rest = &body[open + OPEN_TAG.len()..];

    let (thinking, after) = match rest.find(CLOSE_TAG) {
        Some(close) => (&rest[..close], &rest[close + CLOSE_TAG.len()..]),
        None => (rest, ""),
    };

    let answer = match (before.trim(), after.trim()) {
        ("", tail) => tail.to_string(),
        (head, "") => head.to_string(),
        (head, tail) => format!("{head} {tail}"),
    };

    let thinking = thinking.trim();
    let thinking = (!thinking.is_empty()).then(|| thinking.to_string());
    (thinking, answer)
}

/// Inverse of [`split_thinking`] for a split pair.
pub fn reassemble(thinking: Option<&str>, answer: &str) -> String {
    match thinking {
        Some(t) => format!("{OPEN_TAG}{t}{CLOSE_TAG}{answer}"),
        None => answer.to_string(),
    }
}
