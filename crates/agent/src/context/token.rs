//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. Small local
//! models tokenize English at roughly that rate, and the estimate only has to
//! be good enough to keep prompts inside the model window.

use localmind_core::message::Message;

/// Per-message overhead for role markers and template delimiters.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Estimate tokens for a single message including per-message overhead.
pub fn estimate_message_tokens(message: &Message) -> usize {
    MESSAGE_OVERHEAD + estimate_tokens(&message.content)
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Longest prefix of `text` (on a char boundary) whose estimate fits `tokens`.
pub fn fit_to_tokens(text: &str, tokens: usize) -> &str {
    let max_bytes = tokens.saturating_mul(4);
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
