//! Output length estimation.
//!
//! Generation units are approximated from character length instead of running
//! a real tokenizer. The continuation loop only needs a cheap, deterministic
//! measure that grows with the text, so `ceil(chars / 4)` is used everywhere
//! (including usage numbers reported for orchestrated completions).

use crate::api::models::Message;

/// Characters counted as one generation unit.
pub const CHARS_PER_UNIT: usize = 4;

/// Estimate the number of generation units in `text`.
///
/// Counts Unicode scalar values, not bytes, so multi-byte characters weigh the
/// same as ASCII ones.
///
/// # Examples
///
/// ```
/// use nim_proxy_rust::core::estimator::estimate;
///
/// assert_eq!(estimate(""), 0);
/// assert_eq!(estimate("abcd"), 1);
/// assert_eq!(estimate("abcde"), 2);
/// ```
pub fn estimate(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_UNIT)
}

/// Estimate prompt units for a message list (role and content of every message).
pub fn estimate_messages(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| estimate(&m.role) + estimate(&m.content))
        .sum()
}
