//! Quality signals: independent, pure scorers over page text.
//!
//! Each signal is a pure function of its inputs to a [`crate::types::SignalResult`].
//! The only I/O a signal performs is reading its own one-time bundled resource
//! (the philosophy vocabulary, the dictionary word list) at construction time.

mod confidence;
mod dictionary;
mod garbled;

pub use confidence::{ConfidenceSignal, TokenConfidence};
pub use dictionary::DictionarySignal;
pub use garbled::GarbledSignal;

use crate::types::SignalResult;

/// A quality signal: scores text, optionally aided by engine confidence data.
pub trait Signal {
    fn score(&self, text: &str) -> SignalResult;
}

pub(crate) fn strip_punct(word: &str) -> String {
    word.trim_matches(|c: char| {
        matches!(
            c,
            '.' | ',' | ';' | ':' | '!' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '"' | '\'' | '-' | '\u{2013}' | '\u{2014}'
        )
    })
    .to_string()
}
