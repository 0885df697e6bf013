//! Engine-reported-confidence quality signal.
//!
//! Unlike [`crate::signals::GarbledSignal`] and [`crate::signals::DictionarySignal`],
//! which are pure functions of page text, this signal consumes token-level
//! confidence data that Engine-A reports alongside its output. When that data
//! isn't available — Engine-B provides no per-token confidence today — the
//! signal returns a neutral, passing score rather than penalizing the page.

use std::collections::BTreeMap;

use crate::signals::Signal;
use crate::types::SignalResult;

/// A single OCR token and the engine's confidence in it, in `0..=100`.
#[derive(Debug, Clone)]
pub struct TokenConfidence {
    pub text: String,
    pub confidence: f64,
}

/// Scores a page by the length-weighted mean of its token confidences.
pub struct ConfidenceSignal {
    floor: f64,
}

impl Default for ConfidenceSignal {
    fn default() -> Self {
        Self { floor: 0.5 }
    }
}

impl ConfidenceSignal {
    pub fn new(floor: f64) -> Self {
        Self { floor }
    }

    /// Weighted mean of `confidence / 100` over non-empty tokens, with token
    /// length (floored at 1) as weight so long, well-recognized words count
    /// more than single stray characters.
    pub fn score_from_tokens(&self, tokens: &[TokenConfidence]) -> SignalResult {
        let mut weighted_sum = 0.0f64;
        let mut total_weight = 0.0f64;
        let mut valid_tokens = 0usize;

        for token in tokens {
            let text = token.text.trim();
            if text.is_empty() || token.confidence <= 0.0 {
                continue;
            }
            let weight = (text.chars().count() as f64).max(1.0);
            weighted_sum += (token.confidence / 100.0) * weight;
            total_weight += weight;
            valid_tokens += 1;
        }

        if valid_tokens == 0 {
            return SignalResult {
                name: "confidence".to_string(),
                score: 0.5,
                passed: true,
                details: details(0),
            };
        }

        let score = weighted_sum / total_weight;
        SignalResult {
            name: "confidence".to_string(),
            score,
            passed: score >= self.floor,
            details: details(valid_tokens),
        }
    }
}

impl Signal for ConfidenceSignal {
    /// No token-level data is available from plain text, so this always
    /// returns the neutral fallback. Callers with Engine-A token data should
    /// use [`ConfidenceSignal::score_from_tokens`] instead.
    fn score(&self, _text: &str) -> SignalResult {
        SignalResult {
            name: "confidence".to_string(),
            score: 0.5,
            passed: true,
            details: details(0),
        }
    }
}

fn details(valid_tokens: usize) -> BTreeMap<String, serde_json::Value> {
    let mut d = BTreeMap::new();
    d.insert("valid_tokens".to_string(), serde_json::json!(valid_tokens));
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(text: &str, confidence: f64) -> TokenConfidence {
        TokenConfidence { text: text.to_string(), confidence }
    }

    #[test]
    fn no_tokens_returns_neutral_pass() {
        let signal = ConfidenceSignal::default();
        let result = signal.score_from_tokens(&[]);
        assert_eq!(result.score, 0.5);
        assert!(result.passed);
    }

    #[test]
    fn high_confidence_tokens_score_high() {
        let signal = ConfidenceSignal::default();
        let tokens = vec![token("philosophy", 95.0), token("reason", 92.0)];
        let result = signal.score_from_tokens(&tokens);
        assert!(result.score > 0.9, "score was {}", result.score);
    }

    #[test]
    fn longer_tokens_weigh_more_than_short_ones() {
        let signal = ConfidenceSignal::default();
        let tokens = vec![token("a", 10.0), token("philosophical", 95.0)];
        let result = signal.score_from_tokens(&tokens);
        assert!(result.score > 0.8, "score was {}", result.score);
    }

    #[test]
    fn blank_tokens_are_ignored() {
        let signal = ConfidenceSignal::default();
        let tokens = vec![token("   ", 5.0), token("reason", 90.0)];
        let result = signal.score_from_tokens(&tokens);
        assert!((result.score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn zero_confidence_tokens_are_ignored() {
        let signal = ConfidenceSignal::default();
        let tokens = vec![token("garbage", 0.0), token("reason", 90.0)];
        let result = signal.score_from_tokens(&tokens);
        assert!((result.score - 0.9).abs() < 1e-9);
    }
}
