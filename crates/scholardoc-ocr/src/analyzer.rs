//! Composite quality analyzer: weighs independent signals into one score.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::signals::{ConfidenceSignal, DictionarySignal, GarbledSignal, Signal, TokenConfidence};
use crate::types::SignalResult;

/// Per-signal floor a page's score must clear, independent of the composite.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SignalFloors {
    pub garbled: f64,
    pub dictionary: f64,
    pub confidence: f64,
}

impl Default for SignalFloors {
    fn default() -> Self {
        Self { garbled: 0.5, dictionary: 0.4, confidence: 0.3 }
    }
}

/// Symmetric band around `threshold` in which a page is neither confidently
/// good nor confidently bad; exposed so callers can label near-boundary
/// pages rather than treating the threshold as a hard line.
pub const GRAY_ZONE: f64 = 0.05;

/// Analyzer output: composite score plus the per-signal evidence behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityResult {
    pub composite_score: f64,
    pub flagged: bool,
    pub signal_scores: BTreeMap<String, f64>,
    pub signal_details: BTreeMap<String, SignalResult>,
    pub composite_weights: BTreeMap<String, f64>,
    pub mean_confidence: Option<f64>,
    pub in_gray_zone: bool,
}

/// Weighs regex-garbled, dictionary-coverage, and (when available)
/// engine-confidence into one composite score per page.
pub struct QualityAnalyzer {
    threshold: f64,
    floors: SignalFloors,
    garbled: GarbledSignal,
    dictionary: DictionarySignal,
    confidence: ConfidenceSignal,
}

impl QualityAnalyzer {
    pub fn new(threshold: f64) -> Self {
        Self::with_floors(threshold, SignalFloors::default())
    }

    pub fn with_floors(threshold: f64, floors: SignalFloors) -> Self {
        Self::with_floors_and_samples(threshold, floors, 10)
    }

    /// Like [`Self::with_floors`], but also controls how many sample garbled
    /// words the regex-garbled signal records in its details for debug
    /// output (§6's `samples` configuration option).
    pub fn with_floors_and_samples(threshold: f64, floors: SignalFloors, max_samples: usize) -> Self {
        Self {
            threshold,
            floors,
            garbled: GarbledSignal::with_max_samples(floors.garbled, max_samples),
            dictionary: DictionarySignal::new(floors.dictionary),
            confidence: ConfidenceSignal::new(floors.confidence),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Analyze a single page's text. `tokens`, if supplied, carries Engine-A's
    /// per-token confidence data and enables the engine-confidence signal.
    pub fn analyze(&self, text: &str, tokens: Option<&[TokenConfidence]>) -> QualityResult {
        let garbled = self.garbled.score(text);
        let dictionary = self.dictionary.score(text);
        let confidence = tokens.map(|t| self.confidence.score_from_tokens(t));

        let mut signal_scores = BTreeMap::new();
        let mut signal_details = BTreeMap::new();
        let mut composite_weights = BTreeMap::new();

        signal_scores.insert("garbled".to_string(), garbled.score);
        signal_details.insert("garbled".to_string(), garbled.clone());
        signal_scores.insert("dictionary".to_string(), dictionary.score);
        signal_details.insert("dictionary".to_string(), dictionary.clone());

        let (composite, mean_confidence) = if let Some(conf) = &confidence {
            signal_scores.insert("confidence".to_string(), conf.score);
            signal_details.insert("confidence".to_string(), conf.clone());
            composite_weights.insert("garbled".to_string(), 0.4);
            composite_weights.insert("dictionary".to_string(), 0.3);
            composite_weights.insert("confidence".to_string(), 0.3);

            let raw = garbled.score * 0.4 + dictionary.score * 0.3 + conf.score * 0.3;
            let lifted = if conf.score > 0.95 { raw.max(0.9) } else { raw };
            let capped = if conf.score < 0.2 { lifted.min(0.3) } else { lifted };
            (capped, Some(conf.score))
        } else {
            composite_weights.insert("garbled".to_string(), 0.55);
            composite_weights.insert("dictionary".to_string(), 0.45);
            (garbled.score * 0.55 + dictionary.score * 0.45, None)
        };

        let any_floor_failed = !garbled.passed
            || !dictionary.passed
            || confidence.as_ref().is_some_and(|c| !c.passed);

        let flagged = composite < self.threshold || any_floor_failed;
        let in_gray_zone = (composite - self.threshold).abs() <= GRAY_ZONE;

        QualityResult {
            composite_score: composite,
            flagged,
            signal_scores,
            signal_details,
            composite_weights,
            mean_confidence,
            in_gray_zone,
        }
    }

    /// Analyze each page's text independently, preserving order.
    pub fn analyze_pages(&self, pages: &[String]) -> Vec<QualityResult> {
        pages.iter().map(|text| self.analyze(text, None)).collect()
    }

    pub fn floors(&self) -> SignalFloors {
        self.floors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prose(n: usize) -> String {
        "The world of reason and truth is what philosophy seeks to understand. ".repeat(n)
    }

    #[test]
    fn clean_prose_without_confidence_uses_two_signal_weights() {
        let analyzer = QualityAnalyzer::new(0.85);
        let result = analyzer.analyze(&prose(5), None);
        assert_eq!(result.composite_weights.len(), 2);
        assert!((result.composite_weights["garbled"] - 0.55).abs() < 1e-9);
        assert!((result.composite_weights["dictionary"] - 0.45).abs() < 1e-9);
        assert!(result.mean_confidence.is_none());
    }

    #[test]
    fn high_confidence_lifts_composite_above_point_nine() {
        let analyzer = QualityAnalyzer::new(0.85);
        let tokens = vec![
            TokenConfidence { text: "reason".to_string(), confidence: 99.0 },
            TokenConfidence { text: "truth".to_string(), confidence: 98.0 },
        ];
        let result = analyzer.analyze(&prose(5), Some(&tokens));
        assert!(result.composite_score >= 0.9, "composite was {}", result.composite_score);
        assert_eq!(result.composite_weights.len(), 3);
    }

    #[test]
    fn low_confidence_caps_composite_at_point_three() {
        let analyzer = QualityAnalyzer::new(0.85);
        let tokens = vec![TokenConfidence { text: "xq".to_string(), confidence: 5.0 }];
        let result = analyzer.analyze(&prose(5), Some(&tokens));
        assert!(result.composite_score <= 0.3, "composite was {}", result.composite_score);
        assert!(result.flagged);
    }

    #[test]
    fn gray_zone_is_detected_near_threshold() {
        let analyzer = QualityAnalyzer::new(0.85);
        let result = analyzer.analyze(&prose(5), None);
        let synthetic = QualityResult { composite_score: 0.86, ..result };
        assert!((synthetic.composite_score - 0.85).abs() <= GRAY_ZONE);
    }

    #[test]
    fn analyze_pages_preserves_order() {
        let analyzer = QualityAnalyzer::new(0.85);
        let pages = vec![prose(5), prose(1)];
        let results = analyzer.analyze_pages(&pages);
        assert_eq!(results.len(), 2);
    }
}
