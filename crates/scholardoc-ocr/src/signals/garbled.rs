//! Regex-garbled quality signal.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::signals::{strip_punct, Signal};
use crate::types::SignalResult;

/// Patterns that mark a token garbled, each paired with a label used in
/// sample-issue reporting. `consonant_cluster` is skipped for tokens ending
/// in one of [`GERMAN_SUFFIXES`].
static GARBLED_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r"(?i)[bcdfghjklmnpqrstvwxz]{6,}").unwrap(), "consonant_cluster"),
        (Regex::new(r#"[^\w\s.,;:!?'"\-\u{2013}\u{2014}\u{2026}*()]{3,}"#).unwrap(), "symbol_run"),
        (Regex::new(r"\b[A-Z][a-z]+[A-Z][a-z]*\b").unwrap(), "weird_case"),
        (Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1f\x7f-\x9f]").unwrap(), "control_char"),
    ]
});

/// ~16 regexes matching legitimate references/metadata that would otherwise
/// look garbled: page numbers, ranges, roman numerals, figure refs, years,
/// ISBN prefixes, decimals, citation codes, section symbols, DOI-shaped ids.
static VALID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"^\d+$").unwrap(),
        Regex::new(r"^\d{1,4}[-\u{2013}\u{2014}]+\d{1,4}$").unwrap(),
        Regex::new(r"(?i)^[ivxlcdm]+$").unwrap(),
        Regex::new(r"^\d{4}$").unwrap(),
        Regex::new(r"^[A-Z]\d+$").unwrap(),
        Regex::new(r"^\d+[a-z]?$").unwrap(),
        Regex::new(r"(?i)^ISBN").unwrap(),
        Regex::new(r"^\d{1,3}\.\d").unwrap(),
        Regex::new(r"^[A-Z]{2,4}\d").unwrap(),
        Regex::new(r"(?i)^pp?\.\s*\d").unwrap(),
        Regex::new(r"^\(\d+\)$").unwrap(),
        Regex::new(r"^\[\d+\]$").unwrap(),
        Regex::new(r"^\u{00a7}\d").unwrap(),
        Regex::new(r"^\d+[a-z]?[-\u{2013}\u{2014}]+\d+[a-z]?$").unwrap(),
        Regex::new(r"^[\d][\d\-\u{2013}\u{2014}]+[\d]$").unwrap(),
        Regex::new(r"^\d[\d.\-\u{2013}\u{2014}/]+\d$").unwrap(),
    ]
});

const GERMAN_SUFFIXES: &[&str] = &["keit", "heit", "ung", "schaft", "lich", "isch", "tum", "nis"];

/// A small set of valid short words across English/French/Latin that would
/// otherwise trip the signal's minimum-token-length floor.
const VALID_SHORT: &[&str] = &[
    "a", "i", "à", "y", "ô", "le", "la", "de", "du", "un", "en", "et", "ou", "au", "il", "je", "tu", "on", "ce", "se",
    "ne", "the", "of", "to", "in", "is", "it", "an", "as", "at", "be", "by", "or", "so", "we", "if", "my", "up", "no",
    "do", "ad", "ex", "ab",
];

/// Curated multi-language philosophy vocabulary: German idealism/phenomenology
/// (Kant, Hegel, Husserl, Heidegger), French phenomenology, and Greek
/// transliterations. Frozen at compile time and loaded once.
const PHILOSOPHY_VOCABULARY: &[&str] = &[
    // Heidegger
    "erschlossenheit", "befindlichkeit", "geworfenheit", "eigentlichkeit", "uneigentlichkeit", "vorhandenheit",
    "zuhandenheit", "mitsein", "dasein", "zeitlichkeit", "geschichtlichkeit", "weltlichkeit", "sorge", "schuld",
    "entschlossenheit", "wiederholung", "augenblick", "vorlaufen", "gewesenheit", "gegenwärtigen", "gewärtigen",
    "verstehen", "auslegung", "rede", "gerede", "neugier", "zweideutigkeit", "verfallenheit", "angst", "furcht",
    "langeweile", "stimmung", "befindlich", "lichtung", "gestell", "ereignis", "kehre", "gelassenheit",
    "grundstimmung", "unverborgenheit", "seinsgeschichte",
    // Kant
    "vernunft", "verstand", "anschauung", "urteilskraft", "pflicht", "kategorisch", "imperativ", "transzendental",
    "apriorisch", "erkenntnis", "erscheinung", "noumenon", "ding", "einbildungskraft", "sinnlichkeit", "empfindung",
    "wahrnehmung",
    // Hegel
    "geist", "aufhebung", "dialektik", "synthese", "entfremdung", "selbstbewusstsein", "absolut", "vermittlung",
    "wirklichkeit",
    // Husserl
    "intentionalität", "epoché", "reduktion", "lebenswelt", "noesis", "noema", "konstitution", "evidenz",
    // general German philosophical vocabulary
    "wissenschaft", "grundlegung", "weltanschauung", "vorstellung", "bestimmung", "begrifflichkeit", "zusammenhang",
    "beziehung", "freiheit", "wahrheit", "sein", "seiende", "nichts", "wesen", "bedeutung", "sinn", "zweck", "grund",
    "ursache", "wirkung", "vorurteil", "bildung", "erfahrung", "geschichte", "natur", "kultur", "gesellschaft",
    "gemeinschaft", "freundschaft", "eigenschaft", "grundsätzlichkeit", "freundlichkeit", "möglichkeit",
    "notwendigkeit", "widerspruch", "gegensatz", "einheit", "vielheit", "allgemeinheit", "besonderheit",
    "einzelheit", "substanz", "subjekt", "objekt", "bewusstsein", "unbewusstes", "trieb", "wille", "macht",
    // French phenomenology
    "autrement", "visage", "infini", "totalité", "altérité", "jouissance", "fécondité", "proximité",
    "responsabilité", "substitution", "signification", "conscience", "différence", "présence", "absence", "parole",
    "écriture", "discours",
    // Greek transliterations
    "aletheia", "phronesis", "episteme", "techne", "theoria", "praxis", "ousia", "eidos", "logos", "nous", "psyche",
    "pneuma", "arche", "telos", "dynamis", "energeia", "entelecheia", "eudaimonia", "arete", "sophia", "doxa",
];

/// Scores text by the proportion of tokens recognized as garbled OCR noise,
/// after filtering tokens that are stop-words, reference/metadata shaped, or
/// known philosophy vocabulary.
pub struct GarbledSignal {
    floor: f64,
    max_samples: usize,
}

impl Default for GarbledSignal {
    fn default() -> Self {
        Self { floor: 0.5, max_samples: 10 }
    }
}

impl GarbledSignal {
    pub fn new(floor: f64) -> Self {
        Self { floor, max_samples: 10 }
    }

    pub fn with_max_samples(floor: f64, max_samples: usize) -> Self {
        Self { floor, max_samples }
    }

    fn is_garbled(&self, word: &str) -> Option<&'static str> {
        let alpha_count = word.chars().filter(|c| c.is_alphabetic()).count();
        if !word.is_empty() {
            let alpha_ratio = alpha_count as f64 / word.chars().count() as f64;
            if alpha_ratio < 0.3 && word.chars().count() > 4 {
                return Some("low_alpha");
            }
        }

        let lower = word.to_lowercase();
        let has_german_suffix = GERMAN_SUFFIXES.iter().any(|s| lower.ends_with(s));

        for (pattern, label) in GARBLED_PATTERNS.iter() {
            if *label == "consonant_cluster" && has_german_suffix {
                continue;
            }
            if pattern.is_match(word) {
                return Some(label);
            }
        }
        None
    }
}

impl Signal for GarbledSignal {
    fn score(&self, text: &str) -> SignalResult {
        if text.trim().chars().count() < 100 {
            return SignalResult {
                name: "garbled".to_string(),
                score: 1.0,
                passed: true,
                details: details(0, 0, &[]),
            };
        }

        let words: Vec<&str> = text.split_whitespace().collect();
        let total = words.len();
        if total == 0 {
            return SignalResult {
                name: "garbled".to_string(),
                score: 1.0,
                passed: true,
                details: details(0, 0, &[]),
            };
        }

        let mut garbled = 0usize;
        let mut sample_issues = Vec::new();
        for word in &words {
            let clean = strip_punct(word);
            if clean.chars().count() < 2 || VALID_SHORT.contains(&clean.to_lowercase().as_str()) {
                continue;
            }
            if VALID_PATTERNS.iter().any(|p| p.is_match(&clean)) {
                continue;
            }
            if PHILOSOPHY_VOCABULARY.contains(&clean.to_lowercase().as_str()) {
                continue;
            }
            if let Some(issue_type) = self.is_garbled(&clean) {
                garbled += 1;
                if sample_issues.len() < self.max_samples {
                    sample_issues.push(format!("{clean} ({issue_type})"));
                }
            }
        }

        let ratio = garbled as f64 / total as f64;
        let score = (1.0 - ratio * 2.0).max(0.0);

        SignalResult {
            name: "garbled".to_string(),
            score,
            passed: score >= self.floor,
            details: details(garbled, total, &sample_issues),
        }
    }
}

fn details(garbled: usize, total: usize, sample_issues: &[String]) -> BTreeMap<String, serde_json::Value> {
    let mut d = BTreeMap::new();
    d.insert("garbled_count".to_string(), serde_json::json!(garbled));
    d.insert("total_words".to_string(), serde_json::json!(total));
    d.insert("sample_issues".to_string(), serde_json::json!(sample_issues));
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_always_clean() {
        let signal = GarbledSignal::default();
        let result = signal.score("short text");
        assert_eq!(result.score, 1.0);
        assert!(result.passed);
    }

    #[test]
    fn clean_english_prose_scores_high() {
        let signal = GarbledSignal::default();
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(10);
        let result = signal.score(&text);
        assert!(result.score > 0.9, "score was {}", result.score);
    }

    #[test]
    fn control_characters_are_flagged_garbled() {
        let signal = GarbledSignal::default();
        let mut text = "The quick brown fox jumps over the lazy dog and the dog barks. ".repeat(10);
        text.push_str("wo\u{0001}rd ");
        let result = signal.score(&text);
        assert!(result.details.get("garbled_count").unwrap().as_u64().unwrap() >= 1);
    }

    #[test]
    fn philosophy_vocabulary_is_not_garbled() {
        let signal = GarbledSignal::default();
        let text = "Dasein zuhandenheit geworfenheit lebenswelt ereignis gelassenheit ".repeat(10);
        let result = signal.score(&text);
        assert!(result.score > 0.9, "score was {}", result.score);
    }

    #[test]
    fn german_suffix_skips_consonant_cluster_check() {
        let signal = GarbledSignal::default();
        // "Grundsätzlichkeit" style words ending in -keit have consonant runs
        // but are exempted via the suffix check.
        assert!(signal.is_garbled("Freundlichkeit").is_none());
    }

    #[test]
    fn reference_shaped_tokens_are_skipped() {
        let signal = GarbledSignal::default();
        assert!(VALID_PATTERNS.iter().any(|p| p.is_match("1987")));
        assert!(VALID_PATTERNS.iter().any(|p| p.is_match("pp.45")));
        assert!(VALID_PATTERNS.iter().any(|p| p.is_match("§44")));
    }

    #[test]
    fn sample_issues_are_capped_at_max_samples() {
        let signal = GarbledSignal::with_max_samples(0.5, 2);
        let mut text = "The quick brown fox jumps over the lazy dog and the dog barks. ".repeat(10);
        text.push_str("wo\u{0001}rd1 wo\u{0001}rd2 wo\u{0001}rd3 ");
        let result = signal.score(&text);
        let samples = result.details.get("sample_issues").unwrap().as_array().unwrap();
        assert_eq!(samples.len(), 2);
    }
}
