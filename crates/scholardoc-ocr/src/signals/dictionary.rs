//! Dictionary-coverage quality signal.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::signals::{strip_punct, Signal};
use crate::types::SignalResult;

const VOWELS: &str = "aeiouyàâäéèêëïîôùûüÿæœ";

static REPEAT_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(.)\1{3,}").unwrap());
static ALTERNATING_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(..)\1{2,}").unwrap());

/// A small seed dictionary of common English/French/German/Latin words,
/// covering function words and frequent content words well enough to
/// distinguish genuine prose from OCR noise. Extendable via a custom
/// vocabulary file at construction time.
const SEED_WORDS: &[&str] = &[
    "the", "of", "and", "a", "to", "in", "is", "that", "it", "was", "for", "on", "are", "as", "with", "his", "they",
    "at", "be", "this", "have", "from", "or", "one", "had", "by", "word", "but", "not", "what", "all", "were", "we",
    "when", "your", "can", "said", "there", "use", "an", "each", "which", "she", "do", "how", "their", "if", "will",
    "up", "other", "about", "out", "many", "then", "them", "these", "so", "some", "her", "would", "make", "like",
    "him", "into", "time", "has", "look", "two", "more", "write", "see", "number", "way", "could", "people", "than",
    "first", "water", "been", "call", "who", "its", "now", "find", "long", "down", "day", "did", "get", "come",
    "made", "may", "part", "being", "between", "philosophy", "being", "existence", "reason", "consciousness",
    "experience", "language", "meaning", "truth", "knowledge", "concept", "subject", "object", "world", "self",
    "thought", "mind", "nature", "history", "science", "society", "ethics", "freedom", "le", "la", "les", "de",
    "des", "un", "une", "et", "est", "que", "qui", "dans", "pour", "sur", "avec", "ne", "pas", "ce", "il", "elle",
    "nous", "vous", "être", "avoir", "faire", "philosophie", "existence", "raison", "conscience", "langage", "sens",
    "vérité", "connaissance", "monde", "der", "die", "das", "und", "ist", "nicht", "ein", "eine", "von", "mit",
    "sich", "auf", "für", "sein", "werden", "haben", "philosophie", "existenz", "vernunft", "bewusstsein", "sprache",
    "wahrheit", "welt", "et", "in", "ad", "de", "ex", "cum", "est", "esse", "non", "sed", "qui", "quod", "homo",
    "ratio", "veritas", "mundus", "anima", "natura",
];

static SEED_SET: LazyLock<HashSet<&'static str>> = LazyLock::new(|| SEED_WORDS.iter().copied().collect());

fn is_structurally_valid(word: &str) -> bool {
    let len = word.chars().count();
    if len < 2 {
        return true;
    }

    let vowel_count = word.chars().filter(|c| VOWELS.contains(c.to_ascii_lowercase())).count();
    let vowel_ratio = vowel_count as f64 / len as f64;

    if vowel_ratio < 0.1 && len > 3 {
        return false;
    }
    if vowel_ratio > 0.9 && len > 4 {
        return false;
    }
    if REPEAT_PATTERN.is_match(word) || ALTERNATING_PATTERN.is_match(word) {
        return false;
    }
    if len > 6 {
        let unique: HashSet<char> = word.chars().collect();
        let unique_ratio = unique.len() as f64 / len as f64;
        if unique_ratio < 0.3 {
            return false;
        }
    }
    true
}

/// Scores text by dictionary coverage: known words score 1.0, structurally
/// plausible-but-unknown words score 0.5, and structurally implausible words
/// score 0.0. The weighted mean over all scored tokens is the signal's score.
pub struct DictionarySignal {
    words: HashSet<String>,
    floor: f64,
}

impl DictionarySignal {
    pub fn new(floor: f64) -> Self {
        Self { words: HashSet::new(), floor }
    }

    /// Load additional vocabulary from a file, one word per line.
    pub fn with_custom_vocab(mut self, path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::OcrError::io("failed to read custom vocabulary", path, e))?;
        self.words.extend(content.lines().map(|l| l.trim().to_lowercase()).filter(|l| !l.is_empty()));
        Ok(self)
    }

    fn is_known(&self, lower: &str) -> bool {
        SEED_SET.contains(lower) || self.words.contains(lower)
    }
}

impl Default for DictionarySignal {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl Signal for DictionarySignal {
    fn score(&self, text: &str) -> SignalResult {
        let mut known = 0usize;
        let mut structured = 0usize;
        let mut garbled = 0usize;
        let mut scored_weight = 0.0f64;
        let mut total_weight = 0.0f64;

        for word in text.split_whitespace() {
            let clean = strip_punct(word);
            if clean.chars().count() < 3 || !clean.chars().any(|c| c.is_alphabetic()) {
                continue;
            }
            let lower = clean.to_lowercase();

            let weight = 1.0;
            total_weight += weight;

            if self.is_known(&lower) {
                known += 1;
                scored_weight += weight;
            } else if is_structurally_valid(&clean) {
                structured += 1;
                scored_weight += weight * 0.5;
            } else {
                garbled += 1;
            }
        }

        if total_weight == 0.0 {
            return SignalResult {
                name: "dictionary".to_string(),
                score: 1.0,
                passed: true,
                details: details(0, 0, 0),
            };
        }

        let raw = scored_weight / total_weight;
        let score = (raw.clamp(0.0, 1.0) * 10000.0).round() / 10000.0;

        SignalResult {
            name: "dictionary".to_string(),
            score,
            passed: score >= self.floor,
            details: details(known, structured, garbled),
        }
    }
}

fn details(known: usize, structured: usize, garbled: usize) -> BTreeMap<String, serde_json::Value> {
    let mut d = BTreeMap::new();
    d.insert("known_count".to_string(), serde_json::json!(known));
    d.insert("structured_count".to_string(), serde_json::json!(structured));
    d.insert("garbled_count".to_string(), serde_json::json!(garbled));
    d
}
