//! Text post-processing: unicode normalization, dehyphenation, paragraph
//! re-flow, and whitespace cleanup, chained in a fixed, idempotent order.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

const SOFT_HYPHEN: char = '\u{00ad}';

const LIGATURES: &[(char, &str)] =
    &[('\u{fb00}', "ff"), ('\u{fb01}', "fi"), ('\u{fb02}', "fl"), ('\u{fb03}', "ffi"), ('\u{fb04}', "ffl")];

/// Proper names whose hyphen must survive even across a line break.
const HYPHENATED_NAMES: &[&str] = &["merleau-ponty", "sartre-beauvoir", "buber-rosenzweig"];

static LINE_BREAK_HYPHEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\w+)-\n(\w+)").unwrap());
static SPACE_BEFORE_PUNCT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+([.,;:!?])").unwrap());
static MULTI_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"  +").unwrap());
static TRAILING_LINE_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+(\n)").unwrap());
static TRAILING_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+$").unwrap());

/// Per-transform replacement counts, threaded through [`postprocess`] for
/// diagnostics reporting.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PostprocessCounts {
    pub unicode_normalizations: usize,
    pub dehyphenations: usize,
    pub paragraph_joins: usize,
    pub punctuation_fixes: usize,
}

impl PostprocessCounts {
    pub fn as_map(&self) -> BTreeMap<String, usize> {
        let mut m = BTreeMap::new();
        m.insert("unicode_normalizations".to_string(), self.unicode_normalizations);
        m.insert("dehyphenations".to_string(), self.dehyphenations);
        m.insert("paragraph_joins".to_string(), self.paragraph_joins);
        m.insert("punctuation_fixes".to_string(), self.punctuation_fixes);
        m
    }
}

/// NFC-normalize, decompose ligatures, and drop soft hyphens.
pub fn normalize_unicode(text: &str, counts: &mut PostprocessCounts) -> String {
    let mut out = text.to_string();
    for (lig, replacement) in LIGATURES {
        let count = out.matches(*lig).count();
        counts.unicode_normalizations += count;
        out = out.replace(*lig, replacement);
    }
    let soft_hyphens = out.matches(SOFT_HYPHEN).count();
    counts.unicode_normalizations += soft_hyphens;
    out = out.replace(SOFT_HYPHEN, "");
    out.nfc().collect()
}

/// Rejoin line-break hyphenation, preserving hyphens in known proper names
/// and when both halves look like capitalized name fragments.
pub fn dehyphenate(text: &str, vocabulary: &[&str], counts: &mut PostprocessCounts) -> String {
    let mut rejoined = 0usize;
    let result = LINE_BREAK_HYPHEN.replace_all(text, |caps: &regex::Captures| {
        let left = &caps[1];
        let right = &caps[2];
        let hyphenated = format!("{left}-{right}");

        if HYPHENATED_NAMES.contains(&hyphenated.to_lowercase().as_str()) {
            return hyphenated;
        }

        let left_upper = left.chars().next().is_some_and(|c| c.is_uppercase());
        let right_upper = right.chars().next().is_some_and(|c| c.is_uppercase());
        if left_upper && right_upper {
            return hyphenated;
        }

        let _ = vocabulary;
        rejoined += 1;
        format!("{left}{right}")
    });
    counts.dehyphenations += rejoined;
    result.into_owned()
}

/// Join single-newline continuation lines within a paragraph block while
/// preserving blank-line paragraph boundaries and heading-like short lines.
pub fn join_paragraphs(text: &str, counts: &mut PostprocessCounts) -> String {
    let double_newline = Regex::new(r"\n\n+").unwrap();
    let blocks: Vec<&str> = double_newline.split(text).collect();
    let mut result_blocks = Vec::with_capacity(blocks.len());
    let mut joins = 0usize;

    for block in blocks {
        let lines: Vec<&str> = block.split('\n').collect();
        if lines.len() <= 1 {
            result_blocks.push(block.to_string());
            continue;
        }

        let mut merged: Vec<String> = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            let stripped = line.trim_end();
            let starts_indented = line.starts_with([' ', '\t']) && i > 0;
            if starts_indented {
                merged.push(format!("\n{line}"));
                continue;
            }

            if i > 0 {
                if let Some(prev) = merged.last() {
                    let prev_clean = prev.replace('\n', "");
                    let prev_trimmed = prev_clean.trim();
                    let starts_upper = stripped.chars().next().is_some_and(|c| c.is_uppercase());
                    if prev_trimmed.chars().count() < 60 && !stripped.is_empty() && starts_upper {
                        merged.push(format!("\n{stripped}"));
                        continue;
                    }
                }
            }

            if i == 0 {
                merged.push(stripped.to_string());
            } else {
                merged.push(format!(" {stripped}"));
                joins += 1;
            }
        }

        result_blocks.push(merged.concat());
    }

    counts.paragraph_joins += joins;
    result_blocks.join("\n\n")
}

/// Collapse whitespace runs around punctuation and trailing line whitespace.
pub fn normalize_punctuation(text: &str, counts: &mut PostprocessCounts) -> String {
    let mut fixes = 0usize;

    let (text, n) = subn(&SPACE_BEFORE_PUNCT, text, "$1");
    fixes += n;
    let (text, n) = subn(&MULTI_SPACE, &text, " ");
    fixes += n;
    let (text, n) = subn(&TRAILING_LINE_WS, &text, "$1");
    fixes += n;
    let (text, n) = subn(&TRAILING_WS, &text, "");
    fixes += n;

    counts.punctuation_fixes += fixes;
    text
}

fn subn(pattern: &Regex, text: &str, replacement: &str) -> (String, usize) {
    let mut count = 0usize;
    let replaced = pattern.replace_all(text, |caps: &regex::Captures| {
        count += 1;
        let mut expanded = String::new();
        caps.expand(replacement, &mut expanded);
        expanded
    });
    (replaced.into_owned(), count)
}

/// Run the full, fixed-order transform chain: unicode -> dehyphenate ->
/// paragraphs -> punctuation. Idempotent: re-running on already-clean text
/// makes no further changes.
pub fn postprocess(text: &str, vocabulary: &[&str]) -> (String, PostprocessCounts) {
    let mut counts = PostprocessCounts::default();
    let text = normalize_unicode(text, &mut counts);
    let text = dehyphenate(&text, vocabulary, &mut counts);
    let text = join_paragraphs(&text, &mut counts);
    let text = normalize_punctuation(&text, &mut counts);
    (text, counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ligatures_are_decomposed() {
        let mut counts = PostprocessCounts::default();
        let result = normalize_unicode("\u{fb01}nally", &mut counts);
        assert_eq!(result, "finally");
        assert_eq!(counts.unicode_normalizations, 1);
    }

    #[test]
    fn soft_hyphens_are_removed() {
        let mut counts = PostprocessCounts::default();
        let result = normalize_unicode("soft\u{ad}ware", &mut counts);
        assert_eq!(result, "software");
    }

    #[test]
    fn line_break_hyphen_is_rejoined() {
        let mut counts = PostprocessCounts::default();
        let result = dehyphenate("philoso-\nphy", &[], &mut counts);
        assert_eq!(result, "philosophy");
        assert_eq!(counts.dehyphenations, 1);
    }

    #[test]
    fn known_hyphenated_name_keeps_its_hyphen() {
        let mut counts = PostprocessCounts::default();
        let result = dehyphenate("Merleau-\nPonty", &[], &mut counts);
        assert_eq!(result, "Merleau-Ponty");
        assert_eq!(counts.dehyphenations, 0);
    }

    #[test]
    fn capitalized_name_fragments_keep_hyphen() {
        let mut counts = PostprocessCounts::default();
        let result = dehyphenate("Jean-\nPaul", &[], &mut counts);
        assert_eq!(result, "Jean-Paul");
    }

    #[test]
    fn punctuation_spacing_is_normalized() {
        let mut counts = PostprocessCounts::default();
        let result = normalize_punctuation("word ,  next   word  ", &mut counts);
        assert_eq!(result, "word, next word");
        assert!(counts.punctuation_fixes > 0);
    }

    #[test]
    fn full_pipeline_is_idempotent() {
        let input = "The    being-\nin-the-world is central.\n\nIt relates to truth.";
        let (once, _) = postprocess(input, &[]);
        let (twice, _) = postprocess(&once, &[]);
        assert_eq!(once, twice);
    }

    #[test]
    fn paragraph_blocks_are_preserved() {
        let mut counts = PostprocessCounts::default();
        let input = "First line\ncontinues here.\n\nSecond paragraph\ncontinues too.";
        let result = join_paragraphs(input, &mut counts);
        assert!(result.contains("\n\n"));
    }
}
