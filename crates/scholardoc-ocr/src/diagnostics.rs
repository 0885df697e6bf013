//! Per-page diagnostic data: signal breakdowns, disagreement detection,
//! struggle-category classification, engine-output diffing, and basic
//! scanned-image quality metrics.

use std::collections::BTreeMap;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::analyzer::QualityResult;

/// Magnitude above which a pairwise signal disagreement is flagged.
pub const DISAGREEMENT_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalDisagreement {
    pub signals: [String; 2],
    pub magnitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineDiffSummary {
    pub additions: usize,
    pub deletions: usize,
    pub substitutions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Substitution {
    pub old: String,
    pub new: String,
}

/// Structured word-level diff between Engine-A and Engine-B output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineDiff {
    pub additions: Vec<String>,
    pub deletions: Vec<String>,
    pub substitutions: Vec<Substitution>,
    pub summary: EngineDiffSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageQuality {
    pub dpi: Option<f64>,
    pub contrast: f64,
    pub blur_score: f64,
    /// Always `None`: skew detection (Canny edges + Hough line fitting)
    /// is not implemented in this renderer.
    pub skew_angle: Option<f64>,
}

/// Per-page diagnostic bundle attached to a [`crate::types::PageResult`].
/// The first group of fields is always captured (near-zero marginal cost);
/// `image_quality` and the engine-comparison fields are only populated when
/// diagnostics mode is enabled, since they cost real CPU/GPU time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageDiagnostics {
    pub signal_scores: BTreeMap<String, f64>,
    pub signal_details: BTreeMap<String, serde_json::Value>,
    pub composite_weights: BTreeMap<String, f64>,
    pub signal_disagreements: Vec<SignalDisagreement>,
    pub has_signal_disagreement: bool,
    pub postprocess_counts: BTreeMap<String, usize>,
    pub struggle_categories: Vec<String>,
    pub image_quality: Option<ImageQuality>,
    pub engine_a_text: Option<String>,
    pub engine_diff: Option<EngineDiff>,
}

/// All pairwise disagreement magnitudes between signals, rounded to 4
/// decimals. Returns every pair, not just those above threshold, so callers
/// can apply their own cutoff.
pub fn compute_signal_disagreements(signal_scores: &BTreeMap<String, f64>) -> Vec<SignalDisagreement> {
    let entries: Vec<(&String, &f64)> = signal_scores.iter().collect();
    let mut disagreements = Vec::new();
    for i in 0..entries.len() {
        for j in (i + 1)..entries.len() {
            let (name_a, score_a) = entries[i];
            let (name_b, score_b) = entries[j];
            let magnitude = ((score_a - score_b).abs() * 10000.0).round() / 10000.0;
            disagreements.push(SignalDisagreement { signals: [name_a.clone(), name_b.clone()], magnitude });
        }
    }
    disagreements
}

/// Assign every struggle category whose independent heuristic fires. Each
/// of the 8 checks runs regardless of the others; categories are not
/// mutually exclusive. `layout_error` and `language_confusion` are
/// explicitly weak/heuristic, preserved as labels rather than hard gates.
#[allow(clippy::too_many_arguments)]
pub fn classify_struggle(
    signal_scores: &BTreeMap<String, f64>,
    composite_score: f64,
    threshold: f64,
    image_quality: Option<&ImageQuality>,
    engine: Option<&str>,
    engine_b_score: Option<f64>,
) -> Vec<String> {
    let mut categories = Vec::new();

    let garbled = signal_scores.get("garbled").copied().unwrap_or(1.0);
    let dictionary = signal_scores.get("dictionary").copied().unwrap_or(1.0);
    let confidence = signal_scores.get("confidence").copied();

    if let Some(quality) = image_quality {
        if quality.blur_score < 50.0 || quality.contrast < 0.1 {
            categories.push("bad_scan".to_string());
        }
    } else if let Some(conf) = confidence {
        if conf < 0.3 && garbled < 0.4 {
            categories.push("bad_scan".to_string());
        }
    }

    if garbled < 0.7 && dictionary > 0.5 {
        categories.push("character_confusion".to_string());
    }

    if dictionary < 0.6 && garbled > 0.7 {
        categories.push("vocabulary_miss".to_string());
    }

    if confidence.is_some_and(|c| c > 0.7) && composite_score < threshold {
        categories.push("layout_error".to_string());
    }

    if dictionary < 0.4 && garbled > 0.4 && garbled < 0.7 {
        categories.push("language_confusion".to_string());
    }

    let disagreement = if let Some(conf) = confidence {
        let pairs = [(garbled - conf).abs(), (garbled - dictionary).abs(), (dictionary - conf).abs()];
        pairs.iter().any(|p| *p > DISAGREEMENT_THRESHOLD)
    } else {
        (garbled - dictionary).abs() > DISAGREEMENT_THRESHOLD
    };
    if disagreement {
        categories.push("signal_disagreement".to_string());
    }

    if (composite_score - threshold).abs() < 0.05 {
        categories.push("gray_zone".to_string());
    }

    if engine == Some("surya") {
        if let Some(score) = engine_b_score {
            if score < threshold {
                categories.push("engine_b_insufficient".to_string());
            }
        }
    }

    categories
}

/// Word-level diff between Engine-A and Engine-B output via a longest
/// common subsequence over whitespace-split words.
pub fn compute_engine_diff(engine_a_text: &str, engine_b_text: &str) -> EngineDiff {
    let words_a: Vec<&str> = engine_a_text.split_whitespace().collect();
    let words_b: Vec<&str> = engine_b_text.split_whitespace().collect();

    let ops = diff_opcodes(&words_a, &words_b);

    let mut additions = Vec::new();
    let mut deletions = Vec::new();
    let mut substitutions = Vec::new();

    for op in ops {
        match op {
            DiffOp::Insert(j1, j2) => additions.extend(words_b[j1..j2].iter().map(|s| s.to_string())),
            DiffOp::Delete(i1, i2) => deletions.extend(words_a[i1..i2].iter().map(|s| s.to_string())),
            DiffOp::Replace(i1, i2, j1, j2) => substitutions
                .push(Substitution { old: words_a[i1..i2].join(" "), new: words_b[j1..j2].join(" ") }),
        }
    }

    let summary =
        EngineDiffSummary { additions: additions.len(), deletions: deletions.len(), substitutions: substitutions.len() };
    EngineDiff { additions, deletions, substitutions, summary }
}

enum DiffOp {
    Insert(usize, usize),
    Delete(usize, usize),
    Replace(usize, usize, usize, usize),
}

/// Longest-common-subsequence based opcode diff, grouping consecutive
/// insert/delete runs into single ops (replace when both sides have a run).
fn diff_opcodes(a: &[&str], b: &[&str]) -> Vec<DiffOp> {
    let (n, m) = (a.len(), b.len());
    let mut lcs = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] =
                if a[i] == b[j] { lcs[i + 1][j + 1] + 1 } else { lcs[i + 1][j].max(lcs[i][j + 1]) };
        }
    }

    let mut ops = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    let mut run_start = (0usize, 0usize);
    let mut in_run = false;

    while i < n && j < m {
        if a[i] == b[j] {
            if in_run {
                flush_run(&mut ops, run_start, (i, j));
                in_run = false;
            }
            i += 1;
            j += 1;
        } else {
            if !in_run {
                run_start = (i, j);
                in_run = true;
            }
            if lcs[i + 1][j] >= lcs[i][j + 1] {
                i += 1;
            } else {
                j += 1;
            }
        }
    }
    if in_run || i < n || j < m {
        if !in_run {
            run_start = (i, j);
        }
        flush_run(&mut ops, run_start, (n, m));
    }

    ops
}

fn flush_run(ops: &mut Vec<DiffOp>, start: (usize, usize), end: (usize, usize)) {
    let (i1, j1) = start;
    let (i2, j2) = end;
    match (i2 > i1, j2 > j1) {
        (true, true) => ops.push(DiffOp::Replace(i1, i2, j1, j2)),
        (true, false) => ops.push(DiffOp::Delete(i1, i2)),
        (false, true) => ops.push(DiffOp::Insert(j1, j2)),
        (false, false) => {}
    }
}

/// Basic scanned-image quality metrics from a rendered grayscale page:
/// contrast (normalized pixel stddev) and blur score (Laplacian variance,
/// lower means blurrier). DPI, if known from the source PDF's embedded
/// image metadata, is passed through unchanged.
pub fn analyze_image_quality(gray: &GrayImage, dpi: Option<f64>) -> ImageQuality {
    let pixels: Vec<f64> = gray.pixels().map(|p| p.0[0] as f64).collect();
    let mean = pixels.iter().sum::<f64>() / pixels.len().max(1) as f64;
    let variance = pixels.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / pixels.len().max(1) as f64;
    let contrast = variance.sqrt() / 255.0;

    let blur_score = laplacian_variance(gray);

    ImageQuality {
        dpi,
        contrast: (contrast * 10000.0).round() / 10000.0,
        blur_score: (blur_score * 100.0).round() / 100.0,
        skew_angle: None,
    }
}

fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let get = |x: i64, y: i64| -> f64 { gray.get_pixel(x.clamp(0, w as i64 - 1) as u32, y.clamp(0, h as i64 - 1) as u32).0[0] as f64 };

    let mut values = Vec::with_capacity((w * h) as usize);
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let laplacian = -4.0 * get(x, y) + get(x - 1, y) + get(x + 1, y) + get(x, y - 1) + get(x, y + 1);
            values.push(laplacian);
        }
    }

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

/// Build always-captured diagnostics from an already-computed quality
/// result; the diagnostics-gated fields (`image_quality`, engine
/// comparison) are left unset for the caller to fill in when enabled.
pub fn build_always_diagnostics(result: &QualityResult, threshold: f64) -> PageDiagnostics {
    let disagreements = compute_signal_disagreements(&result.signal_scores);
    let has_disagreement = disagreements.iter().any(|d| d.magnitude > DISAGREEMENT_THRESHOLD);
    let categories = classify_struggle(&result.signal_scores, result.composite_score, threshold, None, None, None);

    let signal_details = result
        .signal_details
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::to_value(v).unwrap_or(serde_json::Value::Null)))
        .collect();

    PageDiagnostics {
        signal_scores: result.signal_scores.clone(),
        signal_details,
        composite_weights: result.composite_weights.clone(),
        signal_disagreements: disagreements,
        has_signal_disagreement: has_disagreement,
        postprocess_counts: BTreeMap::new(),
        struggle_categories: categories,
        image_quality: None,
        engine_a_text: None,
        engine_diff: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn disagreement_pairs_cover_every_combination() {
        let s = scores(&[("garbled", 0.9), ("dictionary", 0.5), ("confidence", 0.8)]);
        let pairs = compute_signal_disagreements(&s);
        assert_eq!(pairs.len(), 3);
    }

    #[test]
    fn gray_zone_fires_near_threshold() {
        let s = scores(&[("garbled", 0.9), ("dictionary", 0.9)]);
        let categories = classify_struggle(&s, 0.86, 0.85, None, None, None);
        assert!(categories.contains(&"gray_zone".to_string()));
    }

    #[test]
    fn vocabulary_miss_fires_when_dictionary_low_and_garbled_high() {
        let s = scores(&[("garbled", 0.9), ("dictionary", 0.3)]);
        let categories = classify_struggle(&s, 0.5, 0.85, None, None, None);
        assert!(categories.contains(&"vocabulary_miss".to_string()));
    }

    #[test]
    fn engine_b_insufficient_fires_only_for_engine_b_below_threshold() {
        let s = scores(&[("garbled", 0.9), ("dictionary", 0.9)]);
        let categories = classify_struggle(&s, 0.95, 0.85, None, Some("surya"), Some(0.5));
        assert!(categories.contains(&"engine_b_insufficient".to_string()));

        let none = classify_struggle(&s, 0.95, 0.85, None, Some("surya"), Some(0.95));
        assert!(!none.contains(&"engine_b_insufficient".to_string()));
    }

    #[test]
    fn engine_diff_detects_simple_substitution() {
        let diff = compute_engine_diff("the qick brown fox", "the quick brown fox");
        assert_eq!(diff.summary.substitutions, 1);
        assert_eq!(diff.substitutions[0].old, "qick");
        assert_eq!(diff.substitutions[0].new, "quick");
    }

    #[test]
    fn engine_diff_detects_addition() {
        let diff = compute_engine_diff("the fox", "the quick fox");
        assert_eq!(diff.additions, vec!["quick".to_string()]);
    }

    #[test]
    fn identical_texts_produce_no_diff() {
        let diff = compute_engine_diff("same text here", "same text here");
        assert!(diff.additions.is_empty());
        assert!(diff.deletions.is_empty());
        assert!(diff.substitutions.is_empty());
    }

    #[test]
    fn flat_image_has_low_contrast_and_low_blur_score() {
        let flat = GrayImage::from_pixel(10, 10, image::Luma([128]));
        let quality = analyze_image_quality(&flat, Some(300.0));
        assert_eq!(quality.contrast, 0.0);
        assert_eq!(quality.blur_score, 0.0);
        assert_eq!(quality.dpi, Some(300.0));
    }
}
