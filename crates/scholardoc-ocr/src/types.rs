//! Result types and enums shared across the pipeline.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{OcrError, Result};

/// ISO 639-1 code -> (engine-a code, engine-b code).
const LANGUAGE_MAP: &[(&str, &str, &str)] = &[
    ("en", "eng", "en"),
    ("fr", "fra", "fr"),
    ("de", "deu", "de"),
    ("el", "ell", "el"),
    ("la", "lat", "la"),
];

const DEFAULT_ENGINE_A_LANGS: &str = "eng,fra,ell,lat,deu";
const DEFAULT_ENGINE_B_LANGS: &str = "en,fr,el,la,de";

/// Resolve ISO 639-1 codes to engine-native language strings.
///
/// Empty input returns the pipeline's default language sets rather than an
/// empty string, since an engine invoked with no languages at all is a
/// configuration mistake, not a legitimate "no languages" request.
pub fn resolve_languages(iso_codes: &[String]) -> Result<(String, String)> {
    if iso_codes.is_empty() {
        return Ok((DEFAULT_ENGINE_A_LANGS.to_string(), DEFAULT_ENGINE_B_LANGS.to_string()));
    }

    let mut engine_a = Vec::with_capacity(iso_codes.len());
    let mut engine_b = Vec::with_capacity(iso_codes.len());
    for code in iso_codes {
        let entry = LANGUAGE_MAP.iter().find(|(iso, _, _)| iso == code);
        match entry {
            Some((_, a, b)) => {
                engine_a.push(*a);
                engine_b.push(*b);
            }
            None => {
                let supported: Vec<&str> = LANGUAGE_MAP.iter().map(|(iso, _, _)| *iso).collect();
                return Err(OcrError::configuration(format!(
                    "unsupported language code: {code:?}. supported: {}",
                    supported.join(", ")
                )));
            }
        }
    }

    Ok((engine_a.join(","), engine_b.join(",")))
}

/// Which engine produced a page's (or file's) text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// The fast CPU OCR engine (Engine-A).
    EngineA,
    /// The slow GPU-accelerated OCR engine (Engine-B).
    EngineB,
    /// Pre-existing embedded text, not re-OCRed.
    Existing,
    /// Some pages used one engine, some another.
    Mixed,
    /// No engine has produced output for this page/file yet.
    None,
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Engine::EngineA => "tesseract",
            Engine::EngineB => "surya",
            Engine::Existing => "existing",
            Engine::Mixed => "mixed",
            Engine::None => "none",
        };
        write!(f, "{s}")
    }
}

/// Orchestrator phase, used in progress events and phase timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingPhase {
    Analysis,
    EngineA,
    EngineB,
}

/// Quality status of a processed page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    Good,
    Flagged,
    Error,
}

/// Result for a single page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    pub page_number: usize,
    pub status: PageStatus,
    pub quality_score: f64,
    pub engine: Engine,
    pub flagged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl PageResult {
    /// Invariant: `flagged == (status == Flagged)`.
    pub fn is_consistent(&self) -> bool {
        self.flagged == matches!(self.status, PageStatus::Flagged)
    }
}

/// Determine the file-level engine from per-page engines.
///
/// All-same -> that engine; mixture of non-`None` engines -> `Mixed`; empty
/// or all-`None` -> `None`.
pub fn compute_engine_from_pages(pages: &[PageResult]) -> Engine {
    let engines: HashSet<Engine> = pages
        .iter()
        .map(|p| p.engine)
        .filter(|e| *e != Engine::None)
        .collect();

    if engines.is_empty() {
        return Engine::None;
    }
    if engines.len() == 1 {
        return *engines.iter().next().unwrap();
    }
    Engine::Mixed
}

/// Result for a single input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileResult {
    pub filename: String,
    pub success: bool,
    pub engine: Engine,
    pub quality_score: f64,
    pub page_count: usize,
    pub pages: Vec<PageResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub time_seconds: f64,
    pub phase_timings: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
}

impl FileResult {
    pub fn flagged_pages(&self) -> Vec<&PageResult> {
        self.pages.iter().filter(|p| p.flagged).collect()
    }

    pub fn page_scores(&self) -> Vec<f64> {
        self.pages.iter().map(|p| p.quality_score).collect()
    }

    /// Recompute `quality_score` as the mean of page scores and `engine` via
    /// the mixed-engine rule. Called after Phase-2 rescoring.
    pub fn recompute_rollups(&mut self) {
        self.engine = compute_engine_from_pages(&self.pages);
        self.quality_score = if self.pages.is_empty() {
            0.0
        } else {
            self.page_scores().iter().sum::<f64>() / self.pages.len() as f64
        };
    }

    pub fn is_consistent(&self) -> bool {
        self.page_count == self.pages.len()
    }
}

/// Result of a single quality signal scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalResult {
    pub name: String,
    pub score: f64,
    pub passed: bool,
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

/// Result for an entire batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub files: Vec<FileResult>,
    pub total_time_seconds: f64,
    pub config: serde_json::Value,
}

impl BatchResult {
    pub fn success_count(&self) -> usize {
        self.files.iter().filter(|f| f.success).count()
    }

    pub fn error_count(&self) -> usize {
        self.files.iter().filter(|f| !f.success).count()
    }

    pub fn flagged_count(&self) -> usize {
        self.files.iter().filter(|f| !f.flagged_pages().is_empty()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(engine: Engine) -> PageResult {
        PageResult {
            page_number: 0,
            status: PageStatus::Good,
            quality_score: 1.0,
            engine,
            flagged: false,
            text: None,
        }
    }

    #[test]
    fn resolve_languages_defaults_on_empty() {
        let (a, b) = resolve_languages(&[]).unwrap();
        assert_eq!(a, DEFAULT_ENGINE_A_LANGS);
        assert_eq!(b, DEFAULT_ENGINE_B_LANGS);
    }

    #[test]
    fn resolve_languages_rejects_unknown_code() {
        let err = resolve_languages(&["xx".to_string()]).unwrap_err();
        assert!(matches!(err, OcrError::Configuration { .. }));
    }

    #[test]
    fn resolve_languages_maps_known_codes() {
        let (a, b) = resolve_languages(&["en".to_string(), "de".to_string()]).unwrap();
        assert_eq!(a, "eng,deu");
        assert_eq!(b, "en,de");
    }

    #[test]
    fn engine_rollup_all_same() {
        let pages = vec![page(Engine::EngineA), page(Engine::EngineA)];
        assert_eq!(compute_engine_from_pages(&pages), Engine::EngineA);
    }

    #[test]
    fn engine_rollup_mixed() {
        let pages = vec![page(Engine::EngineA), page(Engine::EngineB)];
        assert_eq!(compute_engine_from_pages(&pages), Engine::Mixed);
    }

    #[test]
    fn engine_rollup_empty_is_none() {
        assert_eq!(compute_engine_from_pages(&[]), Engine::None);
    }

    #[test]
    fn engine_rollup_ignores_none_entries() {
        let pages = vec![page(Engine::None), page(Engine::Existing)];
        assert_eq!(compute_engine_from_pages(&pages), Engine::Existing);
    }

    #[test]
    fn file_result_recompute_rollups_averages_scores() {
        let mut file = FileResult {
            filename: "a.pdf".into(),
            success: true,
            engine: Engine::None,
            quality_score: 0.0,
            page_count: 2,
            pages: vec![
                PageResult { quality_score: 0.5, ..page(Engine::EngineB) },
                PageResult { quality_score: 1.0, ..page(Engine::EngineB) },
            ],
            error: None,
            time_seconds: 0.0,
            phase_timings: BTreeMap::new(),
            output_path: None,
        };
        file.recompute_rollups();
        assert!((file.quality_score - 0.75).abs() < 1e-9);
        assert_eq!(file.engine, Engine::EngineB);
    }
}
