//! Output filesystem layout: `final/<name>.{pdf,txt,json,diagnostics.json}`,
//! a transient `work/` directory, and the directory-creation/cleanup that
//! brackets a run.

use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;
use crate::diagnostics::PageDiagnostics;
use crate::error::{OcrError, Result};
use crate::types::FileResult;

/// Ensures `final/`, `work/`, and `logs/` exist under `output_dir` before a
/// run starts, and removes `work/` afterwards unless `keep_intermediates`
/// is set. A scoped-guard pattern: the working directory is released on
/// every exit path (including early returns via `?`) because `Drop` runs
/// regardless of how the enclosing scope ends.
pub struct WorkingDirectory {
    path: PathBuf,
    keep: bool,
}

impl WorkingDirectory {
    pub fn prepare(config: &PipelineConfig) -> Result<Self> {
        std::fs::create_dir_all(config.final_dir())
            .map_err(|e| OcrError::io("failed to create final output directory", config.final_dir(), e))?;
        let work_dir = config.work_dir();
        std::fs::create_dir_all(&work_dir)
            .map_err(|e| OcrError::io("failed to create work directory", work_dir.clone(), e))?;
        std::fs::create_dir_all(config.logs_dir())
            .map_err(|e| OcrError::io("failed to create logs directory", config.logs_dir(), e))?;
        Ok(Self { path: work_dir, keep: config.keep_intermediates })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkingDirectory {
    fn drop(&mut self) {
        if !self.keep {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

/// Copy `input` to `final/<name>` byte-identically — the pass-through path
/// for files whose existing embedded text already clears the threshold.
pub fn copy_passthrough(input: &Path, config: &PipelineConfig, filename: &str) -> Result<PathBuf> {
    let dest = config.final_dir().join(filename);
    std::fs::copy(input, &dest).map_err(|e| OcrError::io("failed to copy pass-through output", dest.clone(), e))?;
    Ok(dest)
}

fn stem(filename: &str) -> &str {
    Path::new(filename).file_stem().and_then(|s| s.to_str()).unwrap_or(filename)
}

/// Write the post-processed `.txt` for a file, joining page texts with a
/// form-feed so page boundaries survive in the plain-text rendering.
pub fn write_text(config: &PipelineConfig, filename: &str, pages: &[String]) -> Result<PathBuf> {
    let dest = config.final_dir().join(format!("{}.txt", stem(filename)));
    let joined = pages.join("\u{c}\n");
    std::fs::write(&dest, joined).map_err(|e| OcrError::io("failed to write extracted text", dest.clone(), e))?;
    Ok(dest)
}

/// Write the `FileResult` JSON sidecar.
pub fn write_result_sidecar(config: &PipelineConfig, filename: &str, result: &FileResult) -> Result<PathBuf> {
    let dest = config.final_dir().join(format!("{}.json", stem(filename)));
    let bytes = serde_json::to_vec_pretty(result)
        .map_err(|e| OcrError::Io { message: "failed to serialize file result".to_string(), path: Some(dest.clone()), source: Some(Box::new(e)) })?;
    std::fs::write(&dest, bytes).map_err(|e| OcrError::io("failed to write result sidecar", dest.clone(), e))?;
    Ok(dest)
}

/// Write the per-page diagnostics sidecar, keyed by page number.
pub fn write_diagnostics_sidecar(
    config: &PipelineConfig,
    filename: &str,
    diagnostics: &std::collections::BTreeMap<usize, PageDiagnostics>,
) -> Result<PathBuf> {
    let dest = config.final_dir().join(format!("{}.diagnostics.json", stem(filename)));
    let bytes = serde_json::to_vec_pretty(diagnostics).map_err(|e| OcrError::Io {
        message: "failed to serialize diagnostics".to_string(),
        path: Some(dest.clone()),
        source: Some(Box::new(e)),
    })?;
    std::fs::write(&dest, bytes).map_err(|e| OcrError::io("failed to write diagnostics sidecar", dest.clone(), e))?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_in(dir: &Path) -> PipelineConfig {
        PipelineConfig::new(dir.join("in"), dir.join("out"))
    }

    #[test]
    fn prepare_creates_final_work_and_logs_dirs() {
        let tmp = tempdir().unwrap();
        let config = config_in(tmp.path());
        let guard = WorkingDirectory::prepare(&config).unwrap();
        assert!(config.final_dir().is_dir());
        assert!(guard.path().is_dir());
        assert!(config.logs_dir().is_dir());
    }

    #[test]
    fn work_dir_is_removed_on_drop_unless_kept() {
        let tmp = tempdir().unwrap();
        let mut config = config_in(tmp.path());
        let work_dir;
        {
            let guard = WorkingDirectory::prepare(&config).unwrap();
            work_dir = guard.path().to_path_buf();
        }
        assert!(!work_dir.exists());

        config.keep_intermediates = true;
        let kept_dir;
        {
            let guard = WorkingDirectory::prepare(&config).unwrap();
            kept_dir = guard.path().to_path_buf();
        }
        assert!(kept_dir.exists());
    }

    #[test]
    fn passthrough_copy_is_byte_identical() {
        let tmp = tempdir().unwrap();
        let config = config_in(tmp.path());
        std::fs::create_dir_all(&config.input_dir).unwrap();
        std::fs::create_dir_all(config.final_dir()).unwrap();
        let src = config.input_dir.join("a.pdf");
        std::fs::write(&src, b"%PDF-1.4 fake content").unwrap();

        let dest = copy_passthrough(&src, &config, "a.pdf").unwrap();
        assert_eq!(std::fs::read(&src).unwrap(), std::fs::read(&dest).unwrap());
    }

    #[test]
    fn text_output_joins_pages_with_form_feed() {
        let tmp = tempdir().unwrap();
        let config = config_in(tmp.path());
        std::fs::create_dir_all(config.final_dir()).unwrap();
        let dest = write_text(&config, "doc.pdf", &["page one".to_string(), "page two".to_string()]).unwrap();
        let contents = std::fs::read_to_string(&dest).unwrap();
        assert!(contents.contains("page one"));
        assert!(contents.contains("page two"));
        assert_eq!(dest.file_name().unwrap().to_str().unwrap(), "doc.txt");
    }
}
