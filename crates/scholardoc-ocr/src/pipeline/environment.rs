//! Phase-0 environment validation: collects every problem before failing,
//! rather than stopping at the first missing dependency.

use std::process::Command;

use tracing::info;

use crate::error::{OcrError, Result};
use crate::types::resolve_languages;

/// Confirm Engine-A's binary is on `PATH`, every requested language pack is
/// installed, and the temp directory is writable. Every problem found is
/// collected into a single [`OcrError::Environment`] rather than failing on
/// the first one, so a user fixing their setup sees the whole list at once.
pub fn validate_environment(iso_languages: &[String]) -> Result<()> {
    let mut problems = Vec::new();

    let tesseract_langs = match tesseract_version_and_langs() {
        Ok((_, langs)) => Some(langs),
        Err(message) => {
            problems.push(message);
            None
        }
    };

    if let Some(installed) = &tesseract_langs {
        let (engine_a_langs, _) = resolve_languages(iso_languages).unwrap_or_else(|_| {
            ("eng,fra,ell,lat,deu".to_string(), String::new())
        });
        for lang in engine_a_langs.split(',') {
            if !installed.iter().any(|l| l == lang) {
                problems.push(format!("missing tesseract language pack: {lang}"));
            }
        }
    }

    let tmp_dir = std::env::temp_dir();
    if let Err(e) = check_writable(&tmp_dir) {
        problems.push(format!("temp directory {} is not writable: {e}", tmp_dir.display()));
    }

    if !problems.is_empty() {
        return Err(OcrError::Environment { problems });
    }
    Ok(())
}

fn tesseract_version_and_langs() -> std::result::Result<(String, Vec<String>), String> {
    let version_output = Command::new("tesseract")
        .arg("--version")
        .output()
        .map_err(|e| format!("tesseract binary not found: {e}"))?;
    if !version_output.status.success() {
        return Err("tesseract --version exited with an error".to_string());
    }
    let version = String::from_utf8_lossy(&version_output.stdout).lines().next().unwrap_or("").to_string();

    let langs_output = Command::new("tesseract")
        .arg("--list-langs")
        .output()
        .map_err(|e| format!("failed to list tesseract languages: {e}"))?;
    let langs = String::from_utf8_lossy(&langs_output.stdout)
        .lines()
        .skip(1)
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();

    Ok((version, langs))
}

fn check_writable(dir: &std::path::Path) -> std::io::Result<()> {
    let probe = dir.join(format!(".scholardoc-ocr-write-check-{}", std::process::id()));
    std::fs::write(&probe, b"")?;
    std::fs::remove_file(&probe)?;
    Ok(())
}

/// Log non-fatal startup diagnostics: platform, temp directory, Engine-A
/// version/languages, GPU availability. Never fails the run.
pub fn log_startup_diagnostics() {
    info!(os = std::env::consts::OS, arch = std::env::consts::ARCH, "startup diagnostics");
    info!(tmp_dir = %std::env::temp_dir().display(), "startup diagnostics");

    match tesseract_version_and_langs() {
        Ok((version, langs)) => info!(%version, lang_count = langs.len(), "engine-a available"),
        Err(message) => info!(%message, "engine-a unavailable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_writable_accepts_the_system_temp_dir() {
        assert!(check_writable(&std::env::temp_dir()).is_ok());
    }

    #[test]
    fn check_writable_rejects_a_nonexistent_directory() {
        let bogus = std::env::temp_dir().join("scholardoc-ocr-does-not-exist-dir");
        assert!(check_writable(&bogus).is_err());
    }
}
