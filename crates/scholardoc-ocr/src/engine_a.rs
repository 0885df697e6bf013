//! Engine-A wrapper: fast CPU OCR invoked as a subprocess over a whole PDF.
//!
//! Engine-A ships as a separate CLI tool rather than a library this crate
//! links against, so invocation is a subprocess call with a wall-clock
//! timeout rather than a function call — the same boundary the original
//! implementation crossed via Python's subprocess module.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{OcrError, Result};

/// Exit code the underlying tool uses to report "the document already had
/// text and was left untouched" — a successful no-op, not a failure.
const EXIT_CODE_PRIOR_OCR_FOUND: i32 = 6;

/// Exit code reported when a required external dependency (e.g. the OCR
/// binary itself, or a language pack) is missing.
const EXIT_CODE_MISSING_DEPENDENCY: i32 = 3;

#[derive(Debug, Clone)]
pub struct EngineAConfig {
    /// Comma-separated language codes, e.g. `"eng,fra,ell,lat,deu"`.
    pub langs: String,
    pub jobs: usize,
    pub timeout: Duration,
    /// Skip OCR-ing pages whose rendered size exceeds this many megapixels.
    pub skip_big_mp: u32,
}

impl Default for EngineAConfig {
    fn default() -> Self {
        Self { langs: "eng".to_string(), jobs: 4, timeout: Duration::from_secs(600), skip_big_mp: 100 }
    }
}

#[derive(Debug, Clone)]
pub struct EngineAResult {
    pub success: bool,
    pub output_path: Option<PathBuf>,
    pub error: Option<String>,
}

/// Check that the Engine-A binary is on `PATH` and reports a version.
pub fn is_available() -> bool {
    Command::new("ocrmypdf")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run Engine-A against `input`, writing a searchable PDF to `output`.
///
/// A non-zero exit that corresponds to "prior OCR already present" is
/// treated as success, since the document doesn't need re-OCRing. A missing
/// dependency (binary or language pack) is surfaced as an [`OcrError::EngineA`].
pub fn run_ocr(input: &Path, output: &Path, config: &EngineAConfig) -> Result<EngineAResult> {
    let mut command = Command::new("ocrmypdf");
    command
        .arg("--redo-ocr")
        .arg("--clean")
        .arg("-l")
        .arg(&config.langs)
        .arg("--output-type")
        .arg("pdfa")
        .arg("--jobs")
        .arg(config.jobs.to_string())
        .arg("--skip-big")
        .arg(config.skip_big_mp.to_string())
        .arg("--quiet")
        .arg(input)
        .arg(output)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(?input, ?output, langs = %config.langs, "invoking engine-a");

    let child = command.spawn().map_err(|e| OcrError::EngineA {
        message: format!("failed to spawn ocrmypdf for {}", input.display()),
        source: Some(Box::new(e)),
    })?;

    let outcome = wait_with_timeout(child, config.timeout)?;

    match outcome {
        ProcessOutcome::Exited(status, stderr) => {
            let code = status.code().unwrap_or(-1);
            if status.success() || code == EXIT_CODE_PRIOR_OCR_FOUND {
                if code == EXIT_CODE_PRIOR_OCR_FOUND {
                    info!(?input, "engine-a found prior ocr, treating as success");
                }
                Ok(EngineAResult { success: true, output_path: Some(output.to_path_buf()), error: None })
            } else if code == EXIT_CODE_MISSING_DEPENDENCY {
                Err(OcrError::EngineA { message: format!("missing dependency: {stderr}"), source: None })
            } else {
                warn!(?input, code, %stderr, "engine-a failed");
                Ok(EngineAResult { success: false, output_path: None, error: Some(stderr) })
            }
        }
        ProcessOutcome::TimedOut => Ok(EngineAResult {
            success: false,
            output_path: None,
            error: Some(format!("engine-a timed out after {:?}", config.timeout)),
        }),
    }
}

enum ProcessOutcome {
    Exited(std::process::ExitStatus, String),
    TimedOut,
}

/// Poll the child process for completion, killing it and returning
/// [`ProcessOutcome::TimedOut`] if `timeout` elapses first.
fn wait_with_timeout(mut child: Child, timeout: Duration) -> Result<ProcessOutcome> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                use std::io::Read;
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr);
                }
                return Ok(ProcessOutcome::Exited(status, stderr));
            }
            Ok(None) => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Ok(ProcessOutcome::TimedOut);
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                return Err(OcrError::EngineA { message: "failed to poll engine-a process".to_string(), source: Some(Box::new(e)) });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = EngineAConfig::default();
        assert_eq!(config.jobs, 4);
        assert_eq!(config.timeout, Duration::from_secs(600));
        assert_eq!(config.skip_big_mp, 100);
    }

    #[test]
    fn prior_ocr_exit_code_is_a_success_sentinel() {
        assert_eq!(EXIT_CODE_PRIOR_OCR_FOUND, 6);
    }
}
