//! Default collaborator implementations for the capability traits the core
//! deliberately doesn't own: [`crate::device::DeviceProbe`],
//! [`crate::batch::GpuMemoryProbe`], [`crate::model_cache::GpuMemoryCleaner`],
//! and [`crate::engine_b::EngineBRuntime`].
//!
//! Engine-B itself ships as an external CLI tool, mirroring the subprocess
//! boundary [`crate::engine_a`] crosses for Engine-A — this module's
//! [`SuryaCliRuntime`] is the thin wrapper around it. GPU presence is probed
//! by shelling out to `nvidia-smi` / checking the Apple Silicon target,
//! since this crate does not link a tensor runtime (§1, non-goals).

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::batch::GpuMemoryProbe;
use crate::device::DeviceProbe;
use crate::engine_b::{EngineBConfig, EngineBRuntime};
use crate::error::{OcrError, Result};
use crate::model_cache::GpuMemoryCleaner;

/// Probes for CUDA (via `nvidia-smi`) and Apple unified-memory GPUs (via the
/// compile target), validating each candidate with a cheap subprocess call
/// into the Engine-B CLI tool's own device-check mode.
pub struct SystemDeviceProbe {
    binary: String,
}

impl SystemDeviceProbe {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

impl Default for SystemDeviceProbe {
    fn default() -> Self {
        Self::new("surya_ocr")
    }
}

impl DeviceProbe for SystemDeviceProbe {
    fn cuda_available(&self) -> bool {
        Command::new("nvidia-smi").arg("-L").stdout(Stdio::null()).stderr(Stdio::null()).status().map(|s| s.success()).unwrap_or(false)
    }

    fn cuda_device_name(&self) -> String {
        Command::new("nvidia-smi")
            .args(["--query-gpu=name", "--format=csv,noheader"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .map(|s| s.lines().next().unwrap_or("").trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "CUDA device".to_string())
    }

    fn mps_built(&self) -> bool {
        cfg!(all(target_os = "macos", target_arch = "aarch64"))
    }

    fn mps_available(&self) -> bool {
        self.mps_built()
    }

    fn validate(&self, device_str: &str) -> bool {
        Command::new(&self.binary)
            .args(["--check-device", device_str])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// Reports CUDA VRAM size by parsing `nvidia-smi`'s queryable memory total.
pub struct SystemGpuMemoryProbe;

impl GpuMemoryProbe for SystemGpuMemoryProbe {
    fn cuda_total_memory_gb(&self) -> Option<f64> {
        let output = Command::new("nvidia-smi").args(["--query-gpu=memory.total", "--format=csv,noheader,nounits"]).output().ok()?;
        let text = String::from_utf8(output.stdout).ok()?;
        let mb: f64 = text.lines().next()?.trim().parse().ok()?;
        Some(mb / 1024.0)
    }
}

/// Empties MPS/CUDA caches and forces a GC cycle by delegating to the
/// Engine-B CLI tool's own cache-clearing mode; a no-op if the tool isn't
/// installed (CPU-only environments never need this).
pub struct SystemGpuCleaner {
    binary: String,
}

impl SystemGpuCleaner {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

impl Default for SystemGpuCleaner {
    fn default() -> Self {
        Self::new("surya_ocr")
    }
}

impl GpuMemoryCleaner for SystemGpuCleaner {
    fn cleanup(&self) {
        let status = Command::new(&self.binary).arg("--clear-gpu-cache").stdout(Stdio::null()).stderr(Stdio::null()).status();
        if let Err(e) = status {
            debug!(error = %e, "gpu cache cleanup skipped: engine-b binary unavailable");
        }
    }
}

/// Engine-B wrapper backed by an external `surya_ocr`-style CLI tool. Model
/// "loading" is realized as a lightweight subprocess preload call that pins
/// the device and reports readiness; `Models` is just the resolved device
/// string, since the model weights live in the external tool's own process
/// each time `convert` is invoked.
pub struct SuryaCliRuntime {
    binary: String,
    load_timeout: Duration,
}

impl SuryaCliRuntime {
    pub fn new(binary: impl Into<String>, load_timeout: Duration) -> Self {
        Self { binary: binary.into(), load_timeout }
    }
}

impl Default for SuryaCliRuntime {
    fn default() -> Self {
        Self::new("surya_ocr", Duration::from_secs(300))
    }
}

impl EngineBRuntime for SuryaCliRuntime {
    type Models = String;

    fn is_available(&self) -> bool {
        Command::new(&self.binary).arg("--version").stdout(Stdio::null()).stderr(Stdio::null()).status().map(|s| s.success()).unwrap_or(false)
    }

    fn load_models(&self, device: &str) -> Result<(String, String)> {
        let child = Command::new(&self.binary)
            .args(["--preload", "--device", device])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| OcrError::EngineB { message: format!("failed to preload engine-b models on {device}"), source: Some(Box::new(e)) })?;

        match wait_with_timeout(child, self.load_timeout)? {
            SubprocessOutcome::Exited(status, _stderr) if status.success() => Ok((device.to_string(), device.to_string())),
            SubprocessOutcome::Exited(_, stderr) => Err(OcrError::EngineB { message: format!("engine-b model load failed: {stderr}"), source: None }),
            SubprocessOutcome::TimedOut => {
                Err(OcrError::EngineB { message: format!("engine-b model load timed out after {:?}", self.load_timeout), source: None })
            }
        }
    }

    fn convert(&self, input: &Path, models: &String, config: &EngineBConfig) -> Result<String> {
        let mut child = Command::new(&self.binary)
            .arg("--device")
            .arg(models)
            .arg("--langs")
            .arg(&config.langs)
            .args(config.force_ocr.then_some("--force-ocr").into_iter())
            .arg(input)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| OcrError::EngineB { message: format!("failed to spawn engine-b for {}", input.display()), source: Some(Box::new(e)) })?;
        let stdout_pipe = child.stdout.take();

        match wait_with_timeout(child, config.batch_timeout)? {
            SubprocessOutcome::Exited(status, stderr) if status.success() => {
                use std::io::Read;
                let mut text = String::new();
                if let Some(mut pipe) = stdout_pipe {
                    pipe.read_to_string(&mut text)
                        .map_err(|e| OcrError::EngineB { message: "failed to read engine-b output".to_string(), source: Some(Box::new(e)) })?;
                }
                let _ = stderr;
                Ok(text)
            }
            SubprocessOutcome::Exited(_, stderr) => Err(OcrError::EngineB { message: format!("engine-b conversion failed: {stderr}"), source: None }),
            SubprocessOutcome::TimedOut => {
                Err(OcrError::EngineB { message: format!("engine-b batch timed out after {:?}", config.batch_timeout), source: None })
            }
        }
    }

    fn is_gpu_runtime_error(&self, error: &OcrError) -> bool {
        let message = error.to_string().to_lowercase();
        message.contains("cuda") || message.contains("gpu") || message.contains("out of memory") || message.contains("mps")
    }
}

enum SubprocessOutcome {
    Exited(std::process::ExitStatus, String),
    TimedOut,
}

fn wait_with_timeout(mut child: Child, timeout: Duration) -> Result<SubprocessOutcome> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                use std::io::Read;
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr);
                }
                return Ok(SubprocessOutcome::Exited(status, stderr));
            }
            Ok(None) => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Ok(SubprocessOutcome::TimedOut);
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                return Err(OcrError::EngineB { message: "failed to poll engine-b process".to_string(), source: Some(Box::new(e)) });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_runtime_error_detection_matches_known_keywords() {
        let runtime = SuryaCliRuntime::default();
        let err = OcrError::EngineB { message: "CUDA out of memory".to_string(), source: None };
        assert!(runtime.is_gpu_runtime_error(&err));

        let err = OcrError::EngineB { message: "malformed pdf page".to_string(), source: None };
        assert!(!runtime.is_gpu_runtime_error(&err));
    }
}
