//! Engine-B wrapper: GPU-accelerated OCR over an aggregated, cross-file
//! input with automatic GPU -> CPU fallback on runtime failure.
//!
//! Engine-B is a heavyweight ML model, not something this crate links
//! directly — [`EngineBRuntime`] is the seam a collaborator implements to
//! provide actual model loading/inference, mirroring how the device
//! selector in [`crate::device`] delegates its capability probe.

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::device::DeviceType;
use crate::error::{OcrError, Result};
use crate::model_cache::{GpuMemoryCleaner, ModelCache};

/// Environment variable names the underlying recognition/detection models
/// read their batch size from.
pub const RECOGNITION_BATCH_SIZE_ENV: &str = "SURYA_RECOGNITION_BATCH_SIZE";
pub const DETECTOR_BATCH_SIZE_ENV: &str = "SURYA_DETECTOR_BATCH_SIZE";

/// `(min_gb, recognition_batch_size, detector_batch_size)`, checked in
/// descending order of `min_gb` so the first tier the available memory
/// clears wins. Applies to GPU devices only; CPU gets a fixed conservative
/// pair regardless of system RAM, since Engine-B's CPU path is bottlenecked
/// on compute, not memory.
const GPU_MEMORY_TIERS: &[(f64, usize, usize)] = &[(32.0, 128, 64), (16.0, 64, 32), (0.0, 32, 16)];
const CPU_BATCH_SIZES: (usize, usize) = (32, 6);

/// Set the recognition/detection batch-size environment variables from
/// `available_gb`'s memory tier, if not already present in the environment.
/// Must run before any Engine-B model load: the underlying recognizer reads
/// these once at process start, not per call.
pub fn apply_batch_size_environment(device: DeviceType, available_gb: f64) {
    let (recognition, detector) = batch_sizes_for(device, available_gb);
    set_env_if_absent(RECOGNITION_BATCH_SIZE_ENV, recognition);
    set_env_if_absent(DETECTOR_BATCH_SIZE_ENV, detector);
}

/// Pure lookup of `(recognition_batch_size, detector_batch_size)` for a
/// device/available-memory pair, split out from [`apply_batch_size_environment`]
/// so the tier table is testable without touching process environment state.
fn batch_sizes_for(device: DeviceType, available_gb: f64) -> (usize, usize) {
    if device == DeviceType::Cpu {
        return CPU_BATCH_SIZES;
    }
    GPU_MEMORY_TIERS
        .iter()
        .find(|(min_gb, _, _)| available_gb >= *min_gb)
        .map(|(_, r, d)| (*r, *d))
        .unwrap_or(CPU_BATCH_SIZES)
}

fn set_env_if_absent(key: &str, value: usize) {
    if std::env::var_os(key).is_none() {
        // SAFETY: called once from the orchestrator's single-threaded
        // Phase-2 entry, before any worker thread that might also touch
        // the environment is spawned.
        unsafe { std::env::set_var(key, value.to_string()) };
    }
}

#[derive(Debug, Clone)]
pub struct EngineBConfig {
    /// Comma-separated language codes, e.g. `"en,fr,el,la,de"`.
    pub langs: String,
    pub force_ocr: bool,
    pub batch_size: usize,
    pub model_load_timeout: Duration,
    pub batch_timeout: Duration,
}

impl Default for EngineBConfig {
    fn default() -> Self {
        Self {
            langs: "en,fr,el,la,de".to_string(),
            force_ocr: true,
            batch_size: 50,
            model_load_timeout: Duration::from_secs(300),
            batch_timeout: Duration::from_secs(1200),
        }
    }
}

/// Collaborator implementing actual model loading and inference for
/// Engine-B. `Models` is whatever in-memory representation the
/// collaborator's bindings produce.
pub trait EngineBRuntime {
    type Models;

    fn is_available(&self) -> bool;
    fn load_models(&self, device: &str) -> Result<(Self::Models, String)>;
    fn convert(&self, input: &Path, models: &Self::Models, config: &EngineBConfig) -> Result<String>;
    /// Whether `error` indicates a GPU runtime failure (as opposed to, say,
    /// a malformed input file) — only these are eligible for CPU fallback.
    fn is_gpu_runtime_error(&self, error: &OcrError) -> bool;
}

/// Convert `input` with Engine-B, using `cache` to reuse already-loaded
/// models. On a GPU runtime failure, clears GPU memory, reloads models on
/// CPU, and retries once — unless `strict_gpu` is set, in which case the
/// error propagates immediately. Returns the converted text and whether a
/// fallback occurred.
pub fn convert_with_fallback<R: EngineBRuntime>(
    runtime: &R,
    input: &Path,
    cache: &ModelCache<R::Models>,
    device: DeviceType,
    strict_gpu: bool,
    cleaner: &dyn GpuMemoryCleaner,
    config: &EngineBConfig,
) -> Result<(String, bool)> {
    let device_str = device.to_string();
    let (models, device_used) = cache.get_models(Some(&device_str), |d| runtime.load_models(d.unwrap_or("cpu")))?;

    match runtime.convert(input, &models, config) {
        Ok(text) => Ok((text, false)),
        Err(e) if device != DeviceType::Cpu && !strict_gpu && runtime.is_gpu_runtime_error(&e) => {
            warn!(error = %e, "engine-b gpu runtime error, falling back to cpu");
            cache.evict(cleaner);

            let (cpu_models, cpu_device) = cache.get_models(Some("cpu"), |d| runtime.load_models(d.unwrap_or("cpu")))?;
            info!(device = %cpu_device, "retrying engine-b on cpu after gpu failure");
            let text = runtime.convert(input, &cpu_models, config)?;
            Ok((text, true))
        }
        Err(e) => {
            if strict_gpu {
                warn!(error = %e, device = %device_used, "engine-b failed with strict_gpu set, not falling back");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyGpuRuntime {
        calls: AtomicUsize,
    }

    impl EngineBRuntime for FlakyGpuRuntime {
        type Models = String;

        fn is_available(&self) -> bool {
            true
        }

        fn load_models(&self, device: &str) -> Result<(String, String)> {
            Ok((format!("models-on-{device}"), device.to_string()))
        }

        fn convert(&self, _input: &Path, models: &String, _config: &EngineBConfig) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 && models.contains("mps") {
                Err(OcrError::EngineB { message: "mps out of memory".to_string(), source: None })
            } else {
                Ok(format!("converted via {models}"))
            }
        }

        fn is_gpu_runtime_error(&self, _error: &OcrError) -> bool {
            true
        }
    }

    #[test]
    fn cpu_batch_sizes_are_fixed_regardless_of_memory() {
        assert_eq!(batch_sizes_for(DeviceType::Cpu, 4.0), CPU_BATCH_SIZES);
        assert_eq!(batch_sizes_for(DeviceType::Cpu, 256.0), CPU_BATCH_SIZES);
    }

    #[test]
    fn gpu_batch_sizes_scale_with_memory_tier() {
        assert_eq!(batch_sizes_for(DeviceType::Cuda, 2.0), (32, 16));
        assert_eq!(batch_sizes_for(DeviceType::Cuda, 20.0), (64, 32));
        assert_eq!(batch_sizes_for(DeviceType::Cuda, 48.0), (128, 64));
        // tier boundaries are inclusive on the low end
        assert_eq!(batch_sizes_for(DeviceType::Mps, 16.0), (64, 32));
        assert_eq!(batch_sizes_for(DeviceType::Mps, 32.0), (128, 64));
    }

    // SAFETY: every test touching these two env vars is `#[serial_test::serial]`,
    // so no other test in this process observes or clobbers them concurrently.
    fn clear_batch_size_env() {
        unsafe {
            std::env::remove_var(RECOGNITION_BATCH_SIZE_ENV);
            std::env::remove_var(DETECTOR_BATCH_SIZE_ENV);
        }
    }

    #[test]
    #[serial_test::serial]
    fn apply_batch_size_environment_sets_both_vars_for_tier() {
        clear_batch_size_env();

        apply_batch_size_environment(DeviceType::Cuda, 20.0);

        assert_eq!(std::env::var(RECOGNITION_BATCH_SIZE_ENV).unwrap(), "64");
        assert_eq!(std::env::var(DETECTOR_BATCH_SIZE_ENV).unwrap(), "32");

        clear_batch_size_env();
    }

    #[test]
    #[serial_test::serial]
    fn apply_batch_size_environment_does_not_overwrite_existing_value() {
        clear_batch_size_env();
        // SAFETY: test runs under #[serial_test::serial], so no other test
        // in this process touches these two env vars concurrently.
        unsafe { std::env::set_var(RECOGNITION_BATCH_SIZE_ENV, "999") };

        apply_batch_size_environment(DeviceType::Cpu, 4.0);

        assert_eq!(std::env::var(RECOGNITION_BATCH_SIZE_ENV).unwrap(), "999");
        assert_eq!(std::env::var(DETECTOR_BATCH_SIZE_ENV).unwrap(), "6");

        clear_batch_size_env();
    }

    #[test]
    fn falls_back_to_cpu_after_gpu_failure() {
        let runtime = FlakyGpuRuntime { calls: AtomicUsize::new(0) };
        let cache = ModelCache::new(Duration::from_secs(60));
        let config = EngineBConfig::default();
        let (text, fell_back) =
            convert_with_fallback(&runtime, Path::new("in.pdf"), &cache, DeviceType::Mps, false, &crate::model_cache::NoGpuCleaner, &config)
                .unwrap();
        assert!(fell_back);
        assert!(text.contains("cpu"));
    }

    #[test]
    fn strict_gpu_propagates_the_error() {
        let runtime = FlakyGpuRuntime { calls: AtomicUsize::new(0) };
        let cache = ModelCache::new(Duration::from_secs(60));
        let config = EngineBConfig::default();
        let result =
            convert_with_fallback(&runtime, Path::new("in.pdf"), &cache, DeviceType::Mps, true, &crate::model_cache::NoGpuCleaner, &config);
        assert!(result.is_err());
    }

    #[test]
    fn cpu_device_never_attempts_fallback() {
        let runtime = FlakyGpuRuntime { calls: AtomicUsize::new(0) };
        let cache = ModelCache::new(Duration::from_secs(60));
        let config = EngineBConfig::default();
        let (text, fell_back) =
            convert_with_fallback(&runtime, Path::new("in.pdf"), &cache, DeviceType::Cpu, false, &crate::model_cache::NoGpuCleaner, &config)
                .unwrap();
        assert!(!fell_back);
        assert!(text.contains("cpu"));
    }
}
