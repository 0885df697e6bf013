//! Typed pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_timeout() -> Duration {
    Duration::from_secs(1800)
}

/// Configuration for a single pipeline run, shared by the CLI and any other
/// embedder of this library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Composite quality score below which a page is flagged for further
    /// OCR passes.
    pub quality_threshold: f64,
    /// Run Engine-A even on pages whose existing text already passes.
    pub force_engine_a: bool,
    /// Run Engine-B even on pages Engine-A already passed.
    pub force_engine_b: bool,
    /// Fail Engine-B conversion rather than falling back to CPU on a GPU
    /// runtime error.
    pub strict_gpu: bool,
    pub max_workers: usize,
    /// Explicit file list; when empty, `input_dir` is discovered instead.
    pub files: Vec<PathBuf>,
    /// Discover PDFs recursively under `input_dir`.
    pub recursive: bool,
    /// ISO 639-1 language codes to OCR for; empty means the pipeline's
    /// default multi-language set. Resolved to each engine's native codes
    /// via [`crate::types::resolve_languages`].
    pub languages: Vec<String>,
    /// Per-file wall-clock budget covering extraction, scoring, and Engine-A.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Retain the `work/` directory after the run instead of deleting it.
    pub keep_intermediates: bool,
    /// Write a post-processed `.txt` alongside each output PDF.
    pub extract_text: bool,
    /// Capture extended per-page diagnostics into a `.diagnostics.json`
    /// sidecar. Costs real CPU/GPU time (engine-diff, image quality), so
    /// it's opt-in.
    pub diagnostics: bool,
    /// Number of sample problem-text snippets captured per file for debug
    /// output when `diagnostics` is set.
    pub samples: usize,
    pub verbose: bool,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs_f64().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs_f64(f64::deserialize(d)?))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            quality_threshold: 0.85,
            force_engine_a: false,
            force_engine_b: false,
            strict_gpu: false,
            max_workers: num_cpus::get(),
            files: Vec::new(),
            recursive: false,
            languages: Vec::new(),
            timeout: default_timeout(),
            keep_intermediates: false,
            extract_text: false,
            diagnostics: false,
            samples: 5,
            verbose: false,
        }
    }
}

impl PipelineConfig {
    pub fn new(input_dir: PathBuf, output_dir: PathBuf) -> Self {
        Self { input_dir, output_dir, ..Self::default() }
    }

    /// Per-file Engine-A job count: total worker budget split evenly across
    /// the files being processed concurrently, floored at 1.
    pub fn jobs_per_file(&self, file_count: usize) -> usize {
        if file_count == 0 {
            return self.max_workers.max(1);
        }
        (self.max_workers / file_count).max(1)
    }

    /// Phase-1 pool size: capped by `max_workers` and by the number of
    /// per-file thread budgets (`cores / threads_per_file`) that fit on the
    /// machine.
    pub fn pool_size(&self, file_count: usize, cores: usize) -> usize {
        let threads_per_file = self.jobs_per_file(file_count);
        let by_cores = (cores / threads_per_file.max(1)).max(1);
        self.max_workers.min(by_cores).max(1)
    }

    pub fn final_dir(&self) -> PathBuf {
        self.output_dir.join("final")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.output_dir.join("work")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.output_dir.join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.quality_threshold, 0.85);
        assert_eq!(config.timeout, Duration::from_secs(1800));
        assert_eq!(config.samples, 5);
        assert!(!config.strict_gpu);
        assert!(!config.keep_intermediates);
    }

    #[test]
    fn jobs_per_file_splits_worker_budget() {
        let mut config = PipelineConfig::default();
        config.max_workers = 8;
        assert_eq!(config.jobs_per_file(4), 2);
        assert_eq!(config.jobs_per_file(0), 8);
        assert_eq!(config.jobs_per_file(100), 1);
    }

    #[test]
    fn pool_size_is_bounded_by_cores_and_max_workers() {
        let mut config = PipelineConfig::default();
        config.max_workers = 16;
        // 4 files, 2 jobs/file each -> cores/2 = 4 pool slots fit on 8 cores.
        assert_eq!(config.pool_size(4, 8), 4);
    }

    #[test]
    fn output_layout_paths_are_under_output_dir() {
        let config = PipelineConfig::new(PathBuf::from("in"), PathBuf::from("out"));
        assert_eq!(config.final_dir(), PathBuf::from("out/final"));
        assert_eq!(config.work_dir(), PathBuf::from("out/work"));
        assert_eq!(config.logs_dir(), PathBuf::from("out/logs"));
    }
}
