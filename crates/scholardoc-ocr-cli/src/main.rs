//! Command-line entry point for the hybrid academic-PDF OCR pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use scholardoc_ocr::runtime::{SuryaCliRuntime, SystemDeviceProbe, SystemGpuCleaner, SystemGpuMemoryProbe};
use scholardoc_ocr::{BatchResult, NullObserver, OcrError, Pipeline, PipelineConfig};
use tracing_subscriber::EnvFilter;

/// Hybrid OCR pipeline for scanned academic PDFs: a fast CPU pass scores
/// existing or Engine-A text, and a GPU-batched Engine-B pass mops up
/// whatever still falls short of the quality threshold.
#[derive(Parser, Debug)]
#[command(name = "scholardoc-ocr", version, about)]
struct Cli {
    /// Directory to discover input PDFs in.
    #[arg(long, conflicts_with = "files")]
    input_dir: Option<PathBuf>,

    /// Explicit list of input PDFs; overrides --input-dir discovery.
    #[arg(long)]
    files: Vec<PathBuf>,

    /// Directory `final/`, `work/`, and `logs/` are written under.
    #[arg(long)]
    output_dir: PathBuf,

    /// Composite quality score below which a page is flagged for OCR.
    #[arg(long, default_value_t = 0.85)]
    quality_threshold: f64,

    /// Run Engine-A even on pages whose existing text already passes.
    #[arg(long)]
    force_engine_a: bool,

    /// Run Engine-B even on pages Engine-A already passed.
    #[arg(long)]
    force_engine_b: bool,

    /// Fail rather than fall back to CPU when Engine-B hits a GPU error.
    #[arg(long)]
    strict_gpu: bool,

    /// Worker budget for Phase-1's thread pool; defaults to all cores.
    #[arg(long)]
    max_workers: Option<usize>,

    /// Discover PDFs recursively under --input-dir.
    #[arg(long)]
    recursive: bool,

    /// ISO 639-1 language codes to OCR for (repeatable); defaults to the
    /// pipeline's built-in multi-language set.
    #[arg(long = "lang")]
    languages: Vec<String>,

    /// Per-file wall-clock budget in seconds.
    #[arg(long, default_value_t = 1800)]
    timeout_seconds: u64,

    /// Keep the `work/` directory after the run instead of deleting it.
    #[arg(long)]
    keep_intermediates: bool,

    /// Write a post-processed `.txt` alongside each output PDF.
    #[arg(long)]
    extract_text: bool,

    /// Capture extended per-page diagnostics into a `.diagnostics.json`
    /// sidecar.
    #[arg(long)]
    diagnostics: bool,

    /// Number of sample problem-text snippets captured per file when
    /// --diagnostics is set.
    #[arg(long, default_value_t = 5)]
    samples: usize,

    /// Print the final `BatchResult` as JSON instead of a summary table.
    #[arg(long)]
    json: bool,

    /// Enable debug-level logging to stderr in addition to the log file.
    #[arg(short, long)]
    verbose: bool,
}

fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let input_dir = cli.input_dir.clone().unwrap_or_default();
    let mut config = PipelineConfig::new(input_dir, cli.output_dir.clone());
    config.files = cli.files.clone();
    config.quality_threshold = cli.quality_threshold;
    config.force_engine_a = cli.force_engine_a;
    config.force_engine_b = cli.force_engine_b;
    config.strict_gpu = cli.strict_gpu;
    if let Some(workers) = cli.max_workers {
        config.max_workers = workers;
    }
    config.recursive = cli.recursive;
    config.languages = cli.languages.clone();
    config.timeout = Duration::from_secs(cli.timeout_seconds);
    config.keep_intermediates = cli.keep_intermediates;
    config.extract_text = cli.extract_text;
    config.diagnostics = cli.diagnostics;
    config.samples = cli.samples;
    config.verbose = cli.verbose;

    if config.input_dir.as_os_str().is_empty() && config.files.is_empty() {
        anyhow::bail!("either --input-dir or --files must be given");
    }
    Ok(config)
}

fn init_logging(config: &PipelineConfig, verbose: bool) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let logs_dir = config.logs_dir();
    std::fs::create_dir_all(&logs_dir).with_context(|| format!("failed to create log directory {}", logs_dir.display()))?;

    let file_appender = tracing_appender::rolling::never(&logs_dir, "pipeline.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).with_writer(non_blocking).with_ansi(false).init();

    Ok(guard)
}

fn print_summary(result: &BatchResult) {
    println!(
        "scholardoc-ocr: {} files, {} succeeded, {} errored, {} flagged, {:.1}s total",
        result.files.len(),
        result.success_count(),
        result.error_count(),
        result.flagged_count(),
        result.total_time_seconds
    );
    for file in &result.files {
        if file.success {
            println!(
                "  {:<40} engine={:<8} quality={:.2} pages={}",
                file.filename, file.engine, file.quality_score, file.page_count
            );
        } else {
            println!("  {:<40} ERROR: {}", file.filename, file.error.as_deref().unwrap_or("unknown error"));
        }
    }
}

fn run(cli: &Cli) -> std::result::Result<BatchResult, OcrError> {
    let config = build_config(cli).map_err(|e| OcrError::configuration(e.to_string()))?;

    let runtime = SuryaCliRuntime::default();
    let device_probe = SystemDeviceProbe::default();
    let gpu_memory_probe = SystemGpuMemoryProbe;
    let gpu_cleaner = SystemGpuCleaner::default();

    let pipeline = Pipeline::new(config, runtime, Arc::new(NullObserver));
    pipeline.run(&device_probe, &gpu_memory_probe, &gpu_cleaner)
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let config_for_logging = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("scholardoc-ocr: {e:#}");
            return std::process::ExitCode::from(2);
        }
    };
    let _log_guard = match init_logging(&config_for_logging, cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("scholardoc-ocr: failed to set up logging: {e:#}");
            return std::process::ExitCode::from(2);
        }
    };

    match run(&cli) {
        Ok(result) => {
            if cli.json {
                match serde_json::to_string_pretty(&result) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        eprintln!("scholardoc-ocr: failed to serialize result: {e}");
                        return std::process::ExitCode::from(2);
                    }
                }
            } else {
                print_summary(&result);
            }

            if result.error_count() > 0 {
                std::process::ExitCode::from(1)
            } else {
                std::process::ExitCode::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("scholardoc-ocr: {e}");
            std::process::ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli(output_dir: PathBuf) -> Cli {
        Cli {
            input_dir: Some(PathBuf::from("in")),
            files: Vec::new(),
            output_dir,
            quality_threshold: 0.85,
            force_engine_a: false,
            force_engine_b: false,
            strict_gpu: false,
            max_workers: None,
            recursive: false,
            languages: Vec::new(),
            timeout_seconds: 1800,
            keep_intermediates: false,
            extract_text: false,
            diagnostics: false,
            samples: 5,
            json: false,
            verbose: false,
        }
    }

    #[test]
    fn build_config_requires_input_dir_or_files() {
        let mut cli = base_cli(PathBuf::from("out"));
        cli.input_dir = None;
        assert!(build_config(&cli).is_err());
    }

    #[test]
    fn build_config_maps_flags_onto_pipeline_config() {
        let cli = base_cli(PathBuf::from("out"));
        let config = build_config(&cli).unwrap();
        assert_eq!(config.quality_threshold, 0.85);
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.timeout, Duration::from_secs(1800));
    }
}
