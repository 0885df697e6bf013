//! Orchestrator: Phase-1 parallel per-file dispatch, Phase-2 sequential
//! cross-file batched Engine-B dispatch, result assembly, and progress
//! events.

pub mod callbacks;
pub mod environment;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{info, info_span, warn};

use self::callbacks::{ModelEvent, ModelStatus, Observer, PhaseEvent, PhaseStatus, ProgressEvent};
use crate::analyzer::{QualityAnalyzer, QualityResult};
use crate::batch::{self, GpuMemoryProbe};
use crate::config::PipelineConfig;
use crate::device::{DeviceProbe, DeviceType};
use crate::diagnostics::{self, PageDiagnostics};
use crate::engine_a::{self, EngineAConfig};
use crate::engine_b::{self, EngineBConfig, EngineBRuntime};
use crate::error::{OcrError, Result};
use crate::model_cache::{self, GpuMemoryCleaner, ModelCache};
use crate::output::{self, WorkingDirectory};
use crate::pdf::PdfFile;
use crate::postprocess;
use crate::types::{resolve_languages, BatchResult, Engine, FileResult, PageResult, PageStatus, ProcessingPhase};

/// Wires together every component: quality analyzer, Engine-A/B wrappers,
/// model cache, batch planner, and progress observation.
pub struct Pipeline<R: EngineBRuntime> {
    config: PipelineConfig,
    analyzer: QualityAnalyzer,
    observer: Arc<dyn Observer>,
    engine_b_runtime: R,
    model_cache: ModelCache<R::Models>,
}

impl<R: EngineBRuntime> Pipeline<R> {
    pub fn new(config: PipelineConfig, engine_b_runtime: R, observer: Arc<dyn Observer>) -> Self {
        let analyzer = QualityAnalyzer::with_floors_and_samples(config.quality_threshold, crate::analyzer::SignalFloors::default(), config.samples);
        let model_cache = ModelCache::from_env();
        Self { config, analyzer, observer, engine_b_runtime, model_cache }
    }

    /// Run the full pipeline end to end: Phase-0 environment validation,
    /// Phase-1 parallel per-file dispatch, Phase-2 sequential batched
    /// Engine-B dispatch, and final result assembly.
    pub fn run(
        &self,
        device_probe: &dyn DeviceProbe,
        gpu_memory_probe: &dyn GpuMemoryProbe,
        gpu_cleaner: &dyn GpuMemoryCleaner,
    ) -> Result<BatchResult> {
        environment::validate_environment(&self.config.languages)?;
        environment::log_startup_diagnostics();

        let working_dir = WorkingDirectory::prepare(&self.config)?;

        let inputs = self.discover_inputs()?;
        let start = Instant::now();

        self.emit_phase(ProcessingPhase::Analysis, PhaseStatus::Starting, inputs.len(), 0);
        let outcomes = self.run_phase_one(&inputs, working_dir.path());
        let mut files: Vec<FileResult> = Vec::with_capacity(outcomes.len());
        let mut diagnostics_by_file: BTreeMap<String, BTreeMap<usize, PageDiagnostics>> = BTreeMap::new();
        for (file, diag) in outcomes {
            if let Some(diag) = diag {
                diagnostics_by_file.insert(file.filename.clone(), diag);
            }
            files.push(file);
        }
        let total_pages: usize = files.iter().map(|f| f.page_count).sum();
        self.emit_phase(ProcessingPhase::Analysis, PhaseStatus::Complete, inputs.len(), total_pages);

        let input_paths: BTreeMap<String, PathBuf> =
            inputs.iter().map(|p| (filename(p), p.clone())).collect();

        // Phase-2 failures are suppressed, never propagated: a sub-batch that
        // errors must not invalidate the Phase-1 output already computed (and
        // in many cases already written to disk) for the files it touches.
        if let Err(e) = self.run_phase_two(&mut files, &input_paths, device_probe, gpu_memory_probe, gpu_cleaner) {
            warn!(error = %e, "engine-b phase failed, keeping phase-1 results for affected files");
        }

        for file in &mut files {
            for page in &mut file.pages {
                if let Some(text) = &page.text {
                    let (cleaned, _counts) = postprocess::postprocess(text, &[]);
                    page.text = Some(cleaned);
                }
            }
        }

        for file in &files {
            if !file.success {
                continue;
            }
            let input_path = input_paths.get(&file.filename);
            if file.output_path.is_none() {
                if let Some(input_path) = input_path {
                    if let Err(e) = output::copy_passthrough(input_path, &self.config, &file.filename) {
                        warn!(filename = %file.filename, error = %e, "failed to write pass-through output");
                    }
                }
            }
            if self.config.extract_text {
                let pages: Vec<String> = file.pages.iter().map(|p| p.text.clone().unwrap_or_default()).collect();
                if let Err(e) = output::write_text(&self.config, &file.filename, &pages) {
                    warn!(filename = %file.filename, error = %e, "failed to write extracted text");
                }
            }
            if let Err(e) = output::write_result_sidecar(&self.config, &file.filename, file) {
                warn!(filename = %file.filename, error = %e, "failed to write result sidecar");
            }
            if self.config.diagnostics {
                if let Some(diag) = diagnostics_by_file.get(&file.filename) {
                    if let Err(e) = output::write_diagnostics_sidecar(&self.config, &file.filename, diag) {
                        warn!(filename = %file.filename, error = %e, "failed to write diagnostics sidecar");
                    }
                }
            }
        }

        Ok(BatchResult {
            files,
            total_time_seconds: start.elapsed().as_secs_f64(),
            config: serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null),
        })
    }

    fn discover_inputs(&self) -> Result<Vec<PathBuf>> {
        if !self.config.files.is_empty() {
            return Ok(self.config.files.clone());
        }

        let mut found = Vec::new();
        let walker: Box<dyn Iterator<Item = walkdir_entry::DirEntry>> = if self.config.recursive {
            Box::new(walkdir_entry::walk(&self.config.input_dir, true))
        } else {
            Box::new(walkdir_entry::walk(&self.config.input_dir, false))
        };

        for entry in walker {
            if entry.path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("pdf")).unwrap_or(false) {
                found.push(entry.path);
            }
        }
        found.sort();
        Ok(found)
    }

    /// Process every input file concurrently on a rayon thread pool. Each
    /// worker is isolated: it opens its PDF, extracts and scores text per
    /// page, runs Engine-A over the whole file if any page is flagged, and
    /// rescores those pages.
    fn run_phase_one(&self, inputs: &[PathBuf], work_dir: &Path) -> Vec<(FileResult, Option<BTreeMap<usize, PageDiagnostics>>)> {
        let jobs_per_file = self.config.jobs_per_file(inputs.len());
        let (engine_a_langs, _engine_b_langs) =
            resolve_languages(&self.config.languages).unwrap_or_else(|_| ("eng".to_string(), "en".to_string()));

        let cores = num_cpus::get();
        let pool_size = self.config.pool_size(inputs.len(), cores);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(pool_size)
            .thread_name(|i| format!("phase1-worker-{i}"))
            .build();

        let run = |pool: &rayon::ThreadPool| {
            pool.install(|| {
                inputs
                    .par_iter()
                    .enumerate()
                    .map(|(worker_id, path)| {
                        let span = info_span!("phase1_worker", worker_id, file = %path.display());
                        let _guard = span.enter();
                        self.emit_progress(ProcessingPhase::Analysis, worker_id, inputs.len(), Some(path), Some(worker_id));
                        self.process_single_file_with_timeout(path, jobs_per_file, &engine_a_langs, work_dir)
                    })
                    .collect()
            })
        };

        match pool {
            Ok(pool) => run(&pool),
            Err(e) => {
                warn!(error = %e, pool_size, "failed to build a bounded phase-1 thread pool, falling back to the global pool");
                inputs
                    .par_iter()
                    .enumerate()
                    .map(|(worker_id, path)| {
                        let span = info_span!("phase1_worker", worker_id, file = %path.display());
                        let _guard = span.enter();
                        self.emit_progress(ProcessingPhase::Analysis, worker_id, inputs.len(), Some(path), Some(worker_id));
                        self.process_single_file_with_timeout(path, jobs_per_file, &engine_a_langs, work_dir)
                    })
                    .collect()
            }
        }
    }

    /// Runs [`Self::process_single_file`] on a detached thread and enforces
    /// `config.timeout` with a channel recv. Safe Rust has no way to cancel
    /// a running thread, so a timed-out worker keeps running in the
    /// background; its result is discarded when it eventually arrives.
    fn process_single_file_with_timeout(
        &self,
        path: &Path,
        jobs: usize,
        engine_a_langs: &str,
        work_dir: &Path,
    ) -> (FileResult, Option<BTreeMap<usize, PageDiagnostics>>) {
        let start = Instant::now();
        let filename_str = filename(path);
        let (tx, rx) = mpsc::channel();
        let path = path.to_path_buf();
        let engine_a_langs = engine_a_langs.to_string();
        let work_dir = work_dir.to_path_buf();
        let config = self.config.clone();
        let analyzer = QualityAnalyzer::with_floors_and_samples(self.config.quality_threshold, crate::analyzer::SignalFloors::default(), self.config.samples);

        let handle = std::thread::spawn(move || {
            let outcome = Self::process_single_file_inner(&config, &analyzer, &path, jobs, &engine_a_langs, &work_dir);
            let _ = tx.send(outcome);
        });

        match rx.recv_timeout(self.config.timeout) {
            Ok(outcome) => {
                drop(handle);
                outcome
            }
            Err(_) => {
                warn!(filename = %filename_str, timeout_seconds = self.config.timeout.as_secs_f64(), "file processing timed out");
                (error_result(&filename_str, OcrError::configuration(format!("timed out after {:?}", self.config.timeout)), start), None)
            }
        }
    }

    fn process_single_file_inner(
        config: &PipelineConfig,
        analyzer: &QualityAnalyzer,
        path: &Path,
        jobs: usize,
        engine_a_langs: &str,
        work_dir: &Path,
    ) -> (FileResult, Option<BTreeMap<usize, PageDiagnostics>>) {
        let start = Instant::now();
        let filename_str = filename(path);

        let mut phase_timings: BTreeMap<String, f64> = BTreeMap::new();

        let extract_start = Instant::now();
        let pdf = match PdfFile::open(path) {
            Ok(pdf) => pdf,
            Err(e) => return (error_result(&filename_str, e, start), None),
        };

        let page_count = pdf.page_count();
        let texts = pdf.extract_text_by_page();
        let mut results: Vec<(PageResult, QualityResult)> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| score_page(analyzer, i, text, Engine::Existing))
            .collect();
        phase_timings.insert("analysis".to_string(), extract_start.elapsed().as_secs_f64());

        let any_flagged = results.iter().any(|(p, _)| p.flagged) || config.force_engine_a;
        let mut output_path = None;

        if any_flagged {
            let engine_a_start = Instant::now();
            let work_output = work_dir.join(&filename_str);
            let engine_a_config = EngineAConfig { langs: engine_a_langs.to_string(), jobs, ..EngineAConfig::default() };

            match engine_a::run_ocr(path, &work_output, &engine_a_config) {
                Ok(result) if result.success => {
                    if let Some(produced) = &result.output_path {
                        if let Ok(rescanned) = PdfFile::open(produced) {
                            let rescored_texts = rescanned.extract_text_by_page();
                            for (i, text) in rescored_texts.iter().enumerate() {
                                if let Some((page, quality)) = results.get_mut(i) {
                                    if page.flagged || config.force_engine_a {
                                        let (new_page, new_quality) = score_page(analyzer, i, text, Engine::EngineA);
                                        *page = new_page;
                                        *quality = new_quality;
                                    }
                                }
                            }
                        }
                        match output::copy_passthrough(produced, config, &filename_str) {
                            Ok(dest) => output_path = Some(dest.to_string_lossy().to_string()),
                            Err(e) => warn!(filename = %filename_str, error = %e, "failed to place engine-a output"),
                        }
                    }
                }
                Ok(result) => {
                    let message = result.error.unwrap_or_else(|| "engine-a failed".to_string());
                    warn!(filename = %filename_str, error = %message, "engine-a failed");
                    return (
                        error_result(&filename_str, OcrError::EngineA { message, source: None }, start),
                        None,
                    );
                }
                Err(e) => {
                    warn!(filename = %filename_str, error = %e, "engine-a failed");
                    return (error_result(&filename_str, e, start), None);
                }
            }
            phase_timings.insert("engine_a".to_string(), engine_a_start.elapsed().as_secs_f64());
        }

        let diagnostics_map = config.diagnostics.then(|| {
            results
                .iter()
                .map(|(page, quality)| (page.page_number, diagnostics::build_always_diagnostics(quality, config.quality_threshold)))
                .collect::<BTreeMap<usize, PageDiagnostics>>()
        });

        let pages: Vec<PageResult> = results.into_iter().map(|(p, _)| p).collect();
        let mut file = FileResult {
            filename: filename_str,
            success: true,
            engine: Engine::None,
            quality_score: 0.0,
            page_count,
            pages,
            error: None,
            time_seconds: start.elapsed().as_secs_f64(),
            phase_timings,
            output_path,
        };
        file.recompute_rollups();
        (file, diagnostics_map)
    }

    /// Aggregate every still-flagged page across every file, split into
    /// memory-safe sub-batches, and run Engine-B once per sub-batch,
    /// reusing cached models between sub-batches.
    fn run_phase_two(
        &self,
        files: &mut [FileResult],
        input_paths: &BTreeMap<String, PathBuf>,
        device_probe: &dyn DeviceProbe,
        gpu_memory_probe: &dyn GpuMemoryProbe,
        gpu_cleaner: &dyn GpuMemoryCleaner,
    ) -> Result<()> {
        if self.config.force_engine_b {
            for file in files.iter_mut() {
                for page in &mut file.pages {
                    page.flagged = true;
                    page.status = PageStatus::Flagged;
                }
            }
        }

        let flagged = batch::collect_flagged_pages(files, input_paths);
        if flagged.is_empty() {
            return Ok(());
        }

        self.emit_phase(ProcessingPhase::EngineB, PhaseStatus::Starting, files.len(), flagged.len());

        let device = crate::device::detect_device(device_probe);
        let available_memory = batch::get_available_memory_gb(device.device_type, gpu_memory_probe);

        // Recognition/detection batch-size env vars must land before the
        // first `load_models` call of this run: the underlying model reads
        // them once at process start, not per conversion.
        engine_b::apply_batch_size_environment(device.device_type, available_memory);

        let engine_b_config = EngineBConfig::default();
        let tmp_dir = std::env::temp_dir();

        let sub_batches = batch::split_into_batches(&flagged, available_memory, device.device_type);
        let sub_batch_count = sub_batches.len();
        for (chunk_index, rebased) in sub_batches.into_iter().enumerate() {
            let combined_path = tmp_dir.join(format!("scholardoc-ocr-batch-{chunk_index}.pdf"));

            // A failure anywhere in this sub-batch (combined-input
            // construction, model load, or conversion) is logged and
            // skipped: the pages it would have touched simply keep
            // whatever Phase-1 (or an earlier sub-batch) already produced.
            if let Err(e) = batch::create_combined_pdf(&rebased, &combined_path) {
                warn!(chunk_index, error = %e, "failed to build combined input for this sub-batch, skipping it");
                continue;
            }

            self.emit_model(&format!("engine-b-batch-{chunk_index}"), ModelStatus::Loading, None);
            let load_start = Instant::now();
            let converted = engine_b::convert_with_fallback(
                &self.engine_b_runtime,
                &combined_path,
                &self.model_cache,
                device.device_type,
                self.config.strict_gpu,
                gpu_cleaner,
                &engine_b_config,
            );
            let _ = std::fs::remove_file(&combined_path);

            let (text, fell_back) = match converted {
                Ok(result) => result,
                Err(e) => {
                    warn!(chunk_index, error = %e, "engine-b failed for this sub-batch, keeping phase-1 results for its pages");
                    continue;
                }
            };
            self.emit_model(&format!("engine-b-batch-{chunk_index}"), ModelStatus::Loaded, Some(load_start.elapsed().as_secs_f64()));
            if fell_back {
                info!(chunk_index, "engine-b fell back to cpu for this sub-batch");
            }

            batch::map_results_to_files(&rebased, &text, &self.analyzer, files);

            let sub_batch_elapsed = load_start.elapsed().as_secs_f64();
            for file_index in rebased.iter().map(|p| p.file_index).collect::<std::collections::BTreeSet<_>>() {
                *files[file_index].phase_timings.entry("engine_b".to_string()).or_insert(0.0) += sub_batch_elapsed;
            }

            if sub_batch_count > 1 {
                model_cache::cleanup_between_documents(gpu_cleaner);
            }
        }

        let total_pages: usize = files.iter().map(|f| f.page_count).sum();
        self.emit_phase(ProcessingPhase::EngineB, PhaseStatus::Complete, files.len(), total_pages);
        Ok(())
    }

    fn emit_progress(
        &self,
        phase: ProcessingPhase,
        current: usize,
        total: usize,
        path: Option<&Path>,
        worker_id: Option<usize>,
    ) {
        let event =
            ProgressEvent { phase, current, total, filename: path.map(|p| filename(p)), worker_id, eta_seconds: None };
        self.observer.on_progress(&event);
        callbacks::LoggingObserver.on_progress(&event);
    }

    fn emit_phase(&self, phase: ProcessingPhase, status: PhaseStatus, files_count: usize, pages_count: usize) {
        let event = PhaseEvent { phase, status, files_count, pages_count };
        self.observer.on_phase(&event);
        callbacks::LoggingObserver.on_phase(&event);
    }

    fn emit_model(&self, model_name: &str, status: ModelStatus, time_seconds: Option<f64>) {
        let event = ModelEvent { model_name: model_name.to_string(), status, time_seconds };
        self.observer.on_model(&event);
        callbacks::LoggingObserver.on_model(&event);
    }
}

fn score_page(analyzer: &QualityAnalyzer, index: usize, text: &str, engine: Engine) -> (PageResult, QualityResult) {
    let result = analyzer.analyze(text, None);
    let page = PageResult {
        page_number: index,
        status: if result.flagged { PageStatus::Flagged } else { PageStatus::Good },
        quality_score: result.composite_score,
        engine,
        flagged: result.flagged,
        text: Some(text.to_string()),
    };
    (page, result)
}

fn filename(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| path.display().to_string())
}

fn error_result(filename: &str, error: OcrError, start: Instant) -> FileResult {
    FileResult {
        filename: filename.to_string(),
        success: false,
        engine: Engine::None,
        quality_score: 0.0,
        page_count: 0,
        pages: Vec::new(),
        error: Some(error.to_string()),
        time_seconds: start.elapsed().as_secs_f64(),
        phase_timings: BTreeMap::new(),
        output_path: None,
    }
}

/// Minimal recursive/non-recursive directory walk, kept local to avoid
/// pulling in a dedicated directory-walking crate for one call site.
mod walkdir_entry {
    use std::path::{Path, PathBuf};

    pub struct DirEntry {
        pub path: PathBuf,
    }

    pub fn walk(root: &Path, recursive: bool) -> Box<dyn Iterator<Item = DirEntry>> {
        let mut stack = vec![root.to_path_buf()];
        let mut out = Vec::new();

        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else { continue };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    if recursive {
                        stack.push(path);
                    }
                    continue;
                }
                out.push(DirEntry { path });
            }
        }

        Box::new(out.into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_extracts_basename() {
        assert_eq!(filename(Path::new("/a/b/c.pdf")), "c.pdf");
    }

    #[test]
    fn error_result_has_zero_pages_and_is_unsuccessful() {
        let result = error_result("x.pdf", OcrError::configuration("boom"), Instant::now());
        assert!(!result.success);
        assert_eq!(result.page_count, 0);
    }
}
