//! Cross-file batch planning for Engine-B: memory-aware sub-batch sizing,
//! flagged-page aggregation across files, combined-PDF construction, and
//! mapping Engine-B's output back to each source page.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use lopdf::{dictionary, Document, Object, ObjectId};
use regex::Regex;
use sysinfo::System;
use tracing::{debug, warn};

use crate::analyzer::QualityAnalyzer;
use crate::device::DeviceType;
use crate::error::{OcrError, Result};
use crate::types::{Engine, FileResult, PageStatus};

/// Empirical peak memory per page during Engine-B processing (detection +
/// recognition + layout), in GB. Conservative to avoid freezing
/// memory-constrained systems rather than hitting a clean OOM.
pub const MEMORY_PER_PAGE_GB: f64 = 0.7;

/// Available-memory floor below which the system is considered constrained.
pub const MEMORY_PRESSURE_THRESHOLD_GB: f64 = 4.0;

/// Reports CUDA VRAM size when running on a CUDA device, delegated to
/// whatever collaborator links the GPU runtime. Absent on CPU/MPS builds.
pub trait GpuMemoryProbe {
    fn cuda_total_memory_gb(&self) -> Option<f64>;
}

pub struct NoGpuMemoryProbe;

impl GpuMemoryProbe for NoGpuMemoryProbe {
    fn cuda_total_memory_gb(&self) -> Option<f64> {
        None
    }
}

/// Whether available system memory is below [`MEMORY_PRESSURE_THRESHOLD_GB`],
/// plus the available amount in GB. Uses *available*, not total, memory so
/// pressure from other running processes is accounted for.
pub fn check_memory_pressure() -> (bool, f64) {
    let mut sys = System::new();
    sys.refresh_memory();
    let available_gb = sys.available_memory() as f64 / 1024f64.powi(3);
    (available_gb < MEMORY_PRESSURE_THRESHOLD_GB, available_gb)
}

/// Available memory for the given device: CUDA VRAM via `probe` when on a
/// CUDA device, otherwise total system RAM (CPU and MPS share system RAM on
/// Apple Silicon's unified memory architecture).
pub fn get_available_memory_gb(device: DeviceType, probe: &dyn GpuMemoryProbe) -> f64 {
    if device == DeviceType::Cuda {
        if let Some(vram) = probe.cuda_total_memory_gb() {
            return vram;
        }
    }
    let mut sys = System::new();
    sys.refresh_memory();
    sys.total_memory() as f64 / 1024f64.powi(3)
}

/// Recommended sub-batch size for `total_pages`, clamped to a safe range.
/// CPU is memory-efficient but slow, so it's capped at a flat 32 regardless
/// of available memory; GPU devices budget half of available memory.
pub fn compute_safe_batch_size(total_pages: usize, available_memory_gb: f64, device: DeviceType) -> usize {
    if total_pages == 0 {
        return 0;
    }
    if device == DeviceType::Cpu {
        return total_pages.min(32);
    }

    let safe_memory = available_memory_gb * 0.5;
    let max_by_memory = (safe_memory / MEMORY_PER_PAGE_GB).floor().max(0.0) as usize;
    1.max(total_pages.min(max_by_memory).min(100))
}

/// A flagged page's origin, tracked so Engine-B's combined-batch output can
/// be mapped back to the correct source file and page.
#[derive(Debug, Clone)]
pub struct FlaggedPage {
    pub file_index: usize,
    pub page_number: usize,
    pub input_path: PathBuf,
    pub batch_index: usize,
}

/// Aggregate flagged pages from every file result into one ordered list,
/// assigning sequential batch indices for combined-PDF construction.
pub fn collect_flagged_pages(files: &[FileResult], input_paths: &BTreeMap<String, PathBuf>) -> Vec<FlaggedPage> {
    let mut pages = Vec::new();
    for (file_index, file) in files.iter().enumerate() {
        let Some(input_path) = input_paths.get(&file.filename) else {
            warn!(filename = %file.filename, "no input path recorded, skipping flagged pages");
            continue;
        };

        for page in file.flagged_pages() {
            pages.push(FlaggedPage {
                file_index,
                page_number: page.page_number,
                input_path: input_path.clone(),
                batch_index: pages.len(),
            });
        }
    }

    debug!(page_count = pages.len(), file_count = files.len(), "collected flagged pages for batching");
    pages
}

/// Build a single combined PDF containing each flagged page, in
/// `batch_index` order. Page order is load-bearing: Engine-B's output is
/// split back up assuming this exact ordering.
pub fn create_combined_pdf(flagged_pages: &[FlaggedPage], output_path: &Path) -> Result<()> {
    if flagged_pages.is_empty() {
        warn!("no flagged pages to combine, skipping pdf creation");
        return Ok(());
    }

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| OcrError::io("failed to create batch directory", parent, e))?;
    }

    let mut sorted = flagged_pages.to_vec();
    sorted.sort_by_key(|p| p.batch_index);

    let mut combined = Document::with_version("1.5");
    let mut next_id: u32 = 1;
    let mut all_objects: BTreeMap<ObjectId, Object> = BTreeMap::new();
    let mut kids = Vec::with_capacity(sorted.len());

    for page in &sorted {
        let mut source = Document::load(&page.input_path).map_err(|e| OcrError::Pdf {
            message: format!("failed to load {}", page.input_path.display()),
            path: Some(page.input_path.clone()),
            source: Some(Box::new(e)),
        })?;

        source.renumber_objects_with(next_id);
        next_id = source.max_id + 1;

        let pages = source.get_pages();
        let object_id = *pages.values().nth(page.page_number).ok_or_else(|| {
            OcrError::pdf(format!("page {} not found in {}", page.page_number, page.input_path.display()))
        })?;

        all_objects.extend(source.objects);
        kids.push(Object::Reference(object_id));
    }

    let pages_id = combined.new_object_id();
    for (id, mut object) in all_objects {
        if let Ok(dict) = object.as_dict_mut() {
            if dict.get(b"Type").and_then(Object::as_name).ok() == Some(b"Page") {
                dict.set("Parent", pages_id);
            }
        }
        combined.objects.insert(id, object);
    }

    combined.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => kids.len() as i64,
            "Kids" => kids,
        }),
    );

    let catalog_id = combined.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    combined.trailer.set("Root", catalog_id);
    combined.max_id = next_id;
    combined.renumber_objects();
    combined.compress();

    combined.save(output_path).map_err(|e| OcrError::Pdf {
        message: "failed to save combined pdf".to_string(),
        path: Some(output_path.to_path_buf()),
        source: Some(Box::new(e)),
    })?;

    debug!(page_count = sorted.len(), path = %output_path.display(), "created combined pdf");
    Ok(())
}

/// Chunk an ordered flagged-page list into memory-safe sub-batches sized by
/// [`compute_safe_batch_size`], re-assigning each page's `batch_index` to its
/// position *within* its sub-batch so combined-PDF construction and result
/// mapping stay correctly ordered per sub-batch.
pub fn split_into_batches(
    flagged_pages: &[FlaggedPage],
    available_memory_gb: f64,
    device: DeviceType,
) -> Vec<Vec<FlaggedPage>> {
    if flagged_pages.is_empty() {
        return Vec::new();
    }

    let batch_size = compute_safe_batch_size(flagged_pages.len(), available_memory_gb, device).max(1);
    flagged_pages
        .chunks(batch_size)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .map(|(i, p)| FlaggedPage { batch_index: i, ..p.clone() })
                .collect()
        })
        .collect()
}

/// Split Engine-B's markdown output into per-page text. Engine-B doesn't
/// emit explicit page markers, so this tries horizontal-rule separators,
/// then blank-line-run separators, and finally gives up and assigns
/// everything to the first page.
pub fn split_markdown_by_pages(markdown: &str, page_count: usize) -> Vec<String> {
    if page_count == 0 {
        return Vec::new();
    }
    if page_count == 1 {
        return vec![markdown.to_string()];
    }

    let hr = Regex::new(r"\n-{3,}\n").unwrap();
    let parts: Vec<&str> = hr.split(markdown).collect();
    if parts.len() >= page_count {
        return parts.into_iter().take(page_count).map(str::to_string).collect();
    }

    let blank_run = Regex::new(r"\n{3,}").unwrap();
    let parts: Vec<&str> = blank_run.split(markdown).collect();
    if parts.len() >= page_count {
        return parts.into_iter().take(page_count).map(str::to_string).collect();
    }

    let mut result = vec![markdown.to_string()];
    result.resize(page_count, String::new());
    result
}

/// Map Engine-B's combined output back onto each source file's pages,
/// rescoring each with `analyzer` and updating status/flagged in place.
pub fn map_results_to_files(
    flagged_pages: &[FlaggedPage],
    engine_b_text: &str,
    analyzer: &QualityAnalyzer,
    files: &mut [FileResult],
) {
    let page_texts = split_markdown_by_pages(engine_b_text, flagged_pages.len());

    for fp in flagged_pages {
        let text = &page_texts[fp.batch_index];
        let result = analyzer.analyze(text, None);

        let file = &mut files[fp.file_index];
        let page = &mut file.pages[fp.page_number];
        page.text = Some(text.clone());
        page.engine = Engine::EngineB;
        page.quality_score = result.composite_score;
        page.flagged = result.flagged;
        page.status = if result.flagged { PageStatus::Flagged } else { PageStatus::Good };
    }

    for file_index in flagged_pages.iter().map(|p| p.file_index).collect::<std::collections::BTreeSet<_>>() {
        files[file_index].recompute_rollups();
    }

    debug!(mapped = flagged_pages.len(), "mapped engine-b results back to source files");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_batch_size_is_capped_at_thirty_two() {
        assert_eq!(compute_safe_batch_size(200, 64.0, DeviceType::Cpu), 32);
        assert_eq!(compute_safe_batch_size(10, 64.0, DeviceType::Cpu), 10);
    }

    #[test]
    fn gpu_batch_size_scales_with_memory() {
        let small = compute_safe_batch_size(50, 8.0, DeviceType::Mps);
        let large = compute_safe_batch_size(50, 32.0, DeviceType::Mps);
        assert!(large > small);
        assert!(small >= 1);
    }

    #[test]
    fn zero_pages_needs_no_batch() {
        assert_eq!(compute_safe_batch_size(0, 32.0, DeviceType::Cuda), 0);
    }

    #[test]
    fn single_page_markdown_is_returned_whole() {
        let pages = split_markdown_by_pages("only page", 1);
        assert_eq!(pages, vec!["only page".to_string()]);
    }

    #[test]
    fn horizontal_rule_splits_are_preferred() {
        let pages = split_markdown_by_pages("page1\n---\npage2", 2);
        assert_eq!(pages, vec!["page1".to_string(), "page2".to_string()]);
    }

    #[test]
    fn no_separators_falls_back_to_first_page() {
        let pages = split_markdown_by_pages("no separators here", 3);
        assert_eq!(pages[0], "no separators here");
        assert_eq!(pages[1], "");
        assert_eq!(pages[2], "");
    }

    #[test]
    fn split_into_batches_covers_every_page_in_ceil_div_chunks() {
        let pages: Vec<FlaggedPage> = (0..50)
            .map(|i| FlaggedPage { file_index: 0, page_number: i, input_path: PathBuf::from("/tmp/a.pdf"), batch_index: i })
            .collect();

        // available_memory_gb=4.0, Gpu -> compute_safe_batch_size = floor(2.0/0.7) = 2
        let batches = split_into_batches(&pages, 4.0, DeviceType::Cuda);
        assert_eq!(batches.len(), 25);
        for batch in &batches {
            assert!(batch.len() <= 2);
        }
        let total: usize = batches.iter().map(|b| b.len()).sum();
        assert_eq!(total, 50);
    }

    #[test]
    fn split_into_batches_empty_input_yields_no_batches() {
        assert!(split_into_batches(&[], 32.0, DeviceType::Cpu).is_empty());
    }

    #[test]
    fn collect_flagged_pages_assigns_sequential_batch_indices() {
        use crate::types::{Engine as Eng, PageResult};

        let make_file = |name: &str| FileResult {
            filename: name.to_string(),
            success: true,
            engine: Eng::None,
            quality_score: 0.5,
            page_count: 1,
            pages: vec![PageResult {
                page_number: 0,
                status: PageStatus::Flagged,
                quality_score: 0.2,
                engine: Eng::None,
                flagged: true,
                text: None,
            }],
            error: None,
            time_seconds: 0.0,
            phase_timings: BTreeMap::new(),
            output_path: None,
        };

        let files = vec![make_file("a.pdf"), make_file("b.pdf")];
        let mut input_paths = BTreeMap::new();
        input_paths.insert("a.pdf".to_string(), PathBuf::from("/tmp/a.pdf"));
        input_paths.insert("b.pdf".to_string(), PathBuf::from("/tmp/b.pdf"));

        let flagged = collect_flagged_pages(&files, &input_paths);
        assert_eq!(flagged.len(), 2);
        assert_eq!(flagged[0].batch_index, 0);
        assert_eq!(flagged[1].batch_index, 1);
    }
}
