//! Hybrid OCR pipeline core for scanned academic PDFs.
//!
//! Wires together the quality analyzer, text post-processor, device
//! selector, model cache, cross-file batch planner, and the two OCR engine
//! wrappers behind a two-phase orchestrator: a parallel per-file pass that
//! decides whether existing text is good enough or Engine-A must run, and a
//! sequential cross-file pass that batches every page still flagged through
//! Engine-B.
//!
//! The two OCR engines, the PDF library, and any GPU runtime are external
//! collaborators. This crate depends on them only through the narrow
//! [`engine_b::EngineBRuntime`], [`device::DeviceProbe`],
//! [`batch::GpuMemoryProbe`], and [`model_cache::GpuMemoryCleaner`] traits;
//! [`runtime`] ships the default subprocess-backed implementations.

pub mod analyzer;
pub mod batch;
pub mod config;
pub mod device;
pub mod diagnostics;
pub mod engine_a;
pub mod engine_b;
pub mod error;
pub mod model_cache;
pub mod output;
pub mod pdf;
pub mod pipeline;
pub mod postprocess;
pub mod runtime;
pub mod signals;
pub mod types;

pub use analyzer::{QualityAnalyzer, QualityResult, SignalFloors, GRAY_ZONE};
pub use config::PipelineConfig;
pub use error::{OcrError, Result};
pub use pipeline::callbacks::{ModelEvent, NullObserver, Observer, PhaseEvent, ProgressEvent};
pub use pipeline::Pipeline;
pub use types::{BatchResult, Engine, FileResult, PageResult, PageStatus};
