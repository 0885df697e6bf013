//! Progress observation: the orchestrator emits events through an
//! [`Observer`], and always mirrors them into `tracing` regardless of
//! whether a caller-supplied observer is attached.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::ProcessingPhase;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: ProcessingPhase,
    pub current: usize,
    pub total: usize,
    pub filename: Option<String>,
    pub worker_id: Option<usize>,
    pub eta_seconds: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Starting,
    Running,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseEvent {
    pub phase: ProcessingPhase,
    pub status: PhaseStatus,
    pub files_count: usize,
    pub pages_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Loading,
    Loaded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEvent {
    pub model_name: String,
    pub status: ModelStatus,
    pub time_seconds: Option<f64>,
}

/// Receives progress/phase/model events from the orchestrator. Implementors
/// are called from worker threads, so they must be `Send + Sync`.
pub trait Observer: Send + Sync {
    fn on_progress(&self, _event: &ProgressEvent) {}
    fn on_phase(&self, _event: &PhaseEvent) {}
    fn on_model(&self, _event: &ModelEvent) {}
}

/// An observer that does nothing; the default when no caller-supplied
/// observer is attached.
pub struct NullObserver;

impl Observer for NullObserver {}

/// An observer that logs every event through `tracing` at debug/info level.
/// The orchestrator already does this unconditionally for every observer,
/// so this one is mostly useful for callers who want events on the wire
/// (e.g. a CLI progress bar) *and* in the log, without writing their own
/// logging logic.
pub struct LoggingObserver;

impl Observer for LoggingObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        debug!(phase = ?event.phase, current = event.current, total = event.total, filename = ?event.filename, "progress");
    }

    fn on_phase(&self, event: &PhaseEvent) {
        info!(phase = ?event.phase, status = ?event.status, files = event.files_count, pages = event.pages_count, "phase");
    }

    fn on_model(&self, event: &ModelEvent) {
        info!(model = %event.model_name, status = ?event.status, time_seconds = event.time_seconds, "model");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingObserver {
        progress_calls: AtomicUsize,
    }

    impl Observer for CountingObserver {
        fn on_progress(&self, _event: &ProgressEvent) {
            self.progress_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn null_observer_does_nothing_observable() {
        let observer = NullObserver;
        observer.on_progress(&ProgressEvent {
            phase: ProcessingPhase::Analysis,
            current: 1,
            total: 1,
            filename: None,
            worker_id: None,
            eta_seconds: None,
        });
    }

    #[test]
    fn custom_observer_receives_events() {
        let observer = CountingObserver { progress_calls: AtomicUsize::new(0) };
        observer.on_progress(&ProgressEvent {
            phase: ProcessingPhase::EngineA,
            current: 1,
            total: 2,
            filename: Some("a.pdf".to_string()),
            worker_id: Some(0),
            eta_seconds: None,
        });
        assert_eq!(observer.progress_calls.load(Ordering::SeqCst), 1);
    }
}
