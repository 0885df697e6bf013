//! Error taxonomy for the OCR pipeline.

use std::path::PathBuf;

/// Errors produced anywhere in the pipeline.
///
/// `Environment` is the one variant that carries a collection rather than a
/// single message: environment validation gathers every missing dependency
/// before failing, instead of stopping at the first one.
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("environment validation failed:\n{}", format_problems(.problems))]
    Environment { problems: Vec<String> },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("engine-a failed: {message}")]
    EngineA {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("engine-b failed: {message}")]
    EngineB {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("pdf error: {message}")]
    Pdf {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("batch planner error: {message}")]
    BatchPlanner { message: String },

    #[error("io error: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

fn format_problems(problems: &[String]) -> String {
    problems
        .iter()
        .map(|p| format!("  - {p}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl OcrError {
    pub fn io(message: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        OcrError::Io {
            message: message.into(),
            path: Some(path.into()),
            source: Some(Box::new(source)),
        }
    }

    pub fn pdf(message: impl Into<String>) -> Self {
        OcrError::Pdf {
            message: message.into(),
            path: None,
            source: None,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        OcrError::Configuration {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OcrError>;
