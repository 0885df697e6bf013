//! Thin wrapper over PDF page counting and text extraction.

use std::path::{Path, PathBuf};

use lopdf::Document;

use crate::error::{OcrError, Result};

/// A loaded PDF, lazily wrapping [`lopdf::Document`].
pub struct PdfFile {
    path: PathBuf,
    document: Document,
}

impl PdfFile {
    pub fn open(path: &Path) -> Result<Self> {
        let document = Document::load(path).map_err(|e| OcrError::Pdf {
            message: format!("failed to open {}", path.display()),
            path: Some(path.to_path_buf()),
            source: Some(Box::new(e)),
        })?;
        Ok(Self { path: path.to_path_buf(), document })
    }

    pub fn page_count(&self) -> usize {
        self.document.get_pages().len()
    }

    /// Extract embedded text for every page, in page order. A page with no
    /// extractable text yields an empty string rather than an error —
    /// that's the normal case for a scanned page awaiting OCR.
    pub fn extract_text_by_page(&self) -> Vec<String> {
        let page_numbers: Vec<u32> = (1..=self.page_count() as u32).collect();
        page_numbers
            .into_iter()
            .map(|n| self.document.extract_text(&[n]).unwrap_or_default())
            .collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
