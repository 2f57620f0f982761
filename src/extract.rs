//! Page-level text extraction for uploaded documents (PDF, plain text).
//!
//! The extractor is a pure function of its input: bytes plus a format hint in,
//! an ordered list of 1-indexed [`Page`]s out.

use std::fmt;
use std::path::Path;
use thiserror::Error;

use crate::models::Page;

/// Page separator recognised in plain-text uploads.
const FORM_FEED: char = '\u{000C}';

/// Declared format of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    PlainText,
}

impl DocumentFormat {
    /// Lower-cased extension of `filename`, if any.
    pub fn extension(filename: &str) -> Option<String> {
        Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    /// Infer the format from a filename extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Option<Self> {
        match Self::extension(filename)?.as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "txt" => Some(DocumentFormat::PlainText),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentFormat::Pdf => write!(f, "pdf"),
            DocumentFormat::PlainText => write!(f, "txt"),
        }
    }
}

/// Extraction error. Extraction never panics; parser panics are caught and reported here.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("{0} document has no pages")]
    NoPages(DocumentFormat),
}

impl From<ExtractError> for crate::error::RagError {
    fn from(err: ExtractError) -> Self {
        crate::error::RagError::Extraction(err.to_string())
    }
}

/// Extract ordered pages from `bytes` interpreted as `format`.
pub fn extract_pages(bytes: &[u8], format: DocumentFormat) -> Result<Vec<Page>, ExtractError> {
    let texts = match format {
        DocumentFormat::Pdf => extract_pdf_pages(bytes)?,
        DocumentFormat::PlainText => split_text_pages(bytes),
    };

    if texts.is_empty() {
        return Err(ExtractError::NoPages(format));
    }

    Ok(texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| Page {
            number: i as u32 + 1,
            text,
        })
        .collect())
}

fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    // pdf-extract panics on some malformed font tables
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }));
    match result {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Pdf("parser panicked".to_string())),
    }
}

fn split_text_pages(bytes: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(bytes);
    if text.trim().is_empty() {
        return Vec::new();
    }
    text.split(FORM_FEED).map(|p| p.to_string()).collect()
}
