use tracing::{debug, warn};

use crate::ocr::error::OcrError;

/// Embedded text and page count pulled from a structured document.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeText {
    pub text: String,
    pub page_count: u32,
}

impl NativeText {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Fast path: read text a document already carries, without recognition.
pub trait NativeTextExtractor: Send + Sync {
    fn extract(&self, payload: &[u8]) -> Result<NativeText, OcrError>;
}

/// PDF text extraction with `lopdf`.
#[derive(Debug, Default, Clone)]
pub struct PdfTextExtractor;

impl PdfTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl NativeTextExtractor for PdfTextExtractor {
    fn extract(&self, payload: &[u8]) -> Result<NativeText, OcrError> {
        if !is_valid_pdf(payload) {
            return Err(OcrError::RecognitionFailed {
                details: "missing or corrupted PDF header".to_string(),
            });
        }

        let doc = lopdf::Document::load_mem(payload).map_err(|e| OcrError::RecognitionFailed {
            details: format!("failed to parse PDF: {}", e),
        })?;

        let pages = doc.get_pages();
        let mut text = String::new();
        for (page_num, _) in pages.iter() {
            match doc.extract_text(&[*page_num]) {
                Ok(page_text) => {
                    text.push_str(page_text.trim());
                    text.push('\n');
                }
                Err(e) => warn!("Could not extract text from PDF page {}: {}", page_num, e),
            }
        }

        let page_count = (pages.len() as u32).max(1);
        let text = text.trim().to_string();
        debug!("Native extraction: {} pages, {} chars", page_count, text.len());

        Ok(NativeText { text, page_count })
    }
}

/// Check for a `%PDF-` marker in the first 1KB. Some PDFs carry leading junk bytes.
pub fn is_valid_pdf(data: &[u8]) -> bool {
    if data.len() < 5 {
        return false;
    }

    let search_limit = data.len().min(1024);
    data[..search_limit].windows(5).any(|w| w == b"%PDF-")
}
