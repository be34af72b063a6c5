//! Leading-page text extraction.
//!
//! Only the first `max_pages` pages of a document are read. A document that
//! cannot be read is a normal outcome ([`ExtractionError`]), never a panic
//! that escapes: parsing runs on a blocking task and parser panics are
//! reported as [`ExtractionError::Corrupt`].

use std::path::Path;

use crate::error::ExtractionError;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";

/// Text taken from the head of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
    pub text: String,
    /// Total pages in the document (1 for plain text).
    pub page_count: usize,
    /// Pages actually read.
    pub pages_read: usize,
}

/// Content type from the file extension, or `None` if unsupported.
pub fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(MIME_PDF),
        "txt" | "md" => Some(MIME_TEXT),
        _ => None,
    }
}

/// Extract on a blocking task so parser panics stay contained.
pub async fn extract_async(
    bytes: Vec<u8>,
    content_type: Option<&'static str>,
    max_pages: usize,
) -> Result<ExtractedText, ExtractionError> {
    let joined =
        tokio::task::spawn_blocking(move || extract_text(&bytes, content_type, max_pages)).await;
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(ExtractionError::Corrupt(
            "parser panicked while reading document".to_string(),
        )),
        Err(e) => Err(ExtractionError::Corrupt(e.to_string())),
    }
}

pub fn extract_text(
    bytes: &[u8],
    content_type: Option<&str>,
    max_pages: usize,
) -> Result<ExtractedText, ExtractionError> {
    if bytes.is_empty() {
        return Err(ExtractionError::Empty);
    }
    match content_type {
        Some(MIME_PDF) => extract_pdf(bytes, max_pages),
        Some(MIME_TEXT) => extract_plain(bytes),
        Some(other) => Err(ExtractionError::Corrupt(format!(
            "unsupported content type: {}",
            other
        ))),
        None => Err(ExtractionError::Corrupt(
            "unsupported content type".to_string(),
        )),
    }
}

fn extract_plain(bytes: &[u8]) -> Result<ExtractedText, ExtractionError> {
    let text = String::from_utf8_lossy(bytes).into_owned();
    if text.trim().is_empty() {
        return Err(ExtractionError::Empty);
    }
    Ok(ExtractedText {
        text,
        page_count: 1,
        pages_read: 1,
    })
}

fn extract_pdf(bytes: &[u8], max_pages: usize) -> Result<ExtractedText, ExtractionError> {
    if !bytes.starts_with(b"%PDF") {
        return Err(ExtractionError::Corrupt("missing %PDF header".to_string()));
    }

    let mut doc = lopdf::Document::load_mem(bytes).map_err(|e| {
        let msg = e.to_string();
        let lower = msg.to_ascii_lowercase();
        if lower.contains("crypt") || lower.contains("password") {
            ExtractionError::Encrypted
        } else {
            ExtractionError::Corrupt(msg)
        }
    })?;

    let pages = doc.get_pages();
    let page_count = pages.len();
    if page_count == 0 {
        return Err(ExtractionError::Empty);
    }

    let head: Vec<u32> = pages.keys().copied().take(max_pages).collect();
    let mut text = doc.extract_text(&head).unwrap_or_default();

    if text.trim().is_empty() && doc.is_encrypted() {
        return Err(ExtractionError::Encrypted);
    }

    // lopdf cannot decode every font encoding; fall back to pdf-extract on a
    // copy cut down to the same leading pages.
    if text.trim().is_empty() {
        if let Some(head_bytes) = head_only(&mut doc, max_pages) {
            text = pdf_extract::extract_text_from_mem_by_pages(&head_bytes)
                .map(|by_page| by_page.join("\n"))
                .unwrap_or_default();
        }
    }

    if text.trim().is_empty() {
        return Err(ExtractionError::Empty);
    }

    Ok(ExtractedText {
        text,
        page_count,
        pages_read: head.len(),
    })
}

/// Serialize `doc` with every page after the first `max_pages` removed.
fn head_only(doc: &mut lopdf::Document, max_pages: usize) -> Option<Vec<u8>> {
    let tail: Vec<u32> = doc.get_pages().keys().copied().skip(max_pages).collect();
    if !tail.is_empty() {
        doc.delete_pages(&tail);
        doc.prune_objects();
    }
    let mut buf = Vec::new();
    match doc.save_to(&mut buf) {
        Ok(_) => Some(buf),
        Err(e) => {
            tracing::debug!(error = %e, "could not re-serialize leading pages");
            None
        }
    }
}

/// First line of plausible title length, else the filename stem.
pub fn guess_title(text: &str, filename: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| {
            let n = line.chars().count();
            n > 10 && n < 200
        })
        .map(str::to_string)
        .unwrap_or_else(|| {
            Path::new(filename)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
}

/// `zh` when CJK ideographs exceed 30% of the Latin letters, else `en`.
pub fn guess_language(text: &str) -> &'static str {
    let cjk = text
        .chars()
        .filter(|c| ('\u{4e00}'..='\u{9fff}').contains(c))
        .count();
    let latin = text.chars().filter(|c| c.is_ascii_alphabetic()).count();
    if cjk as f64 > latin as f64 * 0.3 {
        "zh"
    } else {
        "en"
    }
}
