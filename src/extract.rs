//! Text extraction for uploaded documents (plain text, DOCX, PDF).
//!
//! Callers supply raw bytes, a declared content type, and optionally the
//! original filename. This module returns normalized UTF-8 text and never
//! touches storage.
//!
//! PDFs go through a staged fallback: the embedded text layer first, then
//! page OCR through an injected [`PageRecognizer`] when the text layer is
//! too sparse to be a real document. Each stage reports a [`StageOutcome`]
//! rather than failing, and only the final stage turns "not enough text"
//! into an error.

use std::io::Read;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ExtractionConfig;
use crate::ocr::{OcrError, PageRecognizer};

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
    /// Plain-text input is not valid UTF-8.
    #[error("input is not valid UTF-8 (invalid sequence at byte {offset})")]
    Encoding { offset: usize },
    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: u64 },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
    /// Text layer too sparse and OCR could not recover anything.
    #[error("image-only PDF ({pages} pages), {reason}")]
    ImageOnly { pages: usize, reason: String },
}

/// Document formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    PlainText,
    Pdf,
    Docx,
}

impl ContentKind {
    /// Resolve a declared content type to a format.
    ///
    /// Accepts MIME types (parameters such as `; charset=utf-8` are ignored)
    /// or bare extensions. A generic `application/octet-stream` (or an empty
    /// type) falls back to the filename's extension.
    pub fn resolve(content_type: &str, filename: Option<&str>) -> Result<Self, ExtractError> {
        let declared = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        if declared.is_empty() || declared == MIME_OCTET_STREAM {
            let ext = filename
                .and_then(|name| std::path::Path::new(name).extension())
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase());
            return match ext.as_deref().and_then(Self::from_token) {
                Some(kind) => Ok(kind),
                None => Err(ExtractError::UnsupportedContentType(format!(
                    "{} ({})",
                    if declared.is_empty() { MIME_OCTET_STREAM } else { &declared },
                    filename.unwrap_or("no filename")
                ))),
            };
        }

        Self::from_token(&declared)
            .ok_or_else(|| ExtractError::UnsupportedContentType(content_type.to_string()))
    }

    fn from_token(token: &str) -> Option<Self> {
        match token.trim_start_matches('.') {
            MIME_TEXT | MIME_MARKDOWN | "txt" | "text" | "md" | "markdown" => {
                Some(ContentKind::PlainText)
            }
            MIME_PDF | "pdf" => Some(ContentKind::Pdf),
            MIME_DOCX | "docx" => Some(ContentKind::Docx),
            _ => None,
        }
    }

    /// Canonical MIME type recorded in the catalog.
    pub fn mime(&self) -> &'static str {
        match self {
            ContentKind::PlainText => MIME_TEXT,
            ContentKind::Pdf => MIME_PDF,
            ContentKind::Docx => MIME_DOCX,
        }
    }
}

/// How the final text was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    Utf8,
    Docx,
    PdfTextLayer,
    Ocr,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Utf8 => "utf8",
            ExtractionMethod::Docx => "docx",
            ExtractionMethod::PdfTextLayer => "pdf_text_layer",
            ExtractionMethod::Ocr => "ocr",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Extracted {
    pub kind: ContentKind,
    pub text: String,
    pub method: ExtractionMethod,
}

/// Result of one stage of the PDF fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Text(String),
    Insufficient { reason: String },
}

#[derive(Debug, Clone, Copy)]
pub struct ExtractionSettings {
    /// Non-whitespace characters per page below which the text layer is
    /// treated as absent.
    pub min_chars_per_page: usize,
    pub max_upload_bytes: u64,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            min_chars_per_page: 50,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl From<&ExtractionConfig> for ExtractionSettings {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            min_chars_per_page: config.min_chars_per_page,
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}

/// Stateless extractor; safe to share across tasks.
#[derive(Clone)]
pub struct TextExtractor {
    settings: ExtractionSettings,
    recognizer: Arc<dyn PageRecognizer>,
}

impl TextExtractor {
    pub fn new(settings: ExtractionSettings, recognizer: Arc<dyn PageRecognizer>) -> Self {
        Self {
            settings,
            recognizer,
        }
    }

    pub fn settings(&self) -> &ExtractionSettings {
        &self.settings
    }

    /// Extract normalized text from `bytes`.
    ///
    /// Blocking: PDF parsing and OCR can take seconds. Async callers should
    /// run this on `spawn_blocking`.
    pub fn extract(
        &self,
        bytes: &[u8],
        content_type: &str,
        filename: Option<&str>,
    ) -> Result<Extracted, ExtractError> {
        if bytes.len() as u64 > self.settings.max_upload_bytes {
            return Err(ExtractError::TooLarge {
                size: bytes.len(),
                limit: self.settings.max_upload_bytes,
            });
        }

        let kind = ContentKind::resolve(content_type, filename)?;
        let (raw, method) = match kind {
            ContentKind::PlainText => (decode_utf8(bytes)?, ExtractionMethod::Utf8),
            ContentKind::Docx => (extract_docx(bytes)?, ExtractionMethod::Docx),
            ContentKind::Pdf => self.extract_pdf(bytes)?,
        };

        let text = normalize_text(&raw);
        debug!(
            kind = kind.mime(),
            method = method.as_str(),
            chars = text.chars().count(),
            "extracted text"
        );
        Ok(Extracted { kind, text, method })
    }

    fn extract_pdf(&self, bytes: &[u8]) -> Result<(String, ExtractionMethod), ExtractError> {
        let pages = pdf_page_count(bytes);

        match self.text_layer_stage(bytes, pages) {
            StageOutcome::Text(text) => return Ok((text, ExtractionMethod::PdfTextLayer)),
            StageOutcome::Insufficient { reason } => {
                debug!(pages, %reason, "PDF text layer insufficient, trying OCR");
            }
        }

        match self.ocr_stage(bytes) {
            StageOutcome::Text(text) => Ok((text, ExtractionMethod::Ocr)),
            StageOutcome::Insufficient { reason } => {
                warn!(pages, %reason, "OCR fallback produced no text");
                Err(ExtractError::ImageOnly { pages, reason })
            }
        }
    }

    fn text_layer_stage(&self, bytes: &[u8], pages: usize) -> StageOutcome {
        let text = match extract_pdf_text_layer(bytes) {
            Ok(text) => text,
            Err(e) => {
                return StageOutcome::Insufficient {
                    reason: format!("text layer unreadable: {}", e),
                }
            }
        };

        let visible = text.chars().filter(|c| !c.is_whitespace()).count();
        let required = self.settings.min_chars_per_page * pages.max(1);
        if visible < required {
            StageOutcome::Insufficient {
                reason: format!(
                    "text layer has {} characters, expected at least {}",
                    visible, required
                ),
            }
        } else {
            StageOutcome::Text(text)
        }
    }

    fn ocr_stage(&self, bytes: &[u8]) -> StageOutcome {
        match self.recognizer.recognize_pages(bytes) {
            Ok(pages) => {
                let text = pages
                    .iter()
                    .map(|p| p.trim())
                    .filter(|p| !p.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                if text.is_empty() {
                    StageOutcome::Insufficient {
                        reason: "optical character recognition found no text".to_string(),
                    }
                } else {
                    StageOutcome::Text(text)
                }
            }
            Err(OcrError::Unavailable(why)) => {
                debug!(backend = self.recognizer.name(), %why, "OCR unavailable");
                StageOutcome::Insufficient {
                    reason: "optical character recognition unavailable".to_string(),
                }
            }
            Err(e @ OcrError::Failed(_)) => StageOutcome::Insufficient {
                reason: e.to_string(),
            },
        }
    }
}

/// Strict UTF-8 decode with the byte-order mark stripped.
pub fn decode_utf8(bytes: &[u8]) -> Result<String, ExtractError> {
    let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let offset_base = bytes.len() - body.len();
    std::str::from_utf8(body)
        .map(str::to_string)
        .map_err(|e| ExtractError::Encoding {
            offset: offset_base + e.valid_up_to(),
        })
}

/// Trim each line, collapse runs of spaces and tabs, and collapse runs of
/// blank lines to a single blank line.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_blank = false;

    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            pending_blank = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
        }
        pending_blank = false;
        out.push_str(&collapsed);
    }
    out
}

fn pdf_page_count(bytes: &[u8]) -> usize {
    match lopdf::Document::load_mem(bytes) {
        Ok(doc) => doc.get_pages().len(),
        Err(e) => {
            debug!("lopdf could not load PDF for page count: {}", e);
            1
        }
    }
}

fn extract_pdf_text_layer(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed inputs; contain it as a stage failure.
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Pdf("parser panicked".to_string())),
    }
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Docx(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Docx(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    docx_body_text(&xml)
}

/// Walk `word/document.xml` in document order.
///
/// Paragraphs (`w:p`) end with a newline. Inside a table (`w:tbl`), each
/// cell's paragraphs are joined by spaces, cells are separated by ` | `,
/// and each row (`w:tr`) ends with a newline. Nested tables are flattened
/// into their enclosing cell.
fn docx_body_text(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut out = String::new();
    let mut paragraph = String::new();
    let mut in_text = false;
    let mut table_depth = 0usize;
    let mut row: Vec<String> = Vec::new();
    let mut cell = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"tbl" => table_depth += 1,
                b"tr" if table_depth == 1 => row.clear(),
                b"tc" if table_depth == 1 => cell.clear(),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => paragraph.push('\t'),
                b"br" | b"cr" => paragraph.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Docx(e.to_string()))?;
                paragraph.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = std::mem::take(&mut paragraph);
                    if table_depth > 0 {
                        let text = text.trim();
                        if !text.is_empty() {
                            if !cell.is_empty() {
                                cell.push(' ');
                            }
                            cell.push_str(text);
                        }
                    } else {
                        out.push_str(&text);
                        out.push('\n');
                    }
                }
                b"tc" if table_depth == 1 => row.push(std::mem::take(&mut cell)),
                b"tr" if table_depth == 1 => {
                    out.push_str(&row.join(" | "));
                    out.push('\n');
                    row.clear();
                }
                b"tbl" => table_depth = table_depth.saturating_sub(1),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
