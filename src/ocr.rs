//! Optical character recognition for image-only PDFs.
//!
//! The extractor only calls OCR when a PDF's text layer is too sparse. The
//! recognizer is injected as a [`PageRecognizer`] so tests can substitute a
//! fake and deployments without OCR tooling can opt out cleanly.
//!
//! Backends:
//!
//! - **`tesseract`**: [`TesseractRecognizer`] rasterizes pages with poppler's
//!   `pdftoppm` and recognizes each page with the `tesseract` CLI.
//! - **`disabled`**: [`UnavailableRecognizer`] always reports unavailable.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tracing::debug;

use crate::config::ExtractionConfig;
use crate::error::{Result, RetrievalError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OcrError {
    /// No OCR backend is installed or configured.
    #[error("optical character recognition unavailable ({0})")]
    Unavailable(String),
    /// The backend ran and failed.
    #[error("optical character recognition failed: {0}")]
    Failed(String),
}

/// Turns the pages of a PDF into text, one string per page in page order.
///
/// Implementations are synchronous; callers run them on a blocking thread.
pub trait PageRecognizer: Send + Sync {
    fn name(&self) -> &str;

    fn recognize_pages(&self, pdf: &[u8]) -> std::result::Result<Vec<String>, OcrError>;
}

/// Recognizer used when OCR is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableRecognizer;

impl PageRecognizer for UnavailableRecognizer {
    fn name(&self) -> &str {
        "disabled"
    }

    fn recognize_pages(&self, _pdf: &[u8]) -> std::result::Result<Vec<String>, OcrError> {
        Err(OcrError::Unavailable("disabled by configuration".to_string()))
    }
}

/// `pdftoppm` + `tesseract` command-line backend.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    language: String,
    dpi: u32,
}

impl TesseractRecognizer {
    pub fn new(language: impl Into<String>, dpi: u32) -> Self {
        Self {
            language: language.into(),
            dpi,
        }
    }

    fn rasterize(&self, pdf_path: &Path, out_dir: &Path) -> std::result::Result<Vec<PathBuf>, OcrError> {
        let prefix = out_dir.join("page");
        let output = Command::new("pdftoppm")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-png")
            .arg(pdf_path)
            .arg(&prefix)
            .output()
            .map_err(|e| spawn_error("pdftoppm", e))?;
        if !output.status.success() {
            return Err(OcrError::Failed(format!(
                "pdftoppm exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let mut pages: Vec<PathBuf> = std::fs::read_dir(out_dir)
            .map_err(|e| OcrError::Failed(e.to_string()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("png"))
            .collect();
        // pdftoppm zero-pads page numbers to the width of the page count,
        // so sort numerically rather than lexically.
        pages.sort_by_key(|p| page_number(p).unwrap_or(u32::MAX));
        Ok(pages)
    }

    fn recognize_image(&self, image: &Path) -> std::result::Result<String, OcrError> {
        let output = Command::new("tesseract")
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .output()
            .map_err(|e| spawn_error("tesseract", e))?;
        if !output.status.success() {
            return Err(OcrError::Failed(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl PageRecognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize_pages(&self, pdf: &[u8]) -> std::result::Result<Vec<String>, OcrError> {
        let dir = tempfile::tempdir().map_err(|e| OcrError::Failed(e.to_string()))?;
        let pdf_path = dir.path().join("input.pdf");
        std::fs::write(&pdf_path, pdf).map_err(|e| OcrError::Failed(e.to_string()))?;

        let pages = self.rasterize(&pdf_path, dir.path())?;
        debug!(pages = pages.len(), dpi = self.dpi, "rasterized PDF for OCR");

        let mut texts = Vec::with_capacity(pages.len());
        for page in &pages {
            texts.push(self.recognize_image(page)?);
        }
        Ok(texts)
    }
}

fn spawn_error(program: &str, err: std::io::Error) -> OcrError {
    if err.kind() == std::io::ErrorKind::NotFound {
        OcrError::Unavailable(format!("{} not installed", program))
    } else {
        OcrError::Failed(format!("{}: {}", program, err))
    }
}

/// `page-07.png` → 7.
fn page_number(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    stem.rsplit('-').next()?.parse().ok()
}

/// Create the recognizer selected by `[extraction] ocr`.
pub fn create_recognizer(config: &ExtractionConfig) -> Result<Arc<dyn PageRecognizer>> {
    match config.ocr.as_str() {
        "disabled" => Ok(Arc::new(UnavailableRecognizer)),
        "tesseract" => Ok(Arc::new(TesseractRecognizer::new(
            config.ocr_language.clone(),
            config.ocr_dpi,
        ))),
        other => Err(RetrievalError::InvalidInput(format!(
            "unknown OCR backend: '{}'. Use \"disabled\" or \"tesseract\".",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_number_parsing() {
        assert_eq!(page_number(Path::new("/tmp/x/page-1.png")), Some(1));
        assert_eq!(page_number(Path::new("/tmp/x/page-012.png")), Some(12));
        assert_eq!(page_number(Path::new("/tmp/x/cover.png")), None);
    }

    #[test]
    fn test_unavailable_recognizer() {
        let err = UnavailableRecognizer.recognize_pages(b"%PDF-1.4").unwrap_err();
        assert!(matches!(err, OcrError::Unavailable(_)));
        assert!(err.to_string().contains("unavailable"));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            OcrError::Unavailable("tesseract not installed".to_string()).to_string(),
            "optical character recognition unavailable (tesseract not installed)"
        );
        assert_eq!(
            OcrError::Failed("exit status 1".to_string()).to_string(),
            "optical character recognition failed: exit status 1"
        );
    }

    #[test]
    fn test_missing_binary_maps_to_unavailable() {
        let err = spawn_error(
            "pdftoppm",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        );
        assert_eq!(
            err,
            OcrError::Unavailable("pdftoppm not installed".to_string())
        );
    }

    #[test]
    fn test_create_recognizer_selects_backend() {
        let mut config = ExtractionConfig::default();
        assert_eq!(create_recognizer(&config).unwrap().name(), "disabled");

        config.ocr = "tesseract".to_string();
        assert_eq!(create_recognizer(&config).unwrap().name(), "tesseract");

        config.ocr = "cloud".to_string();
        assert!(create_recognizer(&config).is_err());
    }
}
