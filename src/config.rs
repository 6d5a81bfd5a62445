use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// The index and the catalog live in their own SQLite files, separate from
/// any account or chat store.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub index_path: PathBuf,
    pub catalog_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: default_chunk_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_chunk_chars() -> usize {
    500
}
fn default_overlap_chars() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model name for the `local` provider.
    #[serde(default)]
    pub model: Option<String>,
    /// Vector size for the `hashing` provider. `local` models have fixed sizes.
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_provider() -> String {
    "hashing".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// A PDF whose text layer has fewer non-whitespace characters than this
    /// times its page count is treated as scanned and sent to OCR.
    #[serde(default = "default_min_chars_per_page")]
    pub min_chars_per_page: usize,
    #[serde(default = "default_ocr")]
    pub ocr: String,
    #[serde(default = "default_ocr_language")]
    pub ocr_language: String,
    #[serde(default = "default_ocr_dpi")]
    pub ocr_dpi: u32,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_chars_per_page: default_min_chars_per_page(),
            ocr: default_ocr(),
            ocr_language: default_ocr_language(),
            ocr_dpi: default_ocr_dpi(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_min_chars_per_page() -> usize {
    50
}
fn default_ocr() -> String {
    "disabled".to_string()
}
fn default_ocr_language() -> String {
    "eng".to_string()
}
fn default_ocr_dpi() -> u32 {
    300
}
fn default_max_upload_bytes() -> u64 {
    10 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Chunks whose best match in the other document scores below this are
    /// reported as unique by `compare`.
    #[serde(default = "default_unique_threshold")]
    pub unique_threshold: f64,
    #[serde(default = "default_max_unique_chunks")]
    pub max_unique_chunks: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            unique_threshold: default_unique_threshold(),
            max_unique_chunks: default_max_unique_chunks(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_unique_threshold() -> f64 {
    0.5
}
fn default_max_unique_chunks() -> usize {
    10
}

/// Directory ingestion filters (`luminary ingest <dir>`).
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.pdf".to_string(),
        "**/*.docx".to_string(),
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
    ]
}

impl Config {
    /// Default configuration storing both databases under `dir`.
    pub fn minimal(dir: &Path) -> Self {
        Self {
            storage: StorageConfig {
                index_path: dir.join("index.sqlite"),
                catalog_path: dir.join("catalog.sqlite"),
            },
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            extraction: ExtractionConfig::default(),
            retrieval: RetrievalConfig::default(),
            ingest: IngestConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        // Validate storage
        if self.storage.index_path == self.storage.catalog_path {
            anyhow::bail!("storage.index_path and storage.catalog_path must differ");
        }

        // Validate chunking
        if self.chunking.chunk_chars == 0 {
            anyhow::bail!("chunking.chunk_chars must be > 0");
        }
        if self.chunking.overlap_chars >= self.chunking.chunk_chars {
            anyhow::bail!(
                "chunking.overlap_chars ({}) must be smaller than chunking.chunk_chars ({})",
                self.chunking.overlap_chars,
                self.chunking.chunk_chars
            );
        }

        // Validate embedding
        match self.embedding.provider.as_str() {
            "hashing" | "local" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be hashing or local.",
                other
            ),
        }
        if self.embedding.dims == 0 {
            anyhow::bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }

        // Validate extraction
        match self.extraction.ocr.as_str() {
            "disabled" | "tesseract" => {}
            other => anyhow::bail!(
                "Unknown OCR backend: '{}'. Must be disabled or tesseract.",
                other
            ),
        }
        if self.extraction.max_upload_bytes == 0 {
            anyhow::bail!("extraction.max_upload_bytes must be > 0");
        }

        // Validate retrieval
        if self.retrieval.top_k < 1 {
            anyhow::bail!("retrieval.top_k must be >= 1");
        }
        if !(-1.0..=1.0).contains(&self.retrieval.unique_threshold) {
            anyhow::bail!("retrieval.unique_threshold must be in [-1.0, 1.0]");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
