//! Directory scanning for batch ingestion (`luminary ingest <dir>`).

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::IngestConfig;
use crate::coordinator::Upload;

/// A file selected for ingestion, not yet read.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    /// Path relative to the scan root with `/` separators; used as the
    /// document id.
    pub relative: String,
}

impl ScannedFile {
    /// Read the file into an [`Upload`]. The content type is the file
    /// extension; the extractor resolves it.
    pub fn load(&self) -> Result<Upload> {
        let bytes = std::fs::read(&self.path)?;
        let content_type = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(|| crate::extract::MIME_OCTET_STREAM.to_string());
        let filename = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string());

        Ok(Upload {
            document_id: self.relative.clone(),
            filename,
            content_type,
            bytes,
        })
    }
}

pub fn scan_directory(root: &Path, config: &IngestConfig) -> Result<Vec<ScannedFile>> {
    if !root.is_dir() {
        bail!("Ingest root is not a directory: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/~$*".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        // Apply exclude patterns
        if exclude_set.is_match(&rel_str) {
            continue;
        }

        // Apply include patterns
        if !include_set.is_match(&rel_str) {
            continue;
        }

        files.push(ScannedFile {
            path: path.to_path_buf(),
            relative: rel_str,
        });
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.relative.cmp(&b.relative));

    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
