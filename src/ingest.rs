//! Ingestion commands: `add`, `ingest`, `delete`, `rebuild`, `reset`.
//!
//! Thin CLI wrappers over [`RetrievalCoordinator`]. Human-readable output
//! goes to stdout; `--json` prints the serialized results instead.

use anyhow::{bail, Result};
use std::path::Path;

use crate::config::Config;
use crate::connector_fs;
use crate::coordinator::{RetrievalCoordinator, Upload};
use crate::models::IngestionResult;

/// `luminary add <path> [--id] [--content-type]`
pub async fn run_add(
    config: &Config,
    path: &Path,
    id: Option<String>,
    content_type: Option<String>,
    json: bool,
) -> Result<()> {
    if !path.is_file() {
        bail!("Not a file: {}", path.display());
    }
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let content_type = content_type.unwrap_or_else(|| {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(|| crate::extract::MIME_OCTET_STREAM.to_string())
    });
    let upload = Upload {
        document_id: id.unwrap_or_else(|| filename.clone()),
        filename: Some(filename),
        content_type,
        bytes: std::fs::read(path)?,
    };

    let coordinator = RetrievalCoordinator::open(config).await?;
    let result = coordinator.ingest(upload).await;
    coordinator.close().await;
    let result = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    if !result.is_completed() {
        bail!(
            "ingestion of '{}' failed at {}",
            result.document_id,
            result.stage.as_str()
        );
    }
    Ok(())
}

/// `luminary ingest <dir>`: add every matching file, continuing past failures.
pub async fn run_ingest_dir(config: &Config, dir: &Path, json: bool) -> Result<()> {
    let files = connector_fs::scan_directory(dir, &config.ingest)?;
    let coordinator = RetrievalCoordinator::open(config).await?;

    let mut results: Vec<IngestionResult> = Vec::with_capacity(files.len());
    let mut errors: Vec<(String, String)> = Vec::new();
    for file in &files {
        let upload = match file.load() {
            Ok(upload) => upload,
            Err(e) => {
                errors.push((file.relative.clone(), e.to_string()));
                continue;
            }
        };
        match coordinator.ingest(upload).await {
            Ok(result) => {
                if !json {
                    print_result(&result);
                }
                results.push(result);
            }
            Err(e) => errors.push((file.relative.clone(), e.to_string())),
        }
    }
    coordinator.close().await;

    let completed = results.iter().filter(|r| r.is_completed()).count();
    let unchanged = results.iter().filter(|r| r.unchanged).count();
    let failed = results.len() - completed + errors.len();

    if json {
        let report = serde_json::json!({
            "root": dir.display().to_string(),
            "files": files.len(),
            "results": results,
            "errors": errors
                .iter()
                .map(|(id, e)| serde_json::json!({"document_id": id, "error": e}))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for (id, e) in &errors {
            println!("  {}: error: {}", id, e);
        }
        println!("ingest {}", dir.display());
        println!("  files found: {}", files.len());
        println!("  completed: {} ({} unchanged)", completed, unchanged);
        println!("  failed: {}", failed);
        println!("ok");
    }
    Ok(())
}

/// `luminary delete <id>`
pub async fn run_delete(config: &Config, id: &str, json: bool) -> Result<()> {
    let coordinator = RetrievalCoordinator::open(config).await?;
    let result = coordinator.delete_document(id).await;
    coordinator.close().await;
    let result = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "deleted {} ({} chunk{} removed)",
            result.document_id,
            result.removed_count,
            if result.removed_count == 1 { "" } else { "s" }
        );
    }
    Ok(())
}

/// `luminary rebuild`
pub async fn run_rebuild(config: &Config, json: bool) -> Result<()> {
    let coordinator = RetrievalCoordinator::open(config).await?;
    let report = coordinator.rebuild_index().await;
    coordinator.close().await;
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("rebuild");
        println!("  documents: {}", report.documents);
        println!("  chunks: {}", report.chunks);
        for id in &report.failed {
            println!("  failed: {}", id);
        }
        println!("ok");
    }
    Ok(())
}

/// `luminary reset --yes`
pub async fn run_reset(config: &Config, confirmed: bool) -> Result<()> {
    if !confirmed {
        bail!("reset removes every indexed document; pass --yes to confirm");
    }
    let coordinator = RetrievalCoordinator::open(config).await?;
    let result = coordinator.reset().await;
    coordinator.close().await;
    result?;
    println!("reset ok");
    Ok(())
}

fn print_result(result: &IngestionResult) {
    if result.unchanged {
        println!("  {}: unchanged ({} chunks)", result.document_id, result.chunk_count);
    } else if result.is_completed() {
        println!("  {}: completed ({} chunks)", result.document_id, result.chunk_count);
    } else {
        println!(
            "  {}: failed at {}: {}",
            result.document_id,
            result.stage.as_str(),
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
}
