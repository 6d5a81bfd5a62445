//! Corpus statistics and index health overview (`luminary stats`).

use anyhow::Result;

use crate::config::Config;
use crate::coordinator::RetrievalCoordinator;
use crate::index::IndexHealth;
use crate::models::DocumentStatus;

/// Run the stats command: query the index and catalog and print a summary.
pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    let coordinator = RetrievalCoordinator::open(config).await?;
    let stats = coordinator.get_statistics().await?;
    let documents = coordinator.list_documents().await?;
    let health = coordinator.index_health().clone();
    let model = coordinator.embedder().model_name().to_string();
    coordinator.close().await;

    if json {
        let report = serde_json::json!({
            "statistics": stats,
            "index_health": health,
            "embedding_model": model,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let count = |status: DocumentStatus| documents.iter().filter(|d| d.status == status).count();
    let index_size = std::fs::metadata(&config.storage.index_path)
        .map(|m| m.len())
        .unwrap_or(0);
    let catalog_size = std::fs::metadata(&config.storage.catalog_path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Luminary Index Stats");
    println!("====================");
    println!();
    println!(
        "  Index:       {} ({})",
        config.storage.index_path.display(),
        format_bytes(index_size)
    );
    println!(
        "  Catalog:     {} ({})",
        config.storage.catalog_path.display(),
        format_bytes(catalog_size)
    );
    println!("  Model:       {}", model);
    match stats.dimension {
        Some(d) => println!("  Dimensions:  {}", d),
        None => println!("  Dimensions:  (not established)"),
    }
    println!();
    println!("  Indexed documents: {}", stats.total_documents);
    println!("  Indexed chunks:    {}", stats.total_chunks);
    println!(
        "  Catalog:           {} completed, {} failed, {} pending",
        count(DocumentStatus::Completed),
        count(DocumentStatus::Failed),
        count(DocumentStatus::Pending)
    );

    if let IndexHealth::Recovered {
        reason,
        quarantined,
    } = &health
    {
        println!();
        println!("  Index was rebuilt empty after corruption: {}", reason);
        if let Some(path) = quarantined {
            println!("  Corrupted file kept at: {}", path.display());
        }
        println!("  Run `luminary rebuild` to restore it from the catalog.");
    }
    println!();

    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
