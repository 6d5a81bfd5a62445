//! Document lookup commands: `luminary get <id>` and `luminary list`.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::coordinator::RetrievalCoordinator;
use crate::models::DocumentRecord;

/// `luminary get <id>`: catalog record plus retained text.
pub async fn run_get(config: &Config, id: &str, json: bool) -> Result<()> {
    let coordinator = RetrievalCoordinator::open(config).await?;
    let doc = coordinator.get_document(id).await;
    coordinator.close().await;

    let doc = match doc? {
        Some(doc) => doc,
        None => bail!("document not found: {}", id),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    let r = &doc.record;
    println!("--- Document ---");
    println!("id:           {}", r.id);
    println!(
        "filename:     {}",
        r.filename.as_deref().unwrap_or("(none)")
    );
    println!("content_type: {}", r.content_type);
    println!("status:       {}", r.status.as_str());
    if let Some(stage) = r.failure_stage {
        println!("failed at:    {}", stage.as_str());
    }
    if let Some(ref reason) = r.failure_reason {
        println!("reason:       {}", reason);
    }
    println!("chunks:       {}", r.chunk_count);
    println!("characters:   {}", r.char_count);
    println!("words:        {}", r.word_count);
    println!("sha256:       {}", r.content_hash);
    println!("created_at:   {}", format_ts_iso(r.created_at));
    println!("updated_at:   {}", format_ts_iso(r.updated_at));
    println!();

    println!("--- Text ---");
    println!("{}", doc.text);

    Ok(())
}

/// `luminary list`
pub async fn run_list(config: &Config, json: bool) -> Result<()> {
    let coordinator = RetrievalCoordinator::open(config).await?;
    let docs = coordinator.list_documents().await;
    coordinator.close().await;
    let docs = docs?;

    if json {
        println!("{}", serde_json::to_string_pretty(&docs)?);
        return Ok(());
    }
    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    println!(
        "{:<40} {:<10} {:>7}   {}",
        "ID", "STATUS", "CHUNKS", "UPDATED"
    );
    println!("{}", "-".repeat(80));
    for d in &docs {
        println!(
            "{:<40} {:<10} {:>7}   {}",
            d.id,
            d.status.as_str(),
            d.chunk_count,
            format_ts_iso(d.updated_at)
        );
        if let Some(detail) = failure_detail(d) {
            println!("    {}", detail);
        }
    }
    Ok(())
}

fn failure_detail(d: &DocumentRecord) -> Option<String> {
    let stage = d.failure_stage?;
    Some(format!(
        "{}: {}",
        stage.as_str(),
        d.failure_reason.as_deref().unwrap_or("unknown")
    ))
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
