//! Ranking helpers for corpus search and document comparison, plus the
//! `query`, `search` and `compare` CLI commands.
//!
//! The helpers are pure functions over hits and index entries; the
//! coordinator fetches the data and these decide the order.

use anyhow::Result;
use std::collections::HashMap;

use crate::config::Config;
use crate::coordinator::RetrievalCoordinator;
use crate::embedding::{centroid, cosine_similarity};
use crate::models::{CorpusHit, DocumentGroup, IndexEntry, UniqueChunk};

/// Group corpus hits by document.
///
/// A document's score is its best chunk's score (MAX aggregation). Groups
/// come back best-first, ties broken by document id; chunks within a group
/// keep the order they arrived in.
pub fn group_by_document(hits: Vec<CorpusHit>) -> Vec<DocumentGroup> {
    let mut groups: Vec<DocumentGroup> = Vec::new();
    let mut slot: HashMap<String, usize> = HashMap::new();

    for hit in hits {
        let idx = *slot.entry(hit.document_id.clone()).or_insert_with(|| {
            groups.push(DocumentGroup {
                document_id: hit.document_id.clone(),
                max_similarity: f64::NEG_INFINITY,
                hit_count: 0,
                top_chunks: Vec::new(),
            });
            groups.len() - 1
        });
        let group = &mut groups[idx];
        group.max_similarity = group.max_similarity.max(hit.score);
        group.hit_count += 1;
        group.top_chunks.push(hit);
    }

    groups.sort_by(|a, b| {
        b.max_similarity
            .total_cmp(&a.max_similarity)
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
    groups
}

/// Cosine similarity of the two documents' chunk centroids.
///
/// Zero if either side has no entries.
pub fn overall_similarity(a: &[IndexEntry], b: &[IndexEntry]) -> f64 {
    let va: Vec<Vec<f32>> = a.iter().map(|e| e.vector.clone()).collect();
    let vb: Vec<Vec<f32>> = b.iter().map(|e| e.vector.clone()).collect();
    match (centroid(&va), centroid(&vb)) {
        (Some(ca), Some(cb)) => cosine_similarity(&ca, &cb) as f64,
        _ => 0.0,
    }
}

/// Chunks of `own` whose nearest neighbor in `other` scores below
/// `threshold`, most unique first (ties by ordinal), at most `max`.
pub fn unique_chunks(
    own: &[IndexEntry],
    other: &[IndexEntry],
    threshold: f64,
    max: usize,
) -> Vec<UniqueChunk> {
    let mut unique: Vec<UniqueChunk> = own
        .iter()
        .filter_map(|entry| {
            let nearest = other
                .iter()
                .map(|o| cosine_similarity(&entry.vector, &o.vector) as f64)
                .fold(f64::NEG_INFINITY, f64::max);
            // An empty counterpart leaves every chunk unmatched.
            let nearest = if nearest.is_finite() { nearest } else { 0.0 };
            (nearest < threshold).then(|| UniqueChunk {
                ordinal: entry.ordinal,
                text: entry.text.clone(),
                nearest_similarity: nearest,
            })
        })
        .collect();

    unique.sort_by(|a, b| {
        a.nearest_similarity
            .total_cmp(&b.nearest_similarity)
            .then(a.ordinal.cmp(&b.ordinal))
    });
    unique.truncate(max);
    unique
}

/// `luminary query <id> <question>`
pub async fn run_query(
    config: &Config,
    document_id: &str,
    question: &str,
    top_k: Option<usize>,
    json: bool,
) -> Result<()> {
    let coordinator = RetrievalCoordinator::open(config).await?;
    let response = coordinator
        .query_document(document_id, question, top_k.unwrap_or(config.retrieval.top_k))
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else if response.chunks.is_empty() {
        println!("No results.");
    } else {
        for (i, chunk) in response.chunks.iter().enumerate() {
            println!("{}. [{:.3}] chunk {}", i + 1, chunk.score, chunk.ordinal);
            println!("    {}", snippet(&chunk.text, 240));
            println!();
        }
    }

    coordinator.close().await;
    Ok(())
}

/// `luminary search <question> [--group]`
pub async fn run_search(
    config: &Config,
    question: &str,
    top_k: Option<usize>,
    group: bool,
    json: bool,
) -> Result<()> {
    if question.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let coordinator = RetrievalCoordinator::open(config).await?;
    let top_k = top_k.unwrap_or(config.retrieval.top_k);

    if group {
        let groups = coordinator.search_corpus_grouped(question, top_k).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&groups)?);
        } else if groups.is_empty() {
            println!("No results.");
        } else {
            for (i, g) in groups.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} ({} matching chunk{})",
                    i + 1,
                    g.max_similarity,
                    g.document_id,
                    g.hit_count,
                    if g.hit_count == 1 { "" } else { "s" }
                );
                if let Some(best) = g.top_chunks.first() {
                    println!("    {}", snippet(&best.text, 200));
                }
                println!();
            }
        }
    } else {
        let response = coordinator.search_corpus(question, top_k).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&response)?);
        } else if response.chunks.is_empty() {
            println!("No results.");
        } else {
            for (i, hit) in response.chunks.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} / chunk {}",
                    i + 1,
                    hit.score,
                    hit.document_id,
                    hit.ordinal
                );
                println!("    {}", snippet(&hit.text, 240));
                println!();
            }
        }
    }

    coordinator.close().await;
    Ok(())
}

/// `luminary compare <a> <b>`
pub async fn run_compare(config: &Config, a: &str, b: &str, json: bool) -> Result<()> {
    let coordinator = RetrievalCoordinator::open(config).await?;
    let report = coordinator.compare_documents(a, b).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Overall similarity: {:.3}", report.overall_similarity);
        for (label, chunks) in [
            (&report.document_a, &report.unique_to_a),
            (&report.document_b, &report.unique_to_b),
        ] {
            println!();
            println!("Unique to {} ({}):", label, chunks.len());
            for c in chunks {
                println!(
                    "  chunk {} [nearest {:.3}] {}",
                    c.ordinal,
                    c.nearest_similarity,
                    snippet(&c.text, 160)
                );
            }
        }
    }

    coordinator.close().await;
    Ok(())
}

/// First `max` characters on one line.
pub(crate) fn snippet(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max).collect();
        format!("{}…", cut.trim_end())
    }
}
