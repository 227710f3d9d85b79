//! Post-run reconciliation.
//!
//! Compares what the corpus contains against what the store holds, so gaps
//! (never-processed artifacts, degraded embeddings) are reported explicitly
//! instead of hiding behind a percentage. Pure read, no mutation.

use std::collections::HashMap;

use anyhow::{Context, Result};

use crate::lister::Lister;
use crate::models::EmbeddingQuality;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub corpus_id: String,
    pub generation: String,
    /// Artifacts currently in the corpus.
    pub corpus_size: usize,
    /// Corpus artifacts with a usable stored record.
    pub complete: usize,
    /// Corpus artifacts whose stored embedding is a flagged zero vector.
    pub degraded: usize,
    /// Natural keys with no usable record: never processed, or degraded.
    pub missing: Vec<String>,
}

impl ValidationReport {
    pub fn completion_pct(&self) -> f64 {
        if self.corpus_size == 0 {
            return 100.0;
        }
        (self.complete as f64 / self.corpus_size as f64) * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Enumerate the corpus and reconcile against stored records.
pub async fn validate(
    store: &dyn Store,
    lister: &dyn Lister,
    generation: &str,
) -> Result<ValidationReport> {
    let corpus_id = lister.corpus_id().to_string();

    let artifacts = lister
        .list()
        .await
        .with_context(|| format!("Failed to enumerate corpus '{}'", corpus_id))?;

    let stored: HashMap<String, EmbeddingQuality> = store
        .record_keys(&corpus_id, generation)
        .await
        .map_err(|e| anyhow::anyhow!("Store unreachable: {}", e))?
        .into_iter()
        .map(|k| (k.natural_key, k.embedding_quality))
        .collect();

    let mut complete = 0usize;
    let mut degraded = 0usize;
    let mut missing = Vec::new();

    for artifact in &artifacts {
        match stored.get(&artifact.natural_key).copied() {
            Some(EmbeddingQuality::Ok) => complete += 1,
            Some(EmbeddingQuality::Degraded) => {
                degraded += 1;
                missing.push(artifact.natural_key.clone());
            }
            None => missing.push(artifact.natural_key.clone()),
        }
    }

    Ok(ValidationReport {
        corpus_id,
        generation: generation.to_string(),
        corpus_size: artifacts.len(),
        complete,
        degraded,
        missing,
    })
}

pub fn print_report(report: &ValidationReport) {
    println!("validate {}", report.corpus_id);
    println!("  generation: {}", report.generation);
    println!("  corpus size: {}", report.corpus_size);
    println!(
        "  complete: {} ({:.1}%)",
        report.complete,
        report.completion_pct()
    );
    if report.degraded > 0 {
        println!("  degraded embeddings: {}", report.degraded);
    }
    if report.missing.is_empty() {
        println!("  missing: none");
    } else {
        println!("  missing: {}", report.missing.len());
        for key in &report.missing {
            println!("    {}", key);
        }
    }
}
