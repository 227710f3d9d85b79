//! Core data models used throughout semindex.
//!
//! These types represent the artifacts, analyses, records, and checkpoints
//! that flow through the batch-processing pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One unit of work produced by a lister.
///
/// Immutable once enumerated for a run: the pipeline reads the content and
/// hash at enumeration time and never re-reads the source mid-run.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Stable identifier, unique within a corpus (relative path, issue id).
    pub natural_key: String,
    /// Where the content came from (absolute path or source identifier).
    pub source_ref: String,
    /// Display name, when the source provides one.
    pub title: Option<String>,
    /// Full raw content at enumeration time.
    pub raw_content: String,
    /// SHA-256 hex digest of `raw_content`.
    pub content_hash: String,
    pub last_modified: DateTime<Utc>,
}

/// Where a stored analysis came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisOrigin {
    /// Produced by the external analysis service.
    Model,
    /// Produced by the deterministic fallback, no external call.
    Heuristic,
}

/// Structured semantic analysis of one artifact.
///
/// The list fields default to empty; `purpose` is the only required field.
/// Stored as JSON alongside the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredAnalysis {
    /// What the artifact is for, in prose. Never empty.
    pub purpose: String,
    /// Situations in which someone would reach for this artifact.
    #[serde(default)]
    pub use_cases: Vec<String>,
    /// Related concepts, free-form.
    #[serde(default)]
    pub concepts: Vec<String>,
    /// Common mistakes associated with the artifact.
    #[serde(default)]
    pub pitfalls: Vec<String>,
    pub origin: AnalysisOrigin,
}

/// Whether a stored embedding is usable for similarity search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingQuality {
    /// Real vector from the embedding service.
    Ok,
    /// Zero-vector substitute written after retries were exhausted.
    /// Downstream search must exclude these; a later run re-embeds them.
    Degraded,
}

impl EmbeddingQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingQuality::Ok => "ok",
            EmbeddingQuality::Degraded => "degraded",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "degraded" => EmbeddingQuality::Degraded,
            _ => EmbeddingQuality::Ok,
        }
    }
}

/// Persisted outcome for one artifact under one generation.
///
/// At most one record exists per (corpus, natural_key, generation). The
/// store enforces this with a conflict-resolving upsert, never
/// read-then-write.
#[derive(Debug, Clone)]
pub struct ProcessingRecord {
    pub natural_key: String,
    pub generation: String,
    /// Hash of the artifact at the time it was processed; drives future
    /// skip decisions.
    pub content_hash: String,
    pub source_ref: String,
    pub analysis: StructuredAnalysis,
    /// The exact string fed to the embedder, kept for debuggability.
    pub embedding_text: String,
    pub embedding: Vec<f32>,
    pub embedding_quality: EmbeddingQuality,
    /// Unix timestamp of the write.
    pub processed_at: i64,
}

/// Minimal stored state the change detector needs for a skip decision.
#[derive(Debug, Clone)]
pub struct RecordStatus {
    pub content_hash: String,
    pub embedding_quality: EmbeddingQuality,
}

/// Progress state for one corpus, overwritten after every batch.
///
/// One row per corpus. Loaded at pipeline start when resuming; retained
/// after the run for audit. Correctness never depends on trusting it:
/// pending work is recomputed from stored records each run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub corpus_id: String,
    pub generation: String,
    /// Monotonically increasing across the run.
    pub batch_id: i64,
    /// Append-only within a run.
    pub completed_keys: Vec<String>,
    /// A key may move from failed to completed on a later run.
    pub failed_keys: Vec<String>,
    /// Monotonically non-decreasing across the run.
    pub total_processed: i64,
    /// Unix timestamp of the last write.
    pub updated_at: i64,
}

impl Checkpoint {
    /// Zero-valued checkpoint for a corpus with no prior progress.
    pub fn new(corpus_id: &str, generation: &str) -> Self {
        Self {
            corpus_id: corpus_id.to_string(),
            generation: generation.to_string(),
            batch_id: 0,
            completed_keys: Vec::new(),
            failed_keys: Vec::new(),
            total_processed: 0,
            updated_at: 0,
        }
    }
}

/// SHA-256 hex digest of raw content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
