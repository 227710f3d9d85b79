//! Batch-processing pipeline orchestration.
//!
//! Coordinates the full run: enumeration → change detection → batched
//! sequential processing (analyze → embed → upsert) → per-batch checkpoint →
//! end-of-run summary. Supports resume via checkpoints and is safely
//! interruptible between artifacts.
//!
//! Failure semantics: a single bad artifact never aborts the run; it is
//! recorded as failed and retried on the next run. Only fatal conditions
//! (corpus listing failure, unreachable store, a checkpoint write failing
//! twice) propagate to the caller.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::analysis::{embedding_text, heuristic_analysis, SemanticAnalyzer};
use crate::embedding::VectorEmbedder;
use crate::error::PipelineError;
use crate::lister::Lister;
use crate::models::{Artifact, Checkpoint, EmbeddingQuality, ProcessingRecord, RecordStatus};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::retry::RetryPolicy;
use crate::store::Store;

/// Everything a run needs, constructed once per run and passed by
/// reference to every component. No module-level state.
pub struct RunContext<'a> {
    pub store: &'a dyn Store,
    pub analyzer: &'a dyn SemanticAnalyzer,
    pub embedder: &'a dyn VectorEmbedder,
    /// Applied uniformly around both the analysis and the embedding call.
    pub retry: RetryPolicy,
    pub progress: &'a dyn ProgressReporter,
    /// Set by the SIGINT handler; checked between artifacts.
    pub cancel: Arc<AtomicBool>,
}

#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub corpus_id: String,
    pub generation: String,
    pub batch_size: usize,
    /// When false, ignore prior checkpoints and stored hashes and reprocess
    /// everything.
    pub resume: bool,
    /// Cap on pending artifacts processed this run.
    pub limit: Option<usize>,
    /// Enumerate and change-detect only; write nothing.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every pending artifact completed.
    Complete,
    /// The run finished but some artifacts failed; they stay pending.
    Partial,
    /// Interrupted between artifacts; progress is checkpointed.
    Interrupted,
}

/// End-of-run accounting.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub corpus_id: String,
    pub generation: String,
    /// Artifacts enumerated from the corpus.
    pub candidates: usize,
    /// Skipped as unchanged and complete.
    pub skipped: usize,
    /// Completed this run.
    pub processed: usize,
    /// Completed with a substituted zero vector.
    pub degraded: usize,
    /// Failed this run; retried next run.
    pub failed_keys: Vec<String>,
    /// Running total carried in the checkpoint.
    pub total_processed: i64,
    pub status: RunStatus,
}

impl RunSummary {
    /// Process exit code: 0 fully processed, 2 partial completion.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Complete => 0,
            RunStatus::Partial | RunStatus::Interrupted => 2,
        }
    }
}

/// Change-detection outcome for one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkDecision {
    Process,
    Skip,
}

/// Skip iff the stored hash matches and the stored embedding is usable.
///
/// A degraded record is reprocessed so a recovered embedding service can
/// repair it. Recomputing from actual stored state, never from checkpoint
/// counts, is what makes resume-after-crash indistinguishable from an
/// uninterrupted run.
pub fn decide(artifact: &Artifact, existing: Option<&RecordStatus>) -> WorkDecision {
    match existing {
        Some(status)
            if status.content_hash == artifact.content_hash
                && status.embedding_quality == EmbeddingQuality::Ok =>
        {
            WorkDecision::Skip
        }
        _ => WorkDecision::Process,
    }
}

/// Run the pipeline for one corpus.
pub async fn run_pipeline(
    ctx: &RunContext<'_>,
    lister: &dyn Lister,
    opts: &ProcessOptions,
) -> Result<RunSummary> {
    if opts.batch_size == 0 {
        anyhow::bail!("Batch size must be > 0");
    }

    ctx.progress.report(ProgressEvent::Enumerating {
        corpus: opts.corpus_id.clone(),
    });

    // Listing failure is fatal: nothing has been written yet.
    let mut artifacts = lister
        .list()
        .await
        .with_context(|| format!("Failed to enumerate corpus '{}'", opts.corpus_id))?;
    artifacts.sort_by(|a, b| a.natural_key.cmp(&b.natural_key));
    let candidates = artifacts.len();

    let mut checkpoint = if opts.resume {
        ctx.store
            .load_checkpoint(&opts.corpus_id)
            .await
            .map_err(|e| anyhow::anyhow!("Checkpoint store unreachable: {}", e))?
            .unwrap_or_else(|| Checkpoint::new(&opts.corpus_id, &opts.generation))
    } else {
        Checkpoint::new(&opts.corpus_id, &opts.generation)
    };

    // A checkpoint from a different generation's run carries no usable
    // progress for this one.
    if checkpoint.generation != opts.generation {
        checkpoint = Checkpoint::new(&opts.corpus_id, &opts.generation);
    }

    // Change detection against actual stored records.
    let mut pending = Vec::new();
    let mut skipped = 0usize;
    for artifact in artifacts {
        let existing = if opts.resume {
            ctx.store
                .get_record_status(&opts.corpus_id, &artifact.natural_key, &opts.generation)
                .await
                .map_err(|e| anyhow::anyhow!("Store unreachable: {}", e))?
        } else {
            None
        };
        match decide(&artifact, existing.as_ref()) {
            WorkDecision::Process => pending.push(artifact),
            WorkDecision::Skip => skipped += 1,
        }
    }

    if let Some(limit) = opts.limit {
        pending.truncate(limit);
    }

    if opts.dry_run {
        println!("process {} (dry-run)", opts.corpus_id);
        println!("  candidates: {}", candidates);
        println!("  skipped (unchanged): {}", skipped);
        println!("  pending: {}", pending.len());
        return Ok(RunSummary {
            corpus_id: opts.corpus_id.clone(),
            generation: opts.generation.clone(),
            candidates,
            skipped,
            processed: 0,
            degraded: 0,
            failed_keys: Vec::new(),
            total_processed: checkpoint.total_processed,
            status: RunStatus::Complete,
        });
    }

    let total_pending = pending.len();

    // Completed keys are append-only within a run; a previously-failed key
    // moves to completed once it succeeds.
    let mut completed: BTreeSet<String> = checkpoint.completed_keys.iter().cloned().collect();
    let mut failed: BTreeSet<String> = checkpoint.failed_keys.iter().cloned().collect();
    let mut failed_this_run: Vec<String> = Vec::new();
    let mut total_processed = checkpoint.total_processed;
    let mut batch_id = checkpoint.batch_id;
    let mut processed = 0usize;
    let mut degraded = 0usize;
    let mut done = 0u64;
    let mut interrupted = false;

    for batch in pending.chunks(opts.batch_size) {
        batch_id += 1;

        for artifact in batch {
            if ctx.cancel.load(Ordering::SeqCst) {
                interrupted = true;
                break;
            }

            match process_artifact(ctx, &opts.corpus_id, &opts.generation, artifact).await {
                Ok(quality) => {
                    completed.insert(artifact.natural_key.clone());
                    failed.remove(&artifact.natural_key);
                    total_processed += 1;
                    processed += 1;
                    if quality == EmbeddingQuality::Degraded {
                        degraded += 1;
                    }
                }
                Err(e) => {
                    eprintln!("Warning: {} failed: {}", artifact.natural_key, e);
                    failed.insert(artifact.natural_key.clone());
                    failed_this_run.push(artifact.natural_key.clone());
                }
            }

            done += 1;
            ctx.progress.report(ProgressEvent::Processing {
                corpus: opts.corpus_id.clone(),
                n: done,
                total: total_pending as u64,
            });
        }

        // Checkpoint at every batch boundary, whatever the per-artifact
        // outcomes were.
        checkpoint = Checkpoint {
            corpus_id: opts.corpus_id.clone(),
            generation: opts.generation.clone(),
            batch_id,
            completed_keys: completed.iter().cloned().collect(),
            failed_keys: failed.iter().cloned().collect(),
            total_processed,
            updated_at: Utc::now().timestamp(),
        };
        write_checkpoint(ctx.store, &checkpoint).await?;

        if interrupted {
            break;
        }
    }

    let status = if interrupted {
        RunStatus::Interrupted
    } else if !failed_this_run.is_empty() {
        RunStatus::Partial
    } else {
        RunStatus::Complete
    };

    let summary = RunSummary {
        corpus_id: opts.corpus_id.clone(),
        generation: opts.generation.clone(),
        candidates,
        skipped,
        processed,
        degraded,
        failed_keys: failed_this_run,
        total_processed,
        status,
    };
    print_summary(&summary);

    Ok(summary)
}

/// Process one artifact end to end. Returns the embedding quality of the
/// stored record, or a persistence error if the write failed.
///
/// The record handed to the store is always fully formed (analysis and
/// embedding both present), so an interruption can never leave half an
/// artifact behind.
async fn process_artifact(
    ctx: &RunContext<'_>,
    corpus_id: &str,
    generation: &str,
    artifact: &Artifact,
) -> Result<EmbeddingQuality, PipelineError> {
    let analysis = match ctx.retry.run(|| ctx.analyzer.analyze(artifact)).await {
        Ok(analysis) => analysis,
        Err(e) => {
            eprintln!(
                "Warning: analysis of {} failed ({}), using heuristic",
                artifact.natural_key, e
            );
            heuristic_analysis(artifact)
        }
    };

    let text = embedding_text(artifact, &analysis);

    let (embedding, quality) = match ctx.retry.run(|| ctx.embedder.embed(&text)).await {
        Ok(vector) => (vector, EmbeddingQuality::Ok),
        Err(e) => {
            // Explicit last resort: a flagged zero vector keeps the
            // pipeline moving; the record stays pending for repair.
            eprintln!(
                "Warning: embedding of {} failed ({}), storing degraded zero vector",
                artifact.natural_key, e
            );
            (vec![0.0; ctx.embedder.dims()], EmbeddingQuality::Degraded)
        }
    };

    let record = ProcessingRecord {
        natural_key: artifact.natural_key.clone(),
        generation: generation.to_string(),
        content_hash: artifact.content_hash.clone(),
        source_ref: artifact.source_ref.clone(),
        analysis,
        embedding_text: text,
        embedding,
        embedding_quality: quality,
        processed_at: Utc::now().timestamp(),
    };

    ctx.store.upsert_record(corpus_id, &record).await?;
    Ok(quality)
}

/// One retry, then abort the run. Progress since the last successful
/// checkpoint is stored but unrecorded.
async fn write_checkpoint(store: &dyn Store, checkpoint: &Checkpoint) -> Result<()> {
    if let Err(first) = store.save_checkpoint(checkpoint).await {
        eprintln!("Warning: checkpoint write failed, retrying: {}", first);
        store.save_checkpoint(checkpoint).await.map_err(|e| {
            anyhow::anyhow!(
                "Checkpoint write failed twice: {} (stored records are intact; rerun to resume)",
                e
            )
        })?;
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("process {}", summary.corpus_id);
    println!("  generation: {}", summary.generation);
    println!("  candidates: {}", summary.candidates);
    println!("  skipped (unchanged): {}", summary.skipped);
    println!("  processed: {}", summary.processed);
    if summary.degraded > 0 {
        println!("  degraded embeddings: {}", summary.degraded);
    }
    println!("  failed: {}", summary.failed_keys.len());
    for key in &summary.failed_keys {
        println!("    {}", key);
    }
    println!("  total processed: {}", summary.total_processed);
    let attempted = summary.processed + summary.failed_keys.len();
    if attempted > 0 {
        println!(
            "  success rate: {}%",
            (summary.processed * 100) / attempted
        );
    }
    match summary.status {
        RunStatus::Complete => println!("ok"),
        RunStatus::Partial => println!("partial"),
        RunStatus::Interrupted => println!("interrupted"),
    }
}
