//! End-to-end pipeline scenarios with stub collaborators.
//!
//! These tests drive the real scheduler, change detector, and stores with
//! programmable analyzers/embedders so retry, fallback, resume, and failure
//! paths can be exercised without any network or external service.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use semindex::analysis::SemanticAnalyzer;
use semindex::embedding::VectorEmbedder;
use semindex::error::PipelineError;
use semindex::lister::Lister;
use semindex::models::{
    content_hash, AnalysisOrigin, Artifact, Checkpoint, EmbeddingQuality, ProcessingRecord,
    RecordStatus, StructuredAnalysis,
};
use semindex::pipeline::{run_pipeline, ProcessOptions, RunContext, RunStatus};
use semindex::progress::NoProgress;
use semindex::retry::RetryPolicy;
use semindex::store::{InMemoryStore, SqliteStore, Store, StoredKey};
use semindex::validate::validate;

const DIMS: usize = 8;

fn artifact(key: &str, content: &str) -> Artifact {
    Artifact {
        natural_key: key.to_string(),
        source_ref: format!("/corpus/{}", key),
        title: None,
        raw_content: content.to_string(),
        content_hash: content_hash(content),
        last_modified: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
    }
}

fn corpus_of(n: usize) -> Vec<Artifact> {
    (0..n)
        .map(|i| artifact(&format!("src/m{:02}.py", i), &format!("def f{}(): pass", i)))
        .collect()
}

struct StaticLister {
    corpus_id: String,
    artifacts: Vec<Artifact>,
}

impl StaticLister {
    fn new(artifacts: Vec<Artifact>) -> Self {
        Self {
            corpus_id: "modules".to_string(),
            artifacts,
        }
    }
}

#[async_trait]
impl Lister for StaticLister {
    fn corpus_id(&self) -> &str {
        &self.corpus_id
    }

    async fn list(&self) -> anyhow::Result<Vec<Artifact>> {
        let mut items = self.artifacts.clone();
        items.sort_by(|a, b| a.natural_key.cmp(&b.natural_key));
        Ok(items)
    }
}

#[derive(Clone, Copy)]
enum AnalyzerBehavior {
    Succeed,
    FailTransient,
    FailInvalid,
}

struct StubAnalyzer {
    behavior: AnalyzerBehavior,
    calls: AtomicUsize,
}

impl StubAnalyzer {
    fn new(behavior: AnalyzerBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SemanticAnalyzer for StubAnalyzer {
    fn name(&self) -> &str {
        "stub"
    }

    async fn analyze(&self, artifact: &Artifact) -> Result<StructuredAnalysis, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            AnalyzerBehavior::Succeed => Ok(StructuredAnalysis {
                purpose: format!("Service analysis of {}", artifact.natural_key),
                use_cases: vec!["testing".to_string()],
                concepts: vec![],
                pitfalls: vec![],
                origin: AnalysisOrigin::Model,
            }),
            AnalyzerBehavior::FailTransient => {
                Err(PipelineError::Transient("simulated timeout".into()))
            }
            AnalyzerBehavior::FailInvalid => {
                Err(PipelineError::InvalidResponse("simulated bad structure".into()))
            }
        }
    }
}

struct StubEmbedder {
    fail: bool,
    calls: AtomicUsize,
}

impl StubEmbedder {
    fn new(fail: bool) -> Self {
        Self {
            fail,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorEmbedder for StubEmbedder {
    fn model_name(&self) -> &str {
        "stub-embed"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(PipelineError::Transient("simulated embed outage".into()))
        } else {
            Ok(vec![0.25; DIMS])
        }
    }
}

/// Store wrapper that fails upserts for one key, delegating everything else.
struct FailKeyStore {
    inner: Arc<InMemoryStore>,
    fail_key: Option<String>,
}

#[async_trait]
impl Store for FailKeyStore {
    async fn upsert_record(
        &self,
        corpus_id: &str,
        record: &ProcessingRecord,
    ) -> Result<(), PipelineError> {
        if self.fail_key.as_deref() == Some(record.natural_key.as_str()) {
            return Err(PipelineError::Persistence("simulated write failure".into()));
        }
        self.inner.upsert_record(corpus_id, record).await
    }

    async fn get_record_status(
        &self,
        corpus_id: &str,
        natural_key: &str,
        generation: &str,
    ) -> Result<Option<RecordStatus>, PipelineError> {
        self.inner
            .get_record_status(corpus_id, natural_key, generation)
            .await
    }

    async fn record_keys(
        &self,
        corpus_id: &str,
        generation: &str,
    ) -> Result<Vec<StoredKey>, PipelineError> {
        self.inner.record_keys(corpus_id, generation).await
    }

    async fn load_checkpoint(&self, corpus_id: &str) -> Result<Option<Checkpoint>, PipelineError> {
        self.inner.load_checkpoint(corpus_id).await
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), PipelineError> {
        self.inner.save_checkpoint(checkpoint).await
    }
}

/// Store wrapper recording `total_processed` at each checkpoint write.
struct RecordingStore {
    inner: Arc<InMemoryStore>,
    totals: Mutex<Vec<i64>>,
}

#[async_trait]
impl Store for RecordingStore {
    async fn upsert_record(
        &self,
        corpus_id: &str,
        record: &ProcessingRecord,
    ) -> Result<(), PipelineError> {
        self.inner.upsert_record(corpus_id, record).await
    }

    async fn get_record_status(
        &self,
        corpus_id: &str,
        natural_key: &str,
        generation: &str,
    ) -> Result<Option<RecordStatus>, PipelineError> {
        self.inner
            .get_record_status(corpus_id, natural_key, generation)
            .await
    }

    async fn record_keys(
        &self,
        corpus_id: &str,
        generation: &str,
    ) -> Result<Vec<StoredKey>, PipelineError> {
        self.inner.record_keys(corpus_id, generation).await
    }

    async fn load_checkpoint(&self, corpus_id: &str) -> Result<Option<Checkpoint>, PipelineError> {
        self.inner.load_checkpoint(corpus_id).await
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), PipelineError> {
        self.totals.lock().unwrap().push(checkpoint.total_processed);
        self.inner.save_checkpoint(checkpoint).await
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        initial_delay: Duration::from_millis(1),
        multiplier: 2,
    }
}

fn opts(batch_size: usize) -> ProcessOptions {
    ProcessOptions {
        corpus_id: "modules".to_string(),
        generation: "v1".to_string(),
        batch_size,
        resume: true,
        limit: None,
        dry_run: false,
    }
}

struct Harness<'a> {
    ctx: RunContext<'a>,
}

fn harness<'a>(
    store: &'a dyn Store,
    analyzer: &'a StubAnalyzer,
    embedder: &'a StubEmbedder,
    progress: &'a NoProgress,
) -> Harness<'a> {
    Harness {
        ctx: RunContext {
            store,
            analyzer,
            embedder,
            retry: fast_retry(),
            progress,
            cancel: Arc::new(AtomicBool::new(false)),
        },
    }
}

#[tokio::test]
async fn full_run_stores_all_records_and_checkpoints() {
    let store = InMemoryStore::new();
    let analyzer = StubAnalyzer::new(AnalyzerBehavior::Succeed);
    let embedder = StubEmbedder::new(false);
    let progress = NoProgress;
    let h = harness(&store, &analyzer, &embedder, &progress);
    let lister = StaticLister::new(corpus_of(10));

    let summary = run_pipeline(&h.ctx, &lister, &opts(3)).await.unwrap();

    assert_eq!(summary.candidates, 10);
    assert_eq!(summary.processed, 10);
    assert_eq!(summary.status, RunStatus::Complete);
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(store.record_count(), 10);

    // Batches of 3,3,3,1.
    let checkpoint = store.load_checkpoint("modules").await.unwrap().unwrap();
    assert_eq!(checkpoint.batch_id, 4);
    assert_eq!(checkpoint.total_processed, 10);
    assert_eq!(checkpoint.completed_keys.len(), 10);
    assert!(checkpoint.failed_keys.is_empty());
}

#[tokio::test]
async fn second_run_over_unchanged_corpus_skips_everything() {
    let store = InMemoryStore::new();
    let progress = NoProgress;
    let artifacts = corpus_of(10);

    let analyzer = StubAnalyzer::new(AnalyzerBehavior::Succeed);
    let embedder = StubEmbedder::new(false);
    let h = harness(&store, &analyzer, &embedder, &progress);
    let lister = StaticLister::new(artifacts.clone());
    run_pipeline(&h.ctx, &lister, &opts(3)).await.unwrap();
    assert_eq!(analyzer.calls(), 10);
    assert_eq!(embedder.calls(), 10);

    // Fresh stubs so invocation counts isolate the second run.
    let analyzer2 = StubAnalyzer::new(AnalyzerBehavior::Succeed);
    let embedder2 = StubEmbedder::new(false);
    let h2 = harness(&store, &analyzer2, &embedder2, &progress);
    let summary = run_pipeline(&h2.ctx, &lister, &opts(3)).await.unwrap();

    assert_eq!(summary.skipped, 10);
    assert_eq!(summary.processed, 0);
    assert_eq!(analyzer2.calls(), 0);
    assert_eq!(embedder2.calls(), 0);
    assert_eq!(store.record_count(), 10);
}

#[tokio::test]
async fn resume_after_interruption_converges_to_full_coverage() {
    let store = InMemoryStore::new();
    let progress = NoProgress;
    let artifacts = corpus_of(10);
    let lister = StaticLister::new(artifacts);

    // Simulated crash after two batches: only 6 artifacts processed.
    let analyzer = StubAnalyzer::new(AnalyzerBehavior::Succeed);
    let embedder = StubEmbedder::new(false);
    let h = harness(&store, &analyzer, &embedder, &progress);
    let mut partial = opts(3);
    partial.limit = Some(6);
    run_pipeline(&h.ctx, &lister, &partial).await.unwrap();

    let checkpoint = store.load_checkpoint("modules").await.unwrap().unwrap();
    assert_eq!(checkpoint.total_processed, 6);
    assert_eq!(checkpoint.batch_id, 2);
    assert_eq!(store.record_count(), 6);

    // Restart: pending is recomputed from stored state, not the checkpoint.
    let analyzer2 = StubAnalyzer::new(AnalyzerBehavior::Succeed);
    let embedder2 = StubEmbedder::new(false);
    let h2 = harness(&store, &analyzer2, &embedder2, &progress);
    let summary = run_pipeline(&h2.ctx, &lister, &opts(3)).await.unwrap();

    assert_eq!(summary.skipped, 6);
    assert_eq!(summary.processed, 4);
    assert_eq!(analyzer2.calls(), 4);

    let checkpoint = store.load_checkpoint("modules").await.unwrap().unwrap();
    assert_eq!(checkpoint.total_processed, 10);
    assert_eq!(checkpoint.completed_keys.len(), 10);
    assert_eq!(store.record_count(), 10);
}

#[tokio::test]
async fn failing_analyzer_is_retried_then_falls_back_to_heuristic() {
    let store = InMemoryStore::new();
    let analyzer = StubAnalyzer::new(AnalyzerBehavior::FailTransient);
    let embedder = StubEmbedder::new(false);
    let progress = NoProgress;
    let h = harness(&store, &analyzer, &embedder, &progress);
    let lister = StaticLister::new(corpus_of(1));

    let summary = run_pipeline(&h.ctx, &lister, &opts(5)).await.unwrap();

    // Exactly max_retries attempts, then the heuristic takes over.
    assert_eq!(analyzer.calls(), 3);
    assert_eq!(summary.processed, 1);
    assert!(summary.failed_keys.is_empty());
    assert_eq!(summary.status, RunStatus::Complete);

    let record = store.get_record("modules", "src/m00.py", "v1").unwrap();
    assert_eq!(record.analysis.origin, AnalysisOrigin::Heuristic);
    assert_eq!(record.embedding_quality, EmbeddingQuality::Ok);
}

#[tokio::test]
async fn invalid_analyzer_response_falls_back_without_retrying() {
    let store = InMemoryStore::new();
    let analyzer = StubAnalyzer::new(AnalyzerBehavior::FailInvalid);
    let embedder = StubEmbedder::new(false);
    let progress = NoProgress;
    let h = harness(&store, &analyzer, &embedder, &progress);
    let lister = StaticLister::new(corpus_of(1));

    run_pipeline(&h.ctx, &lister, &opts(5)).await.unwrap();

    assert_eq!(analyzer.calls(), 1);
    let record = store.get_record("modules", "src/m00.py", "v1").unwrap();
    assert_eq!(record.analysis.origin, AnalysisOrigin::Heuristic);
}

#[tokio::test]
async fn embedding_outage_stores_flagged_zero_vector_then_repairs() {
    let store = InMemoryStore::new();
    let progress = NoProgress;
    let lister = StaticLister::new(corpus_of(1));

    let analyzer = StubAnalyzer::new(AnalyzerBehavior::Succeed);
    let embedder = StubEmbedder::new(true);
    let h = harness(&store, &analyzer, &embedder, &progress);
    let summary = run_pipeline(&h.ctx, &lister, &opts(5)).await.unwrap();

    // Still completed: a degraded record never stalls the run.
    assert_eq!(embedder.calls(), 3);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.degraded, 1);
    assert_eq!(summary.status, RunStatus::Complete);

    let record = store.get_record("modules", "src/m00.py", "v1").unwrap();
    assert_eq!(record.embedding_quality, EmbeddingQuality::Degraded);
    assert_eq!(record.embedding, vec![0.0; DIMS]);

    // Service recovered: the degraded record is pending again and repaired.
    let analyzer2 = StubAnalyzer::new(AnalyzerBehavior::Succeed);
    let embedder2 = StubEmbedder::new(false);
    let h2 = harness(&store, &analyzer2, &embedder2, &progress);
    let summary = run_pipeline(&h2.ctx, &lister, &opts(5)).await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.degraded, 0);
    let record = store.get_record("modules", "src/m00.py", "v1").unwrap();
    assert_eq!(record.embedding_quality, EmbeddingQuality::Ok);
    assert_eq!(record.embedding, vec![0.25; DIMS]);
}

#[tokio::test]
async fn one_persistence_failure_does_not_abort_the_batch() {
    let inner = Arc::new(InMemoryStore::new());
    let store = FailKeyStore {
        inner: inner.clone(),
        fail_key: Some("src/m02.py".to_string()),
    };
    let analyzer = StubAnalyzer::new(AnalyzerBehavior::Succeed);
    let embedder = StubEmbedder::new(false);
    let progress = NoProgress;
    let h = harness(&store, &analyzer, &embedder, &progress);
    let lister = StaticLister::new(corpus_of(5));

    let summary = run_pipeline(&h.ctx, &lister, &opts(5)).await.unwrap();

    assert_eq!(summary.processed, 4);
    assert_eq!(summary.failed_keys, vec!["src/m02.py".to_string()]);
    assert_eq!(summary.status, RunStatus::Partial);
    assert_eq!(summary.exit_code(), 2);
    assert_eq!(inner.record_count(), 4);

    let checkpoint = inner.load_checkpoint("modules").await.unwrap().unwrap();
    assert!(checkpoint
        .failed_keys
        .contains(&"src/m02.py".to_string()));

    // Next run with the store healthy: the failed key moves to completed.
    let healthy = FailKeyStore {
        inner: inner.clone(),
        fail_key: None,
    };
    let analyzer2 = StubAnalyzer::new(AnalyzerBehavior::Succeed);
    let embedder2 = StubEmbedder::new(false);
    let h2 = harness(&healthy, &analyzer2, &embedder2, &progress);
    let summary = run_pipeline(&h2.ctx, &lister, &opts(5)).await.unwrap();

    assert_eq!(summary.skipped, 4);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.status, RunStatus::Complete);
    assert_eq!(inner.record_count(), 5);

    let checkpoint = inner.load_checkpoint("modules").await.unwrap().unwrap();
    assert!(checkpoint.failed_keys.is_empty());
    assert!(checkpoint
        .completed_keys
        .contains(&"src/m02.py".to_string()));
}

#[tokio::test]
async fn total_processed_never_decreases_across_checkpoints() {
    let inner = Arc::new(InMemoryStore::new());
    let store = RecordingStore {
        inner,
        totals: Mutex::new(Vec::new()),
    };
    let analyzer = StubAnalyzer::new(AnalyzerBehavior::Succeed);
    let embedder = StubEmbedder::new(false);
    let progress = NoProgress;
    let h = harness(&store, &analyzer, &embedder, &progress);
    let lister = StaticLister::new(corpus_of(10));

    run_pipeline(&h.ctx, &lister, &opts(3)).await.unwrap();

    let totals = store.totals.lock().unwrap().clone();
    assert_eq!(totals.len(), 4);
    assert!(totals.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*totals.last().unwrap(), 10);
}

#[tokio::test]
async fn changed_content_is_reprocessed_in_place() {
    let store = InMemoryStore::new();
    let progress = NoProgress;
    let analyzer = StubAnalyzer::new(AnalyzerBehavior::Succeed);
    let embedder = StubEmbedder::new(false);
    let h = harness(&store, &analyzer, &embedder, &progress);

    let lister = StaticLister::new(vec![artifact("src/m00.py", "v1 content")]);
    run_pipeline(&h.ctx, &lister, &opts(5)).await.unwrap();
    let before = store.get_record("modules", "src/m00.py", "v1").unwrap();

    let lister = StaticLister::new(vec![artifact("src/m00.py", "v2 content")]);
    let summary = run_pipeline(&h.ctx, &lister, &opts(5)).await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(store.record_count(), 1);
    let after = store.get_record("modules", "src/m00.py", "v1").unwrap();
    assert_ne!(before.content_hash, after.content_hash);
    assert_eq!(after.content_hash, content_hash("v2 content"));
}

#[tokio::test]
async fn cancellation_checkpoints_and_reports_partial() {
    let store = InMemoryStore::new();
    let analyzer = StubAnalyzer::new(AnalyzerBehavior::Succeed);
    let embedder = StubEmbedder::new(false);
    let progress = NoProgress;
    let h = harness(&store, &analyzer, &embedder, &progress);
    h.ctx.cancel.store(true, Ordering::SeqCst);
    let lister = StaticLister::new(corpus_of(4));

    let summary = run_pipeline(&h.ctx, &lister, &opts(2)).await.unwrap();

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.status, RunStatus::Interrupted);
    assert_eq!(summary.exit_code(), 2);
    // The boundary checkpoint still lands.
    assert!(store.load_checkpoint("modules").await.unwrap().is_some());
}

#[tokio::test]
async fn generations_are_tracked_side_by_side() {
    let store = InMemoryStore::new();
    let analyzer = StubAnalyzer::new(AnalyzerBehavior::Succeed);
    let embedder = StubEmbedder::new(false);
    let progress = NoProgress;
    let h = harness(&store, &analyzer, &embedder, &progress);
    let lister = StaticLister::new(corpus_of(2));

    run_pipeline(&h.ctx, &lister, &opts(5)).await.unwrap();

    let mut v2 = opts(5);
    v2.generation = "v2".to_string();
    let summary = run_pipeline(&h.ctx, &lister, &v2).await.unwrap();

    // The v1 records do not satisfy v2: both artifacts reprocess.
    assert_eq!(summary.processed, 2);
    assert_eq!(store.record_count(), 4);
    assert!(store.get_record("modules", "src/m00.py", "v1").is_some());
    assert!(store.get_record("modules", "src/m00.py", "v2").is_some());
}

#[tokio::test]
async fn validator_reports_missing_and_degraded_keys() {
    let store = InMemoryStore::new();
    let progress = NoProgress;
    let artifacts = corpus_of(3);
    let lister = StaticLister::new(artifacts.clone());

    // Process the first artifact cleanly, the second with the embedder
    // down, and the third not at all.
    let analyzer = StubAnalyzer::new(AnalyzerBehavior::Succeed);
    let embedder = StubEmbedder::new(false);
    let h = harness(&store, &analyzer, &embedder, &progress);
    let only_first = StaticLister::new(vec![artifacts[0].clone()]);
    run_pipeline(&h.ctx, &only_first, &opts(5)).await.unwrap();

    let analyzer2 = StubAnalyzer::new(AnalyzerBehavior::Succeed);
    let embedder2 = StubEmbedder::new(true);
    let h2 = harness(&store, &analyzer2, &embedder2, &progress);
    let only_second = StaticLister::new(vec![artifacts[1].clone()]);
    run_pipeline(&h2.ctx, &only_second, &opts(5)).await.unwrap();

    let report = validate(&store, &lister, "v1").await.unwrap();
    assert_eq!(report.corpus_size, 3);
    assert_eq!(report.complete, 1);
    assert_eq!(report.degraded, 1);
    assert_eq!(
        report.missing,
        vec!["src/m01.py".to_string(), "src/m02.py".to_string()]
    );
    assert!(!report.is_complete());
}

#[tokio::test]
async fn sqlite_store_upsert_is_idempotent_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let db_path = tmp.path().join("sdx.sqlite");
    let options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true);
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .unwrap();
    semindex::migrate::apply_schema(&pool).await.unwrap();

    let store = SqliteStore::new(pool.clone());
    let analyzer = StubAnalyzer::new(AnalyzerBehavior::Succeed);
    let embedder = StubEmbedder::new(false);
    let progress = NoProgress;
    let h = harness(&store, &analyzer, &embedder, &progress);
    let lister = StaticLister::new(corpus_of(4));

    run_pipeline(&h.ctx, &lister, &opts(2)).await.unwrap();
    assert_eq!(store.record_count("modules", "v1").await.unwrap(), 4);

    // Second run: all skipped, still exactly 4 rows.
    let summary = run_pipeline(&h.ctx, &lister, &opts(2)).await.unwrap();
    assert_eq!(summary.skipped, 4);
    assert_eq!(store.record_count("modules", "v1").await.unwrap(), 4);

    // Forced reprocess overwrites in place rather than duplicating.
    let mut full = opts(2);
    full.resume = false;
    let summary = run_pipeline(&h.ctx, &lister, &full).await.unwrap();
    assert_eq!(summary.processed, 4);
    assert_eq!(store.record_count("modules", "v1").await.unwrap(), 4);

    let record = store
        .get_record("modules", "src/m00.py", "v1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.embedding.len(), DIMS);
    assert_eq!(record.embedding_quality, EmbeddingQuality::Ok);
    assert!(record.embedding_text.contains("src/m00.py"));

    pool.close().await;
}
