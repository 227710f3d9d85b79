//! Storage abstraction for processed records and checkpoints.
//!
//! The [`Store`] trait defines the persistence operations the pipeline
//! needs, enabling pluggable backends: SQLite for real runs, in-memory for
//! tests. Implementations must be `Send + Sync`.
//!
//! The cardinal rule for every backend: `upsert_record` is one atomic
//! insert-or-overwrite keyed on (corpus, natural key, generation). No
//! backend may implement it as a read-then-write two-step.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::models::{Checkpoint, EmbeddingQuality, ProcessingRecord, RecordStatus};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// A stored record's key and embedding quality, for reconciliation.
#[derive(Debug, Clone)]
pub struct StoredKey {
    pub natural_key: String,
    pub embedding_quality: EmbeddingQuality,
}

/// Abstract persistence backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_record`](Store::upsert_record) | Atomic insert-or-overwrite of one record |
/// | [`get_record_status`](Store::get_record_status) | Hash + quality for skip decisions |
/// | [`record_keys`](Store::record_keys) | All stored keys for a corpus/generation |
/// | [`load_checkpoint`](Store::load_checkpoint) | Progress row for a corpus, if any |
/// | [`save_checkpoint`](Store::save_checkpoint) | Overwrite the progress row |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or overwrite the record for (corpus, natural key, generation).
    ///
    /// Idempotent: repeated calls with identical input leave one record;
    /// the last write wins.
    async fn upsert_record(
        &self,
        corpus_id: &str,
        record: &ProcessingRecord,
    ) -> Result<(), PipelineError>;

    /// Stored hash and embedding quality for one key, if a record exists.
    async fn get_record_status(
        &self,
        corpus_id: &str,
        natural_key: &str,
        generation: &str,
    ) -> Result<Option<RecordStatus>, PipelineError>;

    /// Keys of all stored records for a corpus and generation.
    async fn record_keys(
        &self,
        corpus_id: &str,
        generation: &str,
    ) -> Result<Vec<StoredKey>, PipelineError>;

    /// The checkpoint row for a corpus, if one has been written.
    async fn load_checkpoint(&self, corpus_id: &str) -> Result<Option<Checkpoint>, PipelineError>;

    /// Overwrite the checkpoint row for the checkpoint's corpus.
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), PipelineError>;
}
