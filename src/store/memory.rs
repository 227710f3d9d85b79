//! In-memory [`Store`] implementation for tests.
//!
//! `HashMap`s behind `std::sync::RwLock`. Upserts replace the whole value
//! under the key, matching the SQLite backend's last-write-wins semantics.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::models::{Checkpoint, ProcessingRecord, RecordStatus};

use super::{Store, StoredKey};

/// In-memory store keyed exactly like the SQLite schema.
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<(String, String, String), ProcessingRecord>>,
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn get_record(
        &self,
        corpus_id: &str,
        natural_key: &str,
        generation: &str,
    ) -> Option<ProcessingRecord> {
        self.records
            .read()
            .unwrap()
            .get(&(
                corpus_id.to_string(),
                natural_key.to_string(),
                generation.to_string(),
            ))
            .cloned()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_record(
        &self,
        corpus_id: &str,
        record: &ProcessingRecord,
    ) -> Result<(), PipelineError> {
        let key = (
            corpus_id.to_string(),
            record.natural_key.clone(),
            record.generation.clone(),
        );
        self.records.write().unwrap().insert(key, record.clone());
        Ok(())
    }

    async fn get_record_status(
        &self,
        corpus_id: &str,
        natural_key: &str,
        generation: &str,
    ) -> Result<Option<RecordStatus>, PipelineError> {
        let key = (
            corpus_id.to_string(),
            natural_key.to_string(),
            generation.to_string(),
        );
        Ok(self.records.read().unwrap().get(&key).map(|r| RecordStatus {
            content_hash: r.content_hash.clone(),
            embedding_quality: r.embedding_quality,
        }))
    }

    async fn record_keys(
        &self,
        corpus_id: &str,
        generation: &str,
    ) -> Result<Vec<StoredKey>, PipelineError> {
        let records = self.records.read().unwrap();
        let mut keys: Vec<StoredKey> = records
            .iter()
            .filter(|((c, _, g), _)| c == corpus_id && g == generation)
            .map(|((_, k, _), r)| StoredKey {
                natural_key: k.clone(),
                embedding_quality: r.embedding_quality,
            })
            .collect();
        keys.sort_by(|a, b| a.natural_key.cmp(&b.natural_key));
        Ok(keys)
    }

    async fn load_checkpoint(&self, corpus_id: &str) -> Result<Option<Checkpoint>, PipelineError> {
        Ok(self.checkpoints.read().unwrap().get(corpus_id).cloned())
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), PipelineError> {
        self.checkpoints
            .write()
            .unwrap()
            .insert(checkpoint.corpus_id.clone(), checkpoint.clone());
        Ok(())
    }
}
