//! SQLite [`Store`] implementation backed by sqlx.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::PipelineError;
use crate::models::{Checkpoint, EmbeddingQuality, ProcessingRecord, RecordStatus};

use super::{Store, StoredKey};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load a full record. Not needed by the pipeline itself; used by
    /// tests and inspection tooling.
    pub async fn get_record(
        &self,
        corpus_id: &str,
        natural_key: &str,
        generation: &str,
    ) -> Result<Option<ProcessingRecord>, PipelineError> {
        let row = sqlx::query(
            r#"
            SELECT natural_key, generation, content_hash, source_ref, analysis_json,
                   embedding_text, embedding, embedding_quality, processed_at
            FROM records
            WHERE corpus_id = ? AND natural_key = ? AND generation = ?
            "#,
        )
        .bind(corpus_id)
        .bind(natural_key)
        .bind(generation)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let analysis_json: String = row.get("analysis_json");
        let analysis = serde_json::from_str(&analysis_json)
            .map_err(|e| PipelineError::Persistence(format!("corrupt analysis json: {}", e)))?;
        let blob: Vec<u8> = row.get("embedding");
        let quality: String = row.get("embedding_quality");

        Ok(Some(ProcessingRecord {
            natural_key: row.get("natural_key"),
            generation: row.get("generation"),
            content_hash: row.get("content_hash"),
            source_ref: row.get("source_ref"),
            analysis,
            embedding_text: row.get("embedding_text"),
            embedding: blob_to_vec(&blob),
            embedding_quality: EmbeddingQuality::parse(&quality),
            processed_at: row.get("processed_at"),
        }))
    }

    /// Total records for a corpus and generation.
    pub async fn record_count(
        &self,
        corpus_id: &str,
        generation: &str,
    ) -> Result<i64, PipelineError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM records WHERE corpus_id = ? AND generation = ?",
        )
        .bind(corpus_id)
        .bind(generation)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_record(
        &self,
        corpus_id: &str,
        record: &ProcessingRecord,
    ) -> Result<(), PipelineError> {
        let analysis_json = serde_json::to_string(&record.analysis)
            .map_err(|e| PipelineError::Persistence(format!("analysis serialize: {}", e)))?;
        let blob = vec_to_blob(&record.embedding);
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO records (
                id, corpus_id, natural_key, generation, content_hash, source_ref,
                analysis_json, embedding_text, embedding, embedding_dims,
                embedding_quality, processed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(corpus_id, natural_key, generation) DO UPDATE SET
                content_hash = excluded.content_hash,
                source_ref = excluded.source_ref,
                analysis_json = excluded.analysis_json,
                embedding_text = excluded.embedding_text,
                embedding = excluded.embedding,
                embedding_dims = excluded.embedding_dims,
                embedding_quality = excluded.embedding_quality,
                processed_at = excluded.processed_at
            "#,
        )
        .bind(&id)
        .bind(corpus_id)
        .bind(&record.natural_key)
        .bind(&record.generation)
        .bind(&record.content_hash)
        .bind(&record.source_ref)
        .bind(&analysis_json)
        .bind(&record.embedding_text)
        .bind(&blob)
        .bind(record.embedding.len() as i64)
        .bind(record.embedding_quality.as_str())
        .bind(record.processed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_record_status(
        &self,
        corpus_id: &str,
        natural_key: &str,
        generation: &str,
    ) -> Result<Option<RecordStatus>, PipelineError> {
        let row = sqlx::query(
            r#"
            SELECT content_hash, embedding_quality
            FROM records
            WHERE corpus_id = ? AND natural_key = ? AND generation = ?
            "#,
        )
        .bind(corpus_id)
        .bind(natural_key)
        .bind(generation)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let quality: String = row.get("embedding_quality");
            RecordStatus {
                content_hash: row.get("content_hash"),
                embedding_quality: EmbeddingQuality::parse(&quality),
            }
        }))
    }

    async fn record_keys(
        &self,
        corpus_id: &str,
        generation: &str,
    ) -> Result<Vec<StoredKey>, PipelineError> {
        let rows = sqlx::query(
            r#"
            SELECT natural_key, embedding_quality
            FROM records
            WHERE corpus_id = ? AND generation = ?
            ORDER BY natural_key
            "#,
        )
        .bind(corpus_id)
        .bind(generation)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let quality: String = row.get("embedding_quality");
                StoredKey {
                    natural_key: row.get("natural_key"),
                    embedding_quality: EmbeddingQuality::parse(&quality),
                }
            })
            .collect())
    }

    async fn load_checkpoint(&self, corpus_id: &str) -> Result<Option<Checkpoint>, PipelineError> {
        let row = sqlx::query(
            r#"
            SELECT corpus_id, generation, batch_id, completed_keys, failed_keys,
                   total_processed, updated_at
            FROM checkpoints
            WHERE corpus_id = ?
            "#,
        )
        .bind(corpus_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let completed_json: String = row.get("completed_keys");
        let failed_json: String = row.get("failed_keys");
        let completed_keys = serde_json::from_str(&completed_json)
            .map_err(|e| PipelineError::Persistence(format!("corrupt checkpoint: {}", e)))?;
        let failed_keys = serde_json::from_str(&failed_json)
            .map_err(|e| PipelineError::Persistence(format!("corrupt checkpoint: {}", e)))?;

        Ok(Some(Checkpoint {
            corpus_id: row.get("corpus_id"),
            generation: row.get("generation"),
            batch_id: row.get("batch_id"),
            completed_keys,
            failed_keys,
            total_processed: row.get("total_processed"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), PipelineError> {
        let completed_json = serde_json::to_string(&checkpoint.completed_keys)
            .map_err(|e| PipelineError::Persistence(format!("checkpoint serialize: {}", e)))?;
        let failed_json = serde_json::to_string(&checkpoint.failed_keys)
            .map_err(|e| PipelineError::Persistence(format!("checkpoint serialize: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO checkpoints (
                corpus_id, generation, batch_id, completed_keys, failed_keys,
                total_processed, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(corpus_id) DO UPDATE SET
                generation = excluded.generation,
                batch_id = excluded.batch_id,
                completed_keys = excluded.completed_keys,
                failed_keys = excluded.failed_keys,
                total_processed = excluded.total_processed,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&checkpoint.corpus_id)
        .bind(&checkpoint.generation)
        .bind(checkpoint.batch_id)
        .bind(&completed_json)
        .bind(&failed_json)
        .bind(checkpoint.total_processed)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
