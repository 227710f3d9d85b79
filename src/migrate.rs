use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create tables and indexes. Every statement is idempotent, so init can
/// run any number of times.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // One row per (corpus, natural_key, generation); overwritten on
    // reprocessing, never duplicated.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            corpus_id TEXT NOT NULL,
            natural_key TEXT NOT NULL,
            generation TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            source_ref TEXT NOT NULL,
            analysis_json TEXT NOT NULL,
            embedding_text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            embedding_dims INTEGER NOT NULL,
            embedding_quality TEXT NOT NULL DEFAULT 'ok',
            processed_at INTEGER NOT NULL,
            UNIQUE(corpus_id, natural_key, generation)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per corpus, overwritten after every batch.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            corpus_id TEXT PRIMARY KEY,
            generation TEXT NOT NULL,
            batch_id INTEGER NOT NULL,
            completed_keys TEXT NOT NULL,
            failed_keys TEXT NOT NULL,
            total_processed INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_records_corpus_generation ON records(corpus_id, generation)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_records_quality ON records(embedding_quality)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
