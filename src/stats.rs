//! Database statistics and health overview.
//!
//! Provides a quick summary of what's processed: record counts, degraded
//! embedding counts, and per-corpus breakdowns. Used by `sdx stats` to give
//! confidence that runs are converging on full coverage.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

/// Per-(corpus, generation) breakdown of stored records.
struct CorpusStats {
    corpus_id: String,
    generation: String,
    record_count: i64,
    degraded_count: i64,
    last_checkpoint_ts: Option<i64>,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
        .fetch_one(&pool)
        .await?;

    let total_degraded: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM records WHERE embedding_quality = 'degraded'",
    )
    .fetch_one(&pool)
    .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("semindex — Database Stats");
    println!("=========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Records:     {}", total_records);
    println!(
        "  Usable:      {} / {} ({}%)",
        total_records - total_degraded,
        total_records,
        if total_records > 0 {
            ((total_records - total_degraded) * 100) / total_records
        } else {
            0
        }
    );

    let corpus_rows = sqlx::query(
        r#"
        SELECT
            corpus_id,
            generation,
            COUNT(*) AS record_count,
            SUM(CASE WHEN embedding_quality = 'degraded' THEN 1 ELSE 0 END) AS degraded_count
        FROM records
        GROUP BY corpus_id, generation
        ORDER BY record_count DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let checkpoint_rows = sqlx::query("SELECT corpus_id, updated_at FROM checkpoints")
        .fetch_all(&pool)
        .await?;

    let mut corpus_stats: Vec<CorpusStats> = Vec::new();
    for row in &corpus_rows {
        let corpus_id: String = row.get("corpus_id");
        let last_checkpoint_ts = checkpoint_rows
            .iter()
            .find(|cp| {
                let cp_corpus: String = cp.get("corpus_id");
                cp_corpus == corpus_id
            })
            .map(|cp| cp.get::<i64, _>("updated_at"));

        corpus_stats.push(CorpusStats {
            corpus_id,
            generation: row.get("generation"),
            record_count: row.get("record_count"),
            degraded_count: row.get("degraded_count"),
            last_checkpoint_ts,
        });
    }

    if !corpus_stats.is_empty() {
        println!();
        println!("  By corpus:");
        println!(
            "  {:<20} {:<12} {:>8} {:>10}   {}",
            "CORPUS", "GENERATION", "RECORDS", "DEGRADED", "LAST CHECKPOINT"
        );
        println!("  {}", "-".repeat(76));

        for s in &corpus_stats {
            let checkpoint_display = match s.last_checkpoint_ts {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "  {:<20} {:<12} {:>8} {:>10}   {}",
                s.corpus_id, s.generation, s.record_count, s.degraded_count, checkpoint_display
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
