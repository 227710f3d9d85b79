//! # semindex CLI (`sdx`)
//!
//! The `sdx` binary is the interface to the batch pipeline. It provides
//! commands for database initialization, corpus processing, reconciliation,
//! and inspection.
//!
//! ## Usage
//!
//! ```bash
//! sdx --config ./config/sdx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sdx init` | Create the SQLite database and run schema migrations |
//! | `sdx corpora` | List configured corpora and their health |
//! | `sdx process <corpus>` | Analyze, embed, and store a corpus |
//! | `sdx validate <corpus>` | Reconcile corpus contents against the store |
//! | `sdx stats` | Database totals and per-corpus breakdown |
//!
//! ## Exit codes
//!
//! `0` — fully processed. `1` — fatal configuration or source error.
//! `2` — run completed with recorded failures or gaps (partial completion);
//! rerunning picks up where it left off.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use semindex::analysis::create_analyzer;
use semindex::config;
use semindex::corpora;
use semindex::db;
use semindex::embedding::create_embedder;
use semindex::lister::create_lister;
use semindex::migrate;
use semindex::pipeline::{self, ProcessOptions, RunContext};
use semindex::progress::ProgressMode;
use semindex::retry::RetryPolicy;
use semindex::stats;
use semindex::store::SqliteStore;
use semindex::validate;

/// semindex CLI — a resumable, checkpointed batch pipeline for semantic
/// analysis and embedding of code corpora.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/sdx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "sdx",
    about = "semindex — a resumable batch pipeline for semantic analysis and embedding of code corpora",
    version,
    long_about = "semindex enumerates corpora (source trees, notebook directories, exported \
    issue dumps), runs each artifact through semantic analysis and embedding with retry and \
    fallback, and stores results idempotently in SQLite with per-batch checkpoints for safe resume."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/sdx.toml`. Database, pipeline, provider, and
    /// corpus settings are read from this file.
    #[arg(long, global = true, default_value = "./config/sdx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (records,
    /// checkpoints). This command is idempotent; running it multiple times
    /// is safe.
    Init,

    /// List configured corpora and their status.
    ///
    /// Shows each corpus from the config and whether its source is
    /// reachable. Useful for verifying configuration before a run.
    Corpora,

    /// Process a corpus: analyze, embed, and store each pending artifact.
    ///
    /// Enumerates the corpus, skips artifacts whose content hash is
    /// unchanged, and processes the rest in fixed-size batches with a
    /// checkpoint after every batch. Safe to interrupt and rerun; a rerun
    /// picks up exactly the artifacts that are missing, changed, failed, or
    /// degraded.
    Process {
        /// Corpus name (a `[corpora.<name>]` section in the config).
        corpus: String,

        /// Analysis generation tag, tracked side by side per corpus.
        #[arg(long, default_value = "v1")]
        generation: String,

        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Ignore prior checkpoints and stored hashes; reprocess everything.
        #[arg(long)]
        no_resume: bool,

        /// Maximum number of pending artifacts to process this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Show candidate and pending counts without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Progress reporting on stderr: off, human, or json.
        /// Defaults to human when stderr is a TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Reconcile a corpus against the store.
    ///
    /// Reports completion percentage and lists every natural key that is
    /// missing or has a degraded embedding. Read-only.
    Validate {
        /// Corpus name (a `[corpora.<name>]` section in the config).
        corpus: String,

        /// Analysis generation tag to reconcile.
        #[arg(long, default_value = "v1")]
        generation: String,
    },

    /// Database totals and per-corpus breakdown.
    Stats,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&config).await?;
            println!("initialized {}", config.db.path.display());
            Ok(0)
        }

        Commands::Corpora => {
            corpora::list_corpora(&config)?;
            Ok(0)
        }

        Commands::Stats => {
            stats::run_stats(&config).await?;
            Ok(0)
        }

        Commands::Validate { corpus, generation } => {
            let corpus_config = config
                .corpora
                .get(&corpus)
                .ok_or_else(|| anyhow::anyhow!("Unknown corpus: '{}'", corpus))?;
            let lister = create_lister(&corpus, corpus_config);

            let pool = db::connect(&config).await?;
            let store = SqliteStore::new(pool.clone());

            let report = validate::validate(&store, lister.as_ref(), &generation).await?;
            validate::print_report(&report);

            pool.close().await;
            Ok(if report.is_complete() { 0 } else { 2 })
        }

        Commands::Process {
            corpus,
            generation,
            batch_size,
            no_resume,
            limit,
            dry_run,
            progress,
        } => {
            let corpus_config = config
                .corpora
                .get(&corpus)
                .ok_or_else(|| anyhow::anyhow!("Unknown corpus: '{}'", corpus))?;
            let lister = create_lister(&corpus, corpus_config);

            // Provider construction fails fast on missing credentials,
            // before anything is written.
            let analyzer = create_analyzer(&config.analysis)?;
            let embedder = create_embedder(&config.embedding)?;

            let pool = db::connect(&config).await?;
            let store = SqliteStore::new(pool.clone());

            let mode = match progress.as_deref() {
                Some("off") => ProgressMode::Off,
                Some("human") => ProgressMode::Human,
                Some("json") => ProgressMode::Json,
                Some(other) => anyhow::bail!(
                    "Unknown progress mode: '{}'. Must be off, human, or json.",
                    other
                ),
                None => ProgressMode::default_for_tty(),
            };
            let reporter = mode.reporter();

            // SIGINT sets the flag; the scheduler finishes the in-flight
            // artifact, checkpoints, and stops.
            let cancel = Arc::new(AtomicBool::new(false));
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        eprintln!("interrupt received — finishing current artifact");
                        cancel.store(true, Ordering::SeqCst);
                    }
                });
            }

            let ctx = RunContext {
                store: &store,
                analyzer: analyzer.as_ref(),
                embedder: embedder.as_ref(),
                retry: RetryPolicy::from_config(&config.pipeline),
                progress: reporter.as_ref(),
                cancel,
            };

            let opts = ProcessOptions {
                corpus_id: corpus,
                generation,
                batch_size: batch_size.unwrap_or(config.pipeline.batch_size),
                resume: !no_resume,
                limit,
                dry_run,
            };

            let summary = pipeline::run_pipeline(&ctx, lister.as_ref(), &opts).await?;

            pool.close().await;
            Ok(summary.exit_code())
        }
    }
}
