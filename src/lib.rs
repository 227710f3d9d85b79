//! # semindex
//!
//! A resumable, checkpointed batch pipeline for semantic analysis and
//! embedding of code corpora.
//!
//! semindex enumerates a corpus (source files, notebooks, exported issue
//! dumps), sends each artifact through an external semantic-analysis
//! service and an embedding service, and persists the combined result
//! idempotently in SQLite. Content hashing makes reruns cheap, per-batch
//! checkpoints make interruption safe, and deterministic fallbacks keep the
//! pipeline moving when the external services misbehave.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────────────────┐   ┌──────────┐
//! │  Listers  │──▶│        Scheduler          │──▶│  SQLite   │
//! │ FS/JSONL  │   │ hash-skip → analyze →     │   │ records + │
//! └───────────┘   │ embed → upsert → ckpt     │   │ ckpts     │
//!                 └──────────────────────────┘   └────┬─────┘
//!                                                     │
//!                                               ┌─────┴─────┐
//!                                               │ Validator │
//!                                               └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sdx init                      # create database
//! sdx corpora                   # check configured corpora
//! sdx process modules           # analyze + embed one corpus
//! sdx validate modules          # reconcile corpus vs. store
//! sdx stats                     # database overview
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Pipeline error taxonomy |
//! | [`retry`] | Retry policy with exponential backoff |
//! | [`lister`] | Corpus enumeration (filesystem, JSONL) |
//! | [`analysis`] | Semantic-analysis providers + heuristic fallback |
//! | [`embedding`] | Embedding providers + vector codecs |
//! | [`store`] | Record and checkpoint persistence |
//! | [`pipeline`] | Batch scheduler |
//! | [`validate`] | Corpus-vs-store reconciliation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod analysis;
pub mod config;
pub mod corpora;
pub mod db;
pub mod embedding;
pub mod error;
pub mod lister;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod stats;
pub mod store;
pub mod validate;
