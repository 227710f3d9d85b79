//! Corpus enumeration.
//!
//! A [`Lister`] produces the full, deterministically-ordered list of
//! candidate [`Artifact`]s for one corpus, with content hashes computed at
//! enumeration time. Listing is read-only; a listing failure is fatal to
//! the run.
//!
//! Built-in listers:
//! - **filesystem** — walkdir + glob matching over a directory tree.
//! - **jsonl** — one JSON object per line from an export file (issue dumps).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::models::{content_hash, Artifact};

/// Enumerates one corpus.
#[async_trait]
pub trait Lister: Send + Sync {
    /// The corpus this lister enumerates.
    fn corpus_id(&self) -> &str;

    /// Full candidate list, sorted by natural key. Read-only.
    async fn list(&self) -> Result<Vec<Artifact>>;
}

/// Build the lister configured for `corpus_id`.
pub fn create_lister(corpus_id: &str, config: &CorpusConfig) -> Box<dyn Lister> {
    match config {
        CorpusConfig::Filesystem {
            root,
            include_globs,
            exclude_globs,
            follow_symlinks,
        } => Box::new(FilesystemLister {
            corpus_id: corpus_id.to_string(),
            root: root.clone(),
            include_globs: include_globs.clone(),
            exclude_globs: exclude_globs.clone(),
            follow_symlinks: *follow_symlinks,
        }),
        CorpusConfig::Jsonl { path } => Box::new(JsonlLister {
            corpus_id: corpus_id.to_string(),
            path: path.clone(),
        }),
    }
}

// ============ Filesystem ============

pub struct FilesystemLister {
    corpus_id: String,
    root: PathBuf,
    include_globs: Vec<String>,
    exclude_globs: Vec<String>,
    follow_symlinks: bool,
}

#[async_trait]
impl Lister for FilesystemLister {
    fn corpus_id(&self) -> &str {
        &self.corpus_id
    }

    async fn list(&self) -> Result<Vec<Artifact>> {
        if !self.root.exists() {
            bail!("Corpus root does not exist: {}", self.root.display());
        }

        let include_set = build_globset(&self.include_globs)?;

        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
            "**/__pycache__/**".to_string(),
        ];
        default_excludes.extend(self.exclude_globs.clone());
        let exclude_set = build_globset(&default_excludes)?;

        let mut items = Vec::new();

        let walker = WalkDir::new(&self.root).follow_links(self.follow_symlinks);
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if exclude_set.is_match(&rel_str) {
                continue;
            }
            if !include_set.is_match(&rel_str) {
                continue;
            }

            items.push(file_to_artifact(path, &rel_str)?);
        }

        // Stable order makes reruns visit items identically
        items.sort_by(|a, b| a.natural_key.cmp(&b.natural_key));

        Ok(items)
    }
}

fn file_to_artifact(path: &Path, relative_path: &str) -> Result<Artifact> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    let modified_secs = modified
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let raw_content = std::fs::read_to_string(path).unwrap_or_default();
    let hash = content_hash(&raw_content);

    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string());

    Ok(Artifact {
        natural_key: relative_path.to_string(),
        source_ref: path.display().to_string(),
        title,
        raw_content,
        content_hash: hash,
        last_modified: Utc.timestamp_opt(modified_secs, 0).unwrap(),
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

// ============ JSONL ============

/// One exported item per line: `{"id": ..., "title": ..., "body": ...,
/// "updated_at": ...}`. `id` is required; `updated_at` accepts a unix
/// timestamp or an RFC 3339 string.
pub struct JsonlLister {
    corpus_id: String,
    path: PathBuf,
}

#[derive(Deserialize)]
struct JsonlItem {
    id: serde_json::Value,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    updated_at: Option<serde_json::Value>,
}

#[async_trait]
impl Lister for JsonlLister {
    fn corpus_id(&self) -> &str {
        &self.corpus_id
    }

    async fn list(&self) -> Result<Vec<Artifact>> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read corpus file: {}", self.path.display()))?;

        let mut items = Vec::new();

        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let item: JsonlItem = serde_json::from_str(line).with_context(|| {
                format!("{}:{}: invalid JSON", self.path.display(), lineno + 1)
            })?;

            let natural_key = match &item.id {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                other => bail!(
                    "{}:{}: id must be a string or number, got {}",
                    self.path.display(),
                    lineno + 1,
                    other
                ),
            };

            let hash = content_hash(&item.body);

            items.push(Artifact {
                natural_key,
                source_ref: self.path.display().to_string(),
                title: item.title,
                raw_content: item.body,
                content_hash: hash,
                last_modified: parse_updated_at(item.updated_at.as_ref()),
            });
        }

        items.sort_by(|a, b| a.natural_key.cmp(&b.natural_key));

        Ok(items)
    }
}

fn parse_updated_at(value: Option<&serde_json::Value>) -> DateTime<Utc> {
    match value {
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(epoch),
        Some(serde_json::Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| epoch()),
        _ => epoch(),
    }
}

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).unwrap()
}
