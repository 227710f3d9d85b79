use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub corpora: BTreeMap<String, CorpusConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Batch and retry settings, applied uniformly to analysis and embedding
/// calls.
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_initial_secs")]
    pub retry_initial_secs: u64,
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_initial_secs: default_retry_initial_secs(),
            retry_multiplier: default_retry_multiplier(),
        }
    }
}

fn default_batch_size() -> usize {
    8
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_initial_secs() -> u64 {
    2
}
fn default_retry_multiplier() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_heuristic_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            provider: default_heuristic_provider(),
            model: None,
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_heuristic_provider() -> String {
    "heuristic".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: default_dims(),
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_dims() -> usize {
    1536
}

/// One corpus to enumerate and process. The table key is the corpus id.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CorpusConfig {
    /// Walk a directory tree, matching files against include/exclude globs.
    Filesystem {
        root: PathBuf,
        #[serde(default = "default_include_globs")]
        include_globs: Vec<String>,
        #[serde(default)]
        exclude_globs: Vec<String>,
        #[serde(default)]
        follow_symlinks: bool,
    },
    /// Read one JSON object per line from an export file (issue dumps).
    Jsonl { path: PathBuf },
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.py".to_string(), "**/*.ipynb".to_string()]
}

impl PipelineConfig {
    pub fn retry_initial_delay(&self) -> Duration {
        Duration::from_secs(self.retry_initial_secs)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.pipeline.batch_size == 0 {
        anyhow::bail!("pipeline.batch_size must be > 0");
    }
    if config.pipeline.max_retries == 0 {
        anyhow::bail!("pipeline.max_retries must be >= 1");
    }
    if config.pipeline.retry_multiplier == 0 {
        anyhow::bail!("pipeline.retry_multiplier must be >= 1");
    }

    match config.analysis.provider.as_str() {
        "heuristic" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown analysis provider: '{}'. Must be heuristic, openai, or ollama.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be openai or ollama.",
            other
        ),
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified for provider '{}'",
            config.embedding.provider
        );
    }

    Ok(config)
}
