//! Semantic-analysis providers and the deterministic fallback.
//!
//! Defines the [`SemanticAnalyzer`] trait and concrete implementations:
//! - **[`OpenAiAnalyzer`]** — chat-completions API, markdown-section response.
//! - **[`OllamaAnalyzer`]** — local Ollama `/api/generate` endpoint.
//! - **[`HeuristicAnalyzer`]** — the deterministic fallback as a provider of
//!   its own; makes no external calls.
//!
//! Providers make exactly one attempt per call and classify failures as
//! transient or invalid; the scheduler owns retries and backoff. When
//! retries are exhausted (or the response is deterministically bad),
//! [`heuristic_analysis`] derives a minimal valid analysis purely from the
//! artifact's own metadata. It never fails, so the pipeline always makes
//! forward progress even with the analysis service fully down.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::AnalysisConfig;
use crate::error::PipelineError;
use crate::models::{AnalysisOrigin, Artifact, StructuredAnalysis};

/// A purpose section shorter than this is treated as an invalid response.
const MIN_PURPOSE_LEN: usize = 40;

/// Produces a [`StructuredAnalysis`] for one artifact. One attempt per call.
#[async_trait]
pub trait SemanticAnalyzer: Send + Sync {
    /// Provider identifier for summaries and logs.
    fn name(&self) -> &str;

    async fn analyze(&self, artifact: &Artifact) -> Result<StructuredAnalysis, PipelineError>;
}

/// Create the configured analyzer.
///
/// Fails fast (before any batch work) on missing credentials or incomplete
/// provider configuration.
pub fn create_analyzer(config: &AnalysisConfig) -> anyhow::Result<Box<dyn SemanticAnalyzer>> {
    match config.provider.as_str() {
        "heuristic" => Ok(Box::new(HeuristicAnalyzer)),
        "openai" => Ok(Box::new(OpenAiAnalyzer::new(config)?)),
        "ollama" => Ok(Box::new(OllamaAnalyzer::new(config)?)),
        other => anyhow::bail!("Unknown analysis provider: {}", other),
    }
}

// ============ Heuristic provider / fallback ============

/// Analyzer that always uses the deterministic fallback. Useful for offline
/// runs and for corpora where model quality is not worth the quota.
pub struct HeuristicAnalyzer;

#[async_trait]
impl SemanticAnalyzer for HeuristicAnalyzer {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn analyze(&self, artifact: &Artifact) -> Result<StructuredAnalysis, PipelineError> {
        Ok(heuristic_analysis(artifact))
    }
}

/// Derive a minimal valid analysis from the artifact alone.
///
/// Deterministic, no external calls, never fails. Quality is deliberately
/// modest: the point is a usable record that keeps the pipeline moving; a
/// later run with the service back up will overwrite it when the content
/// changes.
pub fn heuristic_analysis(artifact: &Artifact) -> StructuredAnalysis {
    let stem = key_stem(&artifact.natural_key);
    let display = artifact.title.as_deref().unwrap_or(&stem);

    let first_line = artifact
        .raw_content
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with(|c| matches!(c, '#' | '/' | '<' | '{')))
        .unwrap_or("");

    let mut purpose = format!("{}: source artifact", display);
    if !first_line.is_empty() {
        purpose.push_str(&format!(" — {}", truncate(first_line, 200)));
    }

    let mut concepts: Vec<String> = artifact
        .natural_key
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    if let Some(ext) = extension(&artifact.natural_key) {
        concepts.push(ext);
    }
    concepts.dedup();

    StructuredAnalysis {
        purpose,
        use_cases: vec![
            format!("Working with {}", display),
            "Locating related functionality in the corpus".to_string(),
        ],
        concepts,
        pitfalls: Vec::new(),
        origin: AnalysisOrigin::Heuristic,
    }
}

fn key_stem(natural_key: &str) -> String {
    let base = natural_key
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(natural_key);
    match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => base.to_string(),
    }
}

fn extension(natural_key: &str) -> Option<String> {
    let base = natural_key.rsplit(['/', '\\']).next()?;
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext.to_string()),
        _ => None,
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ============ Prompt and response format ============

/// Prompt asking for the markdown sections [`parse_analysis_response`]
/// expects.
fn build_prompt(artifact: &Artifact) -> String {
    let excerpt = truncate(&artifact.raw_content, 6000);
    format!(
        "Analyze this artifact from a software corpus.\n\
         \n\
         Identifier: {}\n\
         Title: {}\n\
         \n\
         Content:\n{}\n\
         \n\
         Respond in markdown with exactly these sections:\n\
         \n\
         ## Purpose\n\
         What this artifact is for, in two or three sentences.\n\
         \n\
         ## Use Cases\n\
         3-4 bullet points, each a situation where someone would reach for it.\n\
         \n\
         ## Related Concepts\n\
         Bullet points naming related components, terms, or approaches.\n\
         \n\
         ## Common Pitfalls\n\
         Bullet points describing mistakes people make with it.\n",
        artifact.natural_key,
        artifact.title.as_deref().unwrap_or("(none)"),
        excerpt,
    )
}

/// Parse the markdown-section response into a [`StructuredAnalysis`].
///
/// A missing or too-short Purpose section is an invalid response: the call
/// "succeeded" but the structure is unusable, so the caller falls back
/// without burning retries.
fn parse_analysis_response(text: &str) -> Result<StructuredAnalysis, PipelineError> {
    let purpose = section_text(text, "Purpose")
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    if purpose.len() < MIN_PURPOSE_LEN {
        return Err(PipelineError::InvalidResponse(format!(
            "purpose section missing or too short ({} chars)",
            purpose.len()
        )));
    }

    Ok(StructuredAnalysis {
        purpose,
        use_cases: section_bullets(text, "Use Cases"),
        concepts: section_bullets(text, "Related Concepts"),
        pitfalls: section_bullets(text, "Common Pitfalls"),
        origin: AnalysisOrigin::Model,
    })
}

/// Body of a `## <heading>` section, up to the next `## ` heading.
fn section_text<'a>(text: &'a str, heading: &str) -> Option<&'a str> {
    let mut rest = text;
    loop {
        let idx = rest.find("## ")?;
        let after = &rest[idx + 3..];
        let (line, body_start) = match after.find('\n') {
            Some(nl) => (&after[..nl], &after[nl + 1..]),
            None => (after, ""),
        };
        if line.trim().eq_ignore_ascii_case(heading) {
            let end = body_start.find("\n## ").unwrap_or(body_start.len());
            return Some(&body_start[..end]);
        }
        rest = after;
    }
}

/// `- ` bullet lines of a section, trimmed.
fn section_bullets(text: &str, heading: &str) -> Vec<String> {
    section_text(text, heading)
        .map(|body| {
            body.lines()
                .map(str::trim)
                .filter_map(|l| {
                    l.strip_prefix("- ")
                        .or_else(|| l.strip_prefix("* "))
                        .map(|s| s.trim().to_string())
                })
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

// ============ OpenAI provider ============

/// Analyzer using an OpenAI-compatible chat-completions API.
///
/// Requires `OPENAI_API_KEY` in the environment.
pub struct OpenAiAnalyzer {
    model: String,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiAnalyzer {
    pub fn new(config: &AnalysisConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("analysis.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            url,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl SemanticAnalyzer for OpenAiAnalyzer {
    fn name(&self) -> &str {
        "openai"
    }

    async fn analyze(&self, artifact: &Artifact) -> Result<StructuredAnalysis, PipelineError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": build_prompt(artifact)}],
        });

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Transient(format!("analysis request failed: {}", e)))?;

        let text = read_api_response(response, "analysis").await?;

        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| PipelineError::InvalidResponse(format!("analysis response: {}", e)))?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                PipelineError::InvalidResponse("analysis response missing message content".into())
            })?;

        parse_analysis_response(content)
    }
}

// ============ Ollama provider ============

/// Analyzer using a local Ollama instance's `/api/generate` endpoint.
pub struct OllamaAnalyzer {
    model: String,
    url: String,
    client: reqwest::Client,
}

impl OllamaAnalyzer {
    pub fn new(config: &AnalysisConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("analysis.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { model, url, client })
    }
}

#[async_trait]
impl SemanticAnalyzer for OllamaAnalyzer {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn analyze(&self, artifact: &Artifact) -> Result<StructuredAnalysis, PipelineError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": build_prompt(artifact),
            "stream": false,
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                PipelineError::Transient(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let text = read_api_response(response, "analysis").await?;

        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| PipelineError::InvalidResponse(format!("analysis response: {}", e)))?;
        let content = json["response"].as_str().ok_or_else(|| {
            PipelineError::InvalidResponse("analysis response missing 'response' field".into())
        })?;

        parse_analysis_response(content)
    }
}

/// Classify an HTTP response: 429 and 5xx are transient, other non-success
/// statuses are not worth retrying.
pub(crate) async fn read_api_response(
    response: reqwest::Response,
    what: &str,
) -> Result<String, PipelineError> {
    let status = response.status();

    if status.is_success() {
        return response
            .text()
            .await
            .map_err(|e| PipelineError::Transient(format!("{} body read failed: {}", what, e)));
    }

    let body_text = response.text().await.unwrap_or_default();

    if status.as_u16() == 429 || status.is_server_error() {
        return Err(PipelineError::Transient(format!(
            "{} API error {}: {}",
            what, status, body_text
        )));
    }

    Err(PipelineError::InvalidResponse(format!(
        "{} API error {}: {}",
        what, status, body_text
    )))
}

/// The exact string fed to the embedder: identifier, analysis prose, and
/// list fields joined. Stored with the record for debuggability.
pub fn embedding_text(artifact: &Artifact, analysis: &StructuredAnalysis) -> String {
    let stem = key_stem(&artifact.natural_key);
    let use_cases = analysis.use_cases.join(" ");
    let concepts = analysis.concepts.join(" ");
    let parts: [&str; 5] = [
        artifact.title.as_deref().unwrap_or(&stem),
        artifact.natural_key.as_str(),
        analysis.purpose.as_str(),
        use_cases.as_str(),
        concepts.as_str(),
    ];
    parts
        .iter()
        .copied()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
