//! Run progress reporting.
//!
//! Reports observable progress during `sdx process` so users see what is
//! being enumerated, how much is left, and when the corpus is fully
//! processed. Progress is emitted on **stderr** so stdout remains parseable
//! for scripts.

use std::io::Write;

/// A single progress event for a pipeline run.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// Enumeration phase for this corpus (no total yet).
    Enumerating { corpus: String },
    /// Processing phase: n artifacts done out of total pending.
    Processing { corpus: String, n: u64, total: u64 },
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the scheduler.
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "process modules  3 / 1,204 artifacts".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Enumerating { corpus } => {
                format!("process {}  enumerating...\n", corpus)
            }
            ProgressEvent::Processing { corpus, n, total } => {
                format!(
                    "process {}  {} / {} artifacts\n",
                    corpus,
                    format_number(*n),
                    format_number(*total)
                )
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Enumerating { corpus } => serde_json::json!({
                "event": "progress",
                "corpus": corpus,
                "phase": "enumerating"
            }),
            ProgressEvent::Processing { corpus, n, total } => serde_json::json!({
                "event": "progress",
                "corpus": corpus,
                "phase": "processing",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode. Caller passes it to the scheduler.
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
