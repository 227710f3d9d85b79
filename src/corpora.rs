use anyhow::Result;

use crate::config::{Config, CorpusConfig};

/// List configured corpora and whether their sources are reachable.
pub fn list_corpora(config: &Config) -> Result<()> {
    println!("{:<20} {:<12} {:<40} HEALTHY", "CORPUS", "KIND", "SOURCE");

    if config.corpora.is_empty() {
        println!("(no corpora configured — add a [corpora.<name>] section)");
        return Ok(());
    }

    for (corpus_id, corpus) in &config.corpora {
        let (kind, source, healthy) = match corpus {
            CorpusConfig::Filesystem { root, .. } => {
                ("filesystem", root.display().to_string(), root.is_dir())
            }
            CorpusConfig::Jsonl { path } => ("jsonl", path.display().to_string(), path.is_file()),
        };
        println!("{:<20} {:<12} {:<40} {}", corpus_id, kind, source, healthy);
    }

    Ok(())
}
