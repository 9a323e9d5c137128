//! Shared CLI helpers used across multiple commands.

use std::path::{Path, PathBuf};

use arbor_chain::{ChainNodeId, ChainProcessor, EngineConfig};
use clap::Args;

use crate::chain_spec::{build_chain, parse_chain};

/// Where a command takes its chain from.
#[derive(Args, Debug, Clone)]
pub struct ChainSource {
    /// Chain string (e.g. "gain:gain=-6|par(delay:samples=64|saturator)")
    #[arg(short, long, conflicts_with = "document")]
    pub chain: Option<String>,

    /// Chain document (JSON) to import
    #[arg(short, long, value_name = "FILE")]
    pub document: Option<PathBuf>,
}

/// Loads the engine configuration, or the defaults without a file.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => {
            let config = EngineConfig::load(path)?;
            tracing::debug!(path = %path.display(), "engine config loaded");
            Ok(config)
        }
        None => Ok(EngineConfig::default()),
    }
}

/// Fills an empty processor from a chain string or a document.
///
/// Documents go through the strict import: every plugin must be available.
pub fn load_chain(chain: &mut ChainProcessor, source: &ChainSource) -> anyhow::Result<()> {
    if let Some(spec) = &source.chain {
        let items = parse_chain(spec)?;
        build_chain(chain, ChainNodeId::ROOT, &items)?;
    } else if let Some(path) = &source.document {
        let json = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read '{}': {e}", path.display()))?;
        chain.import_json(&json)?;
    } else {
        anyhow::bail!("No chain specified. Use --chain or --document");
    }
    Ok(())
}
