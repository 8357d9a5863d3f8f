//! Offline depth replay
//!
//! Reads newline-delimited JSON diffs (exchange or camelCase field names),
//! optionally seeds the book from a JSON snapshot, replays everything
//! through a fresh engine and prints the report as JSON.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use depth_engine::events::{DepthSnapshot, DepthUpdate};
use depth_engine::replay::ReplayEngine;
use depth_engine::EngineConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;
use types::ids::MarketId;

#[derive(Parser)]
#[command(name = "depth-replay")]
#[command(about = "Replay recorded depth diffs and report the resulting book")]
struct Cli {
    /// Newline-delimited JSON file of depth diffs
    updates: PathBuf,

    /// JSON depth snapshot to start from
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Exchange symbol
    #[arg(long, default_value = "BTCUSDT")]
    symbol: String,

    /// JSON engine configuration (camelCase fields)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip sequence validation
    #[arg(long)]
    relaxed: bool,

    /// Fail on the first stale or duplicate diff
    #[arg(long)]
    reject_stale: bool,

    /// Fail unless the final book hashes to this checksum
    #[arg(long)]
    expected_checksum: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let symbol = MarketId::try_new(cli.symbol.as_str())
        .with_context(|| format!("invalid symbol {:?}", cli.symbol))?;

    let config = match &cli.config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            EngineConfig::from_json_str(&raw)?
        }
        None => EngineConfig::default(),
    }
    .with_env_overrides()?;

    let snapshot = match &cli.snapshot {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let snapshot: DepthSnapshot = serde_json::from_str(&raw)
                .with_context(|| format!("parsing snapshot {}", path.display()))?;
            Some(snapshot)
        }
        None => None,
    };

    let raw = fs::read_to_string(&cli.updates)
        .with_context(|| format!("reading {}", cli.updates.display()))?;
    let updates = raw
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<DepthUpdate>(line)
                .with_context(|| format!("parsing diff on line {}", n + 1))
        })
        .collect::<Result<Vec<_>>>()?;

    info!(symbol = %symbol, diffs = updates.len(), "Loaded recording");

    let mut replayer = ReplayEngine::new(symbol, config);
    if cli.relaxed {
        replayer = replayer.with_relaxed_ordering();
    }
    if cli.reject_stale {
        replayer = replayer.with_stale_rejection();
    }
    if let Some(checksum) = cli.expected_checksum {
        replayer = replayer.with_expected_checksum(checksum);
    }

    let result = replayer.replay(snapshot.as_ref(), &updates)?;
    println!("{}", serde_json::to_string_pretty(&result.report)?);

    Ok(())
}
