//! quillctl — Offline maintenance for a Quill ledger store.
//!
//! Operates directly on a store directory while the node is stopped:
//! pruning passes (including the deprecated bulk strategies kept for
//! migration), state verification, read-only traversal, manual compaction,
//! and a JSON status summary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use quill_store::{PruningMode, RocksChainStore, StoreConfig};

/// Offline maintenance for a Quill ledger store.
#[derive(Parser)]
#[command(name = "quillctl", version, about = "Quill ledger store maintenance")]
struct Cli {
    /// Data directory of the store (defaults to the platform data dir).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// State pruning mode recorded in the node configuration.
    #[arg(long, default_value = "lowmem")]
    pruning_mode: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

/// Pruning strategy for the `prune` subcommand.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    /// Incremental low-memory pass (the supported default).
    Lowmem,
    /// Deprecated bulk reference-count pass.
    Refcount,
    /// Deprecated sequential bulk pass.
    Sequential,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a JSON summary of the chain pointer, state root, and cursors.
    Info,
    /// Run a pruning pass over the state trie.
    Prune {
        /// Sweep the entire history instead of resuming from the cursor.
        #[arg(long)]
        full: bool,
        #[arg(long, value_enum, default_value = "lowmem")]
        strategy: Strategy,
    },
    /// Verify that everything reachable from the current root is present
    /// and decodable.
    Verify,
    /// Walk the state at the current height's root, read-only.
    Traverse,
    /// Compact physical storage.
    Compact,
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    // An unrecognized pruning mode is fatal before the store is touched.
    let pruning_mode: PruningMode = cli
        .pruning_mode
        .parse()
        .context("invalid --pruning-mode")?;

    let mut config = StoreConfig {
        pruning_mode,
        ..StoreConfig::default()
    };
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let mut store = RocksChainStore::open(config).context("open ledger store")?;
    store
        .load_existing()
        .context("load chain state; has the node initialized this directory?")?;

    match cli.command {
        Commands::Info => {
            let (hash, height) = store.chain_pointer_from_db()?;
            let (ref_count_start, pruning_start) = store.pruning_start_heights()?;
            let donation = store.current_donation()?;
            let summary = serde_json::json!({
                "height": height,
                "block_hash": hash.to_string(),
                "state_root": store.current_state_root()?.to_string(),
                "ref_count_start_height": ref_count_start,
                "pruning_start_height": pruning_start,
                "compacted_height": store.compacted_height()?,
                "donation_height": donation.height,
                "donation_amount": donation.amount.raw(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Prune { full, strategy } => match strategy {
            Strategy::Lowmem => store.prune_low_memory(full)?,
            Strategy::Refcount => store.prune_bulk_refcount()?,
            Strategy::Sequential => store.prune_sequential()?,
        },
        Commands::Verify => {
            store.verify_state()?;
            info!("state verification passed");
        }
        Commands::Traverse => {
            let visited = store.traverse_state()?;
            info!(visited, "state traversal complete");
        }
        Commands::Compact => {
            store.compact_storage()?;
            info!("compaction complete");
        }
    }

    Ok(())
}
