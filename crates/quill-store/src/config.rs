//! Store configuration.
//!
//! [`StoreConfig`] is built once by the embedding node and injected at
//! construction; the store never reads ambient global state. The pruning
//! mode is a closed enumeration: an unrecognized mode string fails at parse
//! time, before a store exists.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use quill_core::constants::{
    DEFAULT_DONATION_DIVIDEND, DEFAULT_DONATION_DIVISOR, DEFAULT_HEADER_CACHE_SIZE,
    DEFAULT_RECENT_STATE_COUNT, DEFAULT_REWARD_ADJUST_INTERVAL, DB_VERSION, NATIVE_ASSET_ID,
};
use quill_core::error::ConfigError;
use quill_core::types::{Address, Hash256};

/// Trie pruning mode selectable by operators.
///
/// Only the low-memory incremental strategy is supported for continuous
/// operation; the deprecated bulk strategies are reachable solely through
/// the maintenance CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruningMode {
    /// Incremental low-memory pruning; a full pass runs at startup and an
    /// incremental pass after each block when live pruning is enabled.
    LowMemory,
    /// No pruning. Storage grows without bound.
    Disabled,
}

impl FromStr for PruningMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lowmem" => Ok(Self::LowMemory),
            "none" => Ok(Self::Disabled),
            other => Err(ConfigError::UnknownPruningMode(other.to_string())),
        }
    }
}

impl fmt::Display for PruningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowMemory => f.write_str("lowmem"),
            Self::Disabled => f.write_str("none"),
        }
    }
}

/// Configuration for a ledger store instance.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// On-disk schema version; a mismatch resets the database.
    pub db_version: u8,
    /// Trie pruning mode.
    pub pruning_mode: PruningMode,
    /// Run an incremental pruning pass after every committed block.
    pub live_pruning: bool,
    /// Number of recent headers retained by the in-memory header cache.
    pub header_cache_size: u64,
    /// Donation adjustment interval in blocks.
    pub reward_adjust_interval: u64,
    /// Account whose balance drives the donation amount.
    pub treasury_address: Address,
    /// Donation emission dividend factor.
    pub donation_dividend: i64,
    /// Donation emission divisor factor.
    pub donation_divisor: i64,
    /// Asset identifier of the native token.
    pub native_asset: Hash256,
    /// Number of most recent state roots never pruned.
    pub recent_state_count: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quill");

        Self {
            data_dir,
            db_version: DB_VERSION,
            pruning_mode: PruningMode::LowMemory,
            live_pruning: false,
            header_cache_size: DEFAULT_HEADER_CACHE_SIZE,
            reward_adjust_interval: DEFAULT_REWARD_ADJUST_INTERVAL,
            treasury_address: Address::ZERO,
            donation_dividend: DEFAULT_DONATION_DIVIDEND,
            donation_divisor: DEFAULT_DONATION_DIVISOR,
            native_asset: NATIVE_ASSET_ID,
            recent_state_count: DEFAULT_RECENT_STATE_COUNT,
        }
    }
}

impl StoreConfig {
    /// Path to the RocksDB chain data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chaindata")
    }
}
