//! # quill-store — Durable ledger store: persistence, header cache, pruning.
//!
//! Composes the ledger-store subsystems around one RocksDB database:
//! - [`store::ChainStore`] — atomic block persistence and the read API
//! - [`header_cache::HeaderCache`] — bounded pre-finality header window
//! - [`engine::RocksEngine`] — the key-value engine behind the store
//! - [`state::SnapshotStateBackend`] — reference account-state backend
//! - [`config::StoreConfig`] — injected store configuration

pub mod config;
pub mod donation;
pub mod engine;
pub mod header_cache;
pub mod keys;
pub mod state;
pub mod store;

pub use config::{PruningMode, StoreConfig};
pub use donation::Donation;
pub use engine::RocksEngine;
pub use header_cache::HeaderCache;
pub use state::SnapshotStateBackend;
pub use store::{ChainStore, RocksChainStore};
