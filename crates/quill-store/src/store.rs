//! The ledger store coordinator.
//!
//! [`ChainStore`] persists blocks through one atomic batch per block,
//! enforces the declared-vs-computed state root gate before anything becomes
//! durable, maintains the chain pointer and header cache, coordinates trie
//! pruning with resumable cursors, and serves the read API.
//!
//! The store is generic over the key-value engine and the state backend; the
//! [`RocksChainStore`] alias wires in the defaults.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use quill_core::error::{ConsistencyError, StoreError};
use quill_core::traits::{KvStore, PruneJob, PruningStrategy, StateBackend, StateView, WriteBatch};
use quill_core::types::{Address, Amount, Block, Hash256, Header, Transaction, TrimmedBlock};

use crate::config::{PruningMode, StoreConfig};
use crate::donation::{self, Donation};
use crate::engine::RocksEngine;
use crate::header_cache::HeaderCache;
use crate::keys;
use crate::state::SnapshotStateBackend;

/// Chain pointer and header cache, guarded together.
///
/// Never exposed directly; every access goes through the store's accessor
/// operations under one reader/writer lock.
struct Shared {
    current_hash: Hash256,
    current_height: u64,
    header_cache: HeaderCache,
}

/// The durable ledger store.
///
/// Single-writer: block submission takes `&mut self` and concurrent
/// submissions on one instance are not supported; the consensus driver
/// applies one block at a time. Reads of the in-memory pointer and header
/// cache take the shared lock; durable reads go straight to the engine and
/// rely on its snapshot isolation during an in-flight batch.
pub struct ChainStore<K: KvStore, B: StateBackend> {
    engine: Arc<K>,
    backend: B,
    config: StoreConfig,
    shared: RwLock<Shared>,
    view: B::View,
}

/// The default pairing: RocksDB engine with the snapshot state backend.
pub type RocksChainStore = ChainStore<RocksEngine, SnapshotStateBackend<RocksEngine>>;

impl RocksChainStore {
    /// Open the default engine and backend at the configured path.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let engine = Arc::new(RocksEngine::open(config.db_path())?);
        let backend = SnapshotStateBackend::new(engine.clone());
        Self::new(engine, backend, config)
    }
}

impl<K: KvStore, B: StateBackend> ChainStore<K, B> {
    /// Construct a store over an engine and state backend. The store starts
    /// at the empty state; call [`init_with_genesis`](Self::init_with_genesis)
    /// or [`load_existing`](Self::load_existing) before serving reads.
    pub fn new(engine: Arc<K>, backend: B, config: StoreConfig) -> Result<Self, StoreError> {
        let view = backend.view_at(Hash256::ZERO)?;
        Ok(Self {
            engine,
            backend,
            config,
            shared: RwLock::new(Shared {
                current_hash: Hash256::ZERO,
                current_height: 0,
                header_cache: HeaderCache::new(),
            }),
            view,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------

    /// Initialize against a genesis block.
    ///
    /// A schema-version mismatch (or a fresh database) resets everything and
    /// persists the genesis block; otherwise the chain pointer, state root,
    /// and view handle are reloaded and the configured pruning mode's
    /// startup pass runs. Returns the current height.
    pub fn init_with_genesis(&mut self, genesis: &Block) -> Result<u64, StoreError> {
        let stored = self.engine.get(&keys::version())?;
        let version_ok = matches!(stored.as_deref(), Some([v]) if *v == self.config.db_version);
        debug!(version = self.config.db_version, found = ?stored, "database version check");

        if !version_ok {
            self.reset()?;
            self.view = self.backend.view_at(Hash256::ZERO)?;
            self.persist(genesis)?;
            self.engine.put(&keys::version(), &[self.config.db_version])?;

            let mut shared = self.shared.write();
            shared.current_hash = genesis.hash();
            shared.current_height = 0;
            shared.header_cache.insert(genesis.header.clone());
            info!(hash = %genesis.hash(), "initialized from genesis");
            return Ok(0);
        }

        if !self.engine.contains(&keys::header(&genesis.hash()))? {
            return Err(StoreError::GenesisMissing);
        }

        let height = self.load_existing()?;

        match self.config.pruning_mode {
            PruningMode::LowMemory => self.prune_low_memory(true)?,
            PruningMode::Disabled => {}
        }

        Ok(height)
    }

    /// Reload the chain pointer, header cache seed, and state-view handle
    /// from durable storage. Used on startup over an existing database and
    /// by offline maintenance tooling.
    pub fn load_existing(&mut self) -> Result<u64, StoreError> {
        let (hash, height) = self.chain_pointer_from_db()?;
        let header = self.get_header(&hash)?;
        let root = self.current_state_root()?;
        info!(height, %hash, %root, "loaded chain state");

        self.view = self.backend.view_at(root)?;

        let mut shared = self.shared.write();
        shared.current_hash = hash;
        shared.current_height = height;
        shared.header_cache.insert(header);
        Ok(height)
    }

    /// Delete every key in the database with one atomic batch.
    pub fn reset(&self) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        for (key, _) in self.engine.scan_prefix(&[])? {
            batch.delete(key);
        }
        if !batch.is_empty() {
            warn!(records = batch.len(), "resetting database");
            self.engine.write(batch)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Persistence pipeline
    // ------------------------------------------------------------------

    /// Validate and durably commit one block.
    ///
    /// All validation (payload kinds, the state-root gate, donation
    /// continuity) completes before anything is staged, so a failure leaves
    /// the committed namespaces byte-for-byte unchanged. On success the
    /// in-memory state-view handle is replaced; the caller advances the
    /// pointer and cache.
    fn persist(&mut self, block: &Block) -> Result<(), StoreError> {
        let block_hash = block.hash();
        let height = block.header.height;

        for tx in &block.transactions {
            tx.kind()?;
        }

        let candidate = self.view.apply_block(block, height != 0)?;
        let computed = candidate.root();
        if computed != block.header.state_root {
            return Err(ConsistencyError::StateRootMismatch {
                computed: computed.to_string(),
                declared: block.header.state_root.to_string(),
            }
            .into());
        }

        // Donation amounts read the pre-block view, so this must run before
        // the view handle is replaced.
        let donation = if height % self.config.reward_adjust_interval == 0 {
            Some(self.calc_next_donation(height)?)
        } else {
            None
        };

        let mut batch = WriteBatch::new();
        batch.put(keys::header(&block_hash), block.trim()?.encode()?);
        batch.put(keys::block_hash(height), block_hash.as_bytes().to_vec());

        for tx in &block.transactions {
            let encoded = tx.encode()?;
            let mut record = Vec::with_capacity(8 + encoded.len());
            record.extend_from_slice(&height.to_le_bytes());
            record.extend_from_slice(&encoded);
            batch.put(keys::transaction(&tx.hash()?), record);
        }

        batch.put(keys::current_root(), computed.as_bytes().to_vec());

        if let Some(donation) = &donation {
            batch.put(keys::donation(donation.height), donation.encode()?);
        }

        let mut pointer = Vec::with_capacity(40);
        pointer.extend_from_slice(block_hash.as_bytes());
        pointer.extend_from_slice(&height.to_le_bytes());
        batch.put(keys::chain_pointer(), pointer);

        // State data first (content-addressed; an orphan left by a batch
        // failure is unreachable garbage, reclaimed by pruning), then the
        // chain namespaces in one atomic commit.
        candidate.commit()?;
        self.engine.write(batch)?;

        self.view = candidate;
        debug!(height, hash = %block_hash, txs = block.transactions.len(), "block persisted");
        Ok(())
    }

    /// Persist a block and advance the chain.
    ///
    /// Between the durable commit and the in-memory pointer update there is
    /// a brief window where [`chain_pointer_from_db`](Self::chain_pointer_from_db)
    /// already names the new block while [`current_height`](Self::current_height)
    /// still reports the previous one; readers that need commit-ordered
    /// truth use the durable path.
    pub fn submit_block(&mut self, block: &Block) -> Result<(), StoreError> {
        self.persist(block)?;

        let block_hash = block.hash();
        let height = block.header.height;
        {
            let mut shared = self.shared.write();
            shared.current_hash = block_hash;
            shared.current_height = height;
            if height > self.config.header_cache_size {
                shared
                    .header_cache
                    .remove_height(height - self.config.header_cache_size);
            }
            shared.header_cache.insert(block.header.clone());
        }
        info!(height, hash = %block_hash, "block committed");

        if self.config.live_pruning && self.config.pruning_mode == PruningMode::LowMemory {
            self.prune_low_memory(false)?;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Chain pointer
    // ------------------------------------------------------------------

    /// Hash of the last durable block, as tracked in memory.
    pub fn current_block_hash(&self) -> Hash256 {
        self.shared.read().current_hash
    }

    /// Height of the last durable block, as tracked in memory.
    pub fn current_height(&self) -> u64 {
        self.shared.read().current_height
    }

    /// The chain pointer as durably recorded by the engine.
    pub fn chain_pointer_from_db(&self) -> Result<(Hash256, u64), StoreError> {
        let bytes = self
            .engine
            .get(&keys::chain_pointer())?
            .ok_or(StoreError::PointerNotFound)?;
        if bytes.len() != 40 {
            return Err(StoreError::Decode(format!(
                "chain pointer length {}",
                bytes.len()
            )));
        }
        let hash = Hash256::from_slice(&bytes[..32])?;
        let height = u64::from_le_bytes(bytes[32..].try_into().expect("checked length"));
        Ok((hash, height))
    }

    /// The current state root as durably recorded.
    pub fn current_state_root(&self) -> Result<Hash256, StoreError> {
        let bytes = self
            .engine
            .get(&keys::current_root())?
            .ok_or(StoreError::RootNotFound)?;
        Hash256::from_slice(&bytes)
    }

    // ------------------------------------------------------------------
    // Read API
    // ------------------------------------------------------------------

    /// Block hash at a height, from the height index.
    pub fn get_block_hash(&self, height: u64) -> Result<Hash256, StoreError> {
        let bytes = self
            .engine
            .get(&keys::block_hash(height))?
            .ok_or_else(|| StoreError::BlockNotFound(format!("height {height}")))?;
        Hash256::from_slice(&bytes)
    }

    /// Header by block hash, from durable storage.
    pub fn get_header(&self, hash: &Hash256) -> Result<Header, StoreError> {
        let bytes = self
            .engine
            .get(&keys::header(hash))?
            .ok_or_else(|| StoreError::HeaderNotFound(hash.to_string()))?;
        Ok(TrimmedBlock::decode(&bytes)?.header)
    }

    /// Header at a height, via the height index.
    pub fn get_header_by_height(&self, height: u64) -> Result<Header, StoreError> {
        self.get_header(&self.get_block_hash(height)?)
    }

    /// Reassemble a full block: trimmed header plus the separately stored
    /// transactions, in their original order.
    pub fn get_block(&self, hash: &Hash256) -> Result<Block, StoreError> {
        let bytes = self
            .engine
            .get(&keys::header(hash))?
            .ok_or_else(|| StoreError::BlockNotFound(hash.to_string()))?;
        let trimmed = TrimmedBlock::decode(&bytes)?;

        let mut transactions = Vec::with_capacity(trimmed.tx_hashes.len());
        for tx_hash in &trimmed.tx_hashes {
            let (tx, _) = self.get_tx(tx_hash)?;
            transactions.push(tx);
        }

        Ok(Block {
            header: trimmed.header,
            transactions,
        })
    }

    pub fn get_block_by_height(&self, height: u64) -> Result<Block, StoreError> {
        self.get_block(&self.get_block_hash(height)?)
    }

    /// A stored transaction, with its height prefix stripped.
    pub fn get_transaction(&self, hash: &Hash256) -> Result<Transaction, StoreError> {
        Ok(self.get_tx(hash)?.0)
    }

    /// A stored transaction together with its inclusion height.
    pub fn get_tx(&self, hash: &Hash256) -> Result<(Transaction, u64), StoreError> {
        let bytes = self
            .engine
            .get(&keys::transaction(hash))?
            .ok_or_else(|| StoreError::TransactionNotFound(hash.to_string()))?;
        if bytes.len() < 8 {
            return Err(StoreError::Decode(format!(
                "transaction record length {}",
                bytes.len()
            )));
        }
        let height = u64::from_le_bytes(bytes[..8].try_into().expect("checked length"));
        let tx = Transaction::decode(&bytes[8..])?;
        Ok((tx, height))
    }

    /// Whether a transaction hash is already present: the duplicate
    /// submission check.
    pub fn is_tx_duplicate(&self, hash: &Hash256) -> Result<bool, StoreError> {
        self.engine.contains(&keys::transaction(hash))
    }

    /// Height of a block by hash: header cache first, durable fallback.
    pub fn get_height_by_block_hash(&self, hash: &Hash256) -> Result<u64, StoreError> {
        if let Some(header) = self.shared.read().header_cache.get(hash) {
            return Ok(header.height);
        }
        Ok(self.get_header(hash)?.height)
    }

    /// Whether a block is durably in the chain.
    ///
    /// False both when the header is absent and when its height exceeds the
    /// current chain height: a cached-but-not-yet-finalized header is not in
    /// the store.
    pub fn is_block_in_store(&self, hash: &Hash256) -> bool {
        match self.get_header(hash) {
            Ok(header) => header.height <= self.current_height(),
            Err(_) => false,
        }
    }

    /// Declared state roots for an inclusive height range.
    pub fn get_state_roots(&self, from: u64, to: u64) -> Result<Vec<Hash256>, StoreError> {
        if to < from {
            return Err(ConsistencyError::InvertedRange { from, to }.into());
        }

        let mut roots = Vec::with_capacity((to - from + 1) as usize);
        for height in from..=to {
            roots.push(self.get_header_by_height(height)?.state_root);
        }
        Ok(roots)
    }

    // ------------------------------------------------------------------
    // Header cache
    // ------------------------------------------------------------------

    /// Cache a header received ahead of body finality.
    pub fn add_header(&self, header: Header) {
        self.shared.write().header_cache.insert(header);
    }

    /// A header from the cache only; miss means "fall back to the durable
    /// path", never corruption.
    pub fn header_with_cache(&self, hash: &Hash256) -> Result<Header, StoreError> {
        self.shared
            .read()
            .header_cache
            .get(hash)
            .ok_or_else(|| StoreError::HeaderNotFound(hash.to_string()))
    }

    /// Highest height known to the header cache.
    pub fn cached_header_height(&self) -> u64 {
        self.shared.read().header_cache.current_height()
    }

    /// Hash of the highest cached header.
    pub fn cached_header_hash(&self) -> Hash256 {
        self.shared.read().header_cache.current_hash()
    }

    /// Cached hash at a height, if within the window.
    pub fn cached_hash_at(&self, height: u64) -> Option<Hash256> {
        self.shared.read().header_cache.hash_at(height)
    }

    // ------------------------------------------------------------------
    // State queries
    // ------------------------------------------------------------------

    /// Native-asset balance of an account in the live view.
    pub fn balance(&self, address: &Address) -> Amount {
        self.view.balance(&self.config.native_asset, address)
    }

    pub fn balance_of(&self, asset: &Hash256, address: &Address) -> Amount {
        self.view.balance(asset, address)
    }

    pub fn nonce(&self, address: &Address) -> u64 {
        self.view.nonce(address)
    }

    pub fn identity(&self, address: &Address) -> Option<Vec<u8>> {
        self.view.identity(address)
    }

    pub fn nano_pay(
        &self,
        sender: &Address,
        recipient: &Address,
        nonce: u64,
    ) -> Result<(Amount, u64), StoreError> {
        self.view.nano_pay(sender, recipient, nonce)
    }

    // ------------------------------------------------------------------
    // Donation accounting
    // ------------------------------------------------------------------

    /// The donation record effective at the current height.
    pub fn current_donation(&self) -> Result<Donation, StoreError> {
        let interval = self.config.reward_adjust_interval;
        let boundary = self.current_height() / interval * interval;
        let bytes = self
            .engine
            .get(&keys::donation(boundary))?
            .ok_or(StoreError::DonationNotFound(boundary))?;
        Donation::decode(&bytes)
    }

    /// Compute the donation record taking effect at `height`.
    ///
    /// Genesis has no emission. Past genesis the previous record must sit at
    /// exactly `height - interval`; a gap means a skipped adjustment
    /// boundary or over-pruned donation history and fails the operation.
    pub fn calc_next_donation(&self, height: u64) -> Result<Donation, StoreError> {
        if height == 0 {
            return Ok(Donation::new(0, Amount::ZERO));
        }

        let interval = self.config.reward_adjust_interval;
        let last = self.current_donation()?;
        if last.height + interval != height {
            return Err(ConsistencyError::DonationGap {
                expected: height.saturating_sub(interval),
                found: last.height,
            }
            .into());
        }

        let treasury = self
            .view
            .balance(&self.config.native_asset, &self.config.treasury_address);
        let amount = donation::per_block_emission(
            treasury,
            self.config.donation_dividend,
            self.config.donation_divisor,
            interval,
        );
        Ok(Donation::new(height, amount))
    }

    // ------------------------------------------------------------------
    // Pruning
    // ------------------------------------------------------------------

    fn cursor(&self, key: &[u8]) -> Result<Option<u64>, StoreError> {
        match self.engine.get(key)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::Decode(format!("cursor length {}", bytes.len())))?;
                Ok(Some(u64::from_le_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    /// Resume points for the reference-count and pruning passes.
    ///
    /// Stored cursors record the last height a pass completed; the next pass
    /// starts one past that. An absent cursor means the pass never ran and
    /// starts at zero; absence is not an error.
    pub fn pruning_start_heights(&self) -> Result<(u64, u64), StoreError> {
        let ref_count_start = self.cursor(&keys::ref_count_height())?.map_or(0, |h| h + 1);
        let pruning_start = self.cursor(&keys::pruned_height())?.map_or(0, |h| h + 1);
        Ok((ref_count_start, pruning_start))
    }

    /// Height through which physical compaction has run.
    pub fn compacted_height(&self) -> Result<u64, StoreError> {
        Ok(self.cursor(&keys::compacted_height())?.unwrap_or(0))
    }

    /// Low-memory pruning pass. `full` sweeps the entire history (used once
    /// at startup or after a mode switch); otherwise the pass resumes from
    /// the persisted cursor and handles only the new increment.
    pub fn prune_low_memory(&mut self, full: bool) -> Result<(), StoreError> {
        self.prune_with_strategy(PruningStrategy::LowMemory, full)
    }

    /// Bulk reference-count pruning. Not in use due to high memory usage;
    /// use [`prune_low_memory`](Self::prune_low_memory) instead.
    pub fn prune_bulk_refcount(&mut self) -> Result<(), StoreError> {
        warn!("bulk reference-count pruning is deprecated");
        self.prune_with_strategy(PruningStrategy::RefCount, true)
    }

    /// Sequential bulk pruning. Not in use due to high memory usage; use
    /// [`prune_low_memory`](Self::prune_low_memory) instead.
    pub fn prune_sequential(&mut self) -> Result<(), StoreError> {
        warn!("sequential pruning is deprecated");
        self.prune_with_strategy(PruningStrategy::Sequential, true)
    }

    fn prune_with_strategy(
        &mut self,
        strategy: PruningStrategy,
        full: bool,
    ) -> Result<(), StoreError> {
        let current = self.current_height();
        let (_, pruning_start) = self.pruning_start_heights()?;
        let start = if full { 0 } else { pruning_start };

        // Roots within the retention window (always including the current
        // root) must survive every pass.
        let retain_from = current.saturating_sub(self.config.recent_state_count);
        if start >= retain_from {
            debug!(start, retain_from, "no heights eligible for pruning");
            return Ok(());
        }
        let end = retain_from - 1;

        let release = self.get_state_roots(start, end)?;
        let retain = self.get_state_roots(retain_from, current)?;
        let released = self.backend.prune(&PruneJob {
            strategy,
            retain: &retain,
            release: &release,
        })?;

        // Cursors are monotone: a full re-sweep over already-pruned history
        // must not move them backwards, and `end` is below the current
        // height by construction.
        let through = end.max(pruning_start.saturating_sub(1));
        let mut batch = WriteBatch::new();
        batch.put(keys::ref_count_height(), through.to_le_bytes().to_vec());
        batch.put(keys::pruned_height(), through.to_le_bytes().to_vec());
        self.engine.write(batch)?;
        info!(?strategy, start, through, released, "pruning pass complete");

        if full && released > 0 {
            self.compact_through(through)?;
        }
        Ok(())
    }

    /// Manually compact the engine and record the compaction height.
    /// Intended for low-activity windows or offline maintenance.
    pub fn compact_storage(&self) -> Result<(), StoreError> {
        self.compact_through(self.current_height())
    }

    fn compact_through(&self, height: u64) -> Result<(), StoreError> {
        self.engine.compact()?;
        self.engine
            .put(&keys::compacted_height(), &height.to_le_bytes())?;
        debug!(height, "storage compacted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Maintenance diagnostics
    // ------------------------------------------------------------------

    /// Check that everything reachable from the current root is present and
    /// decodable. Reports corruption; never repairs.
    pub fn verify_state(&self) -> Result<(), StoreError> {
        self.backend.verify_reachable(self.current_state_root()?)
    }

    /// Read-only walk of the state at the current height's root. Returns
    /// the number of records visited.
    pub fn traverse_state(&self) -> Result<u64, StoreError> {
        let (_, height) = self.chain_pointer_from_db()?;
        let roots = self.get_state_roots(height, height)?;
        self.backend.traverse(roots[0])
    }
}
