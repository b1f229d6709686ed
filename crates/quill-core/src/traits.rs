//! Trait seams between the ledger store and its collaborators:
//! - [`KvStore`] — the key-value engine underneath the store
//! - [`StateView`] / [`StateBackend`] — the versioned account-state trie
//!
//! The coordinator in quill-store is generic over both, so a production
//! deployment can swap in a real trie or a different engine without touching
//! the persistence pipeline.

use crate::error::StoreError;
use crate::types::{Address, Amount, Block, Hash256};

/// A single staged engine operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// An engine-agnostic set of writes committed atomically.
///
/// Staging is pure in-memory bookkeeping; nothing becomes durable until the
/// batch is handed to [`KvStore::write`], which applies every operation or
/// none of them.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Key-value engine contract.
///
/// An opaque byte-key store with point operations, atomic batch writes, and
/// forward iteration. Concurrent point reads during an in-flight batch must
/// be safe (snapshot-style isolation); everything else is the caller's
/// discipline.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Apply every operation in the batch atomically.
    fn write(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Forward scan of all keys starting with `prefix`, in key order.
    /// An empty prefix scans the whole keyspace.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Whether a key exists. Default delegates to [`get`](Self::get).
    fn contains(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// Reclaim physical space after deletions. Default is a no-op for
    /// engines without a compaction concept.
    fn compact(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// One immutable snapshot of the account state, identified by its root.
///
/// A view is never mutated: applying a block yields a new candidate view,
/// and the store replaces its handle wholesale after a successful commit.
pub trait StateView: Send + Sync {
    /// The root digest identifying this snapshot.
    fn root(&self) -> Hash256;

    /// Balance of an account for a given asset. Missing accounts are zero.
    fn balance(&self, asset: &Hash256, address: &Address) -> Amount;

    /// Current nonce of an account. Missing accounts are zero.
    fn nonce(&self, address: &Address) -> u64;

    /// Registered identity blob of an account, if any.
    fn identity(&self, address: &Address) -> Option<Vec<u8>>;

    /// Remaining balance and expiration of a payment channel.
    fn nano_pay(
        &self,
        sender: &Address,
        recipient: &Address,
        nonce: u64,
    ) -> Result<(Amount, u64), StoreError>;

    /// Apply a block's transactions, yielding the candidate successor view.
    ///
    /// `check_supply` is false only for genesis, which predates any reward
    /// schedule. The candidate is in-memory only until [`commit`](Self::commit).
    fn apply_block(&self, block: &Block, check_supply: bool) -> Result<Self, StoreError>
    where
        Self: Sized;

    /// Make this view's state data durable. Content-addressed by root, so a
    /// committed snapshot that never gets referenced by a block is
    /// unreachable garbage for the pruner, not corruption.
    fn commit(&self) -> Result<(), StoreError>;
}

/// Trie maintenance strategy, capability-polymorphic behind
/// [`StateBackend::prune`].
///
/// Only `LowMemory` is selectable through configuration; the bulk
/// strategies are deprecated, retained for migration and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruningStrategy {
    /// Incremental pass with memory bounded independent of trie size.
    LowMemory,
    /// Deprecated: exact reference counts over the whole trie in memory.
    RefCount,
    /// Deprecated: sequential bulk sweep.
    Sequential,
}

/// One pruning pass, prepared by the coordinator.
#[derive(Debug, Clone)]
pub struct PruneJob<'a> {
    pub strategy: PruningStrategy,
    /// Roots that must stay fully reachable after the pass.
    pub retain: &'a [Hash256],
    /// Roots whose exclusively-owned nodes may be reclaimed.
    pub release: &'a [Hash256],
}

/// Factory and maintenance surface of the versioned state store.
pub trait StateBackend: Send + Sync {
    type View: StateView;

    /// Open the snapshot identified by `root`. The zero root is the empty
    /// state and always exists.
    fn view_at(&self, root: Hash256) -> Result<Self::View, StoreError>;

    /// Run one pruning pass. Returns the number of records released.
    ///
    /// Must be idempotent: releasing an already-released root is a no-op,
    /// and nothing reachable from a retained root may ever be touched.
    fn prune(&self, job: &PruneJob<'_>) -> Result<u64, StoreError>;

    /// Verify that everything reachable from `root` is present and
    /// decodable. Diagnostic only; reports corruption, never repairs.
    fn verify_reachable(&self, root: Hash256) -> Result<(), StoreError>;

    /// Read-only walk of the snapshot at `root`. Returns the number of
    /// records visited.
    fn traverse(&self, root: Hash256) -> Result<u64, StoreError>;
}
