//! Error types for the Quill ledger store.
use thiserror::Error;

/// Cross-namespace consistency violations.
///
/// These indicate either a consensus-level fault upstream or storage
/// corruption. They abort the in-progress operation before any further
/// mutation and are never swallowed or retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("state root mismatch: computed {computed}, declared {declared}")]
    StateRootMismatch { computed: String, declared: String },
    #[error("donation out of sequence: expected predecessor at height {expected}, found height {found}")]
    DonationGap { expected: u64, found: u64 },
    #[error("unsupported transaction type: {0}")] UnsupportedPayload(u16),
    #[error("inverted state root range: {from} > {to}")] InvertedRange { from: u64, to: u64 },
}

/// Fatal configuration errors. The store refuses to initialize on these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown state pruning mode: {0:?}")] UnknownPruningMode(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)] Consistency(#[from] ConsistencyError),
    #[error(transparent)] Config(#[from] ConfigError),
    #[error("block not found: {0}")] BlockNotFound(String),
    #[error("header not found: {0}")] HeaderNotFound(String),
    #[error("transaction not found: {0}")] TransactionNotFound(String),
    #[error("no donation record at height {0}")] DonationNotFound(u64),
    #[error("chain pointer not initialized")] PointerNotFound,
    #[error("current state root not recorded")] RootNotFound,
    #[error("unknown state root: {0}")] UnknownStateRoot(String),
    #[error("genesis block is not in the store")] GenesisMissing,
    #[error("encode: {0}")] Encode(String),
    #[error("decode: {0}")] Decode(String),
    #[error("state transition: {0}")] State(String),
    #[error("storage engine: {0}")] Engine(String),
}

impl StoreError {
    /// Whether this error means "the key does not exist" rather than a
    /// failure. Callers with a fallback path (e.g. header cache miss) branch
    /// on this instead of treating the miss as corruption.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::BlockNotFound(_)
                | StoreError::HeaderNotFound(_)
                | StoreError::TransactionNotFound(_)
                | StoreError::DonationNotFound(_)
                | StoreError::PointerNotFound
                | StoreError::RootNotFound
        )
    }
}
