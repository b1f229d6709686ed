//! Key namespace of the ledger store.
//!
//! Every durable record lives under a one-byte prefix. Heights are encoded
//! big-endian so that forward iteration within a prefix walks the chain in
//! height order.

use quill_core::types::Hash256;

const PREFIX_VERSION: u8 = 0x00;
const PREFIX_HEADER: u8 = 0x01;
const PREFIX_BLOCK_HASH: u8 = 0x02;
const PREFIX_TRANSACTION: u8 = 0x03;
const PREFIX_CURRENT_ROOT: u8 = 0x04;
const PREFIX_CHAIN_POINTER: u8 = 0x05;
const PREFIX_DONATION: u8 = 0x06;
const PREFIX_REF_COUNT_HEIGHT: u8 = 0x07;
const PREFIX_PRUNED_HEIGHT: u8 = 0x08;
const PREFIX_COMPACTED_HEIGHT: u8 = 0x09;
const PREFIX_STATE_SNAPSHOT: u8 = 0x10;

fn hash_key(prefix: u8, hash: &Hash256) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(prefix);
    key.extend_from_slice(hash.as_bytes());
    key
}

fn height_key(prefix: u8, height: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(prefix);
    key.extend_from_slice(&height.to_be_bytes());
    key
}

/// Schema version marker.
pub fn version() -> Vec<u8> {
    vec![PREFIX_VERSION]
}

/// Trimmed block (header + transaction hashes) by block hash.
pub fn header(hash: &Hash256) -> Vec<u8> {
    hash_key(PREFIX_HEADER, hash)
}

/// Height → block hash index.
pub fn block_hash(height: u64) -> Vec<u8> {
    height_key(PREFIX_BLOCK_HASH, height)
}

/// Height-prefixed transaction record by transaction hash.
pub fn transaction(hash: &Hash256) -> Vec<u8> {
    hash_key(PREFIX_TRANSACTION, hash)
}

/// Current state root.
pub fn current_root() -> Vec<u8> {
    vec![PREFIX_CURRENT_ROOT]
}

/// Current chain pointer (hash + height).
pub fn chain_pointer() -> Vec<u8> {
    vec![PREFIX_CHAIN_POINTER]
}

/// Donation record by height.
pub fn donation(height: u64) -> Vec<u8> {
    height_key(PREFIX_DONATION, height)
}

/// Last height whose trie references have been counted.
pub fn ref_count_height() -> Vec<u8> {
    vec![PREFIX_REF_COUNT_HEIGHT]
}

/// Last height whose unreachable trie nodes have been pruned.
pub fn pruned_height() -> Vec<u8> {
    vec![PREFIX_PRUNED_HEIGHT]
}

/// Last height through which physical compaction has run.
pub fn compacted_height() -> Vec<u8> {
    vec![PREFIX_COMPACTED_HEIGHT]
}

/// State snapshot by root (reference backend namespace).
pub fn state_snapshot(root: &Hash256) -> Vec<u8> {
    hash_key(PREFIX_STATE_SNAPSHOT, root)
}

/// Prefix of the state snapshot namespace, for maintenance scans.
pub fn state_snapshot_prefix() -> Vec<u8> {
    vec![PREFIX_STATE_SNAPSHOT]
}
