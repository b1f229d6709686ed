//! Ledger types: hashes, addresses, amounts, transactions, headers, blocks.
//!
//! Blocks are stored in trimmed form (header plus transaction hashes); full
//! transactions are stored separately and reassembled on read. All stored
//! records use bincode with the standard config.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{ConsistencyError, StoreError};

/// A 32-byte digest.
///
/// Used for transaction ids and state roots (BLAKE3) and block header
/// hashes (double SHA-256).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero digest. Used as the empty-state root and the null pointer.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse from a stored byte slice. Fails unless exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, StoreError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| StoreError::Decode(format!("digest length {}", bytes.len())))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A 20-byte account address.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The zero address. Coinbase transfers originate here.
    pub const ZERO: Self = Self([0u8; 20]);

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A fixed-point monetary amount in units (1 coin = 10^8 units).
///
/// Signed so that intermediate accounting deltas can go negative; persisted
/// balances are non-negative by construction.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Amount(pub i64);

impl Amount {
    pub const ZERO: Self = Self(0);

    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08}", self.0 / crate::constants::COIN, (self.0 % crate::constants::COIN).unsigned_abs())
    }
}

/// The recognized transaction payload kinds.
///
/// Transactions carry a raw `u16` tag on the wire and in storage; mapping an
/// unknown tag to this enumeration fails, which rejects the whole block
/// during persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Coinbase,
    SigChain,
    TransferAsset,
    IssueAsset,
    RegisterName,
    TransferName,
    DeleteName,
    Subscribe,
    Unsubscribe,
    GenerateId,
    NanoPay,
}

impl PayloadKind {
    /// The wire/storage tag for this kind.
    pub fn tag(self) -> u16 {
        match self {
            Self::Coinbase => 0,
            Self::SigChain => 1,
            Self::TransferAsset => 2,
            Self::IssueAsset => 3,
            Self::RegisterName => 4,
            Self::TransferName => 5,
            Self::DeleteName => 6,
            Self::Subscribe => 7,
            Self::Unsubscribe => 8,
            Self::GenerateId => 9,
            Self::NanoPay => 10,
        }
    }

    /// Map a raw tag back to a kind. `None` means the tag is unrecognized
    /// and the carrying transaction must be rejected.
    pub fn from_tag(tag: u16) -> Option<Self> {
        match tag {
            0 => Some(Self::Coinbase),
            1 => Some(Self::SigChain),
            2 => Some(Self::TransferAsset),
            3 => Some(Self::IssueAsset),
            4 => Some(Self::RegisterName),
            5 => Some(Self::TransferName),
            6 => Some(Self::DeleteName),
            7 => Some(Self::Subscribe),
            8 => Some(Self::Unsubscribe),
            9 => Some(Self::GenerateId),
            10 => Some(Self::NanoPay),
            _ => None,
        }
    }
}

/// Value movement payload, shared by coinbase and transfer transactions.
/// Coinbase transfers originate from [`Address::ZERO`].
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TransferPayload {
    pub asset: Hash256,
    pub sender: Address,
    pub recipient: Address,
    pub amount: Amount,
}

/// Identity registration payload.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct GenerateIdPayload {
    pub address: Address,
    pub public_key: Vec<u8>,
    pub registration_fee: Amount,
}

/// Payment channel settlement payload.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct NanoPayPayload {
    pub sender: Address,
    pub recipient: Address,
    pub id: u64,
    pub amount: Amount,
    pub expiration: u64,
}

fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Encode(e.to_string()))
}

fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Decode(e.to_string()))?;
    Ok(value)
}

impl TransferPayload {
    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        decode(bytes)
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        encode(self)
    }
}

impl GenerateIdPayload {
    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        decode(bytes)
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        encode(self)
    }
}

impl NanoPayPayload {
    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        decode(bytes)
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        encode(self)
    }
}

/// A ledger transaction.
///
/// The payload is opaque to the store except for its kind tag; payload
/// semantics belong to the state view.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Protocol version.
    pub version: u64,
    /// Raw payload kind tag; see [`PayloadKind::from_tag`].
    pub payload_tag: u16,
    /// Serialized payload bytes.
    pub payload: Vec<u8>,
    /// Sender account nonce.
    pub nonce: u64,
    /// Signature material, opaque to the store.
    pub signature: Vec<u8>,
}

impl Transaction {
    /// Content hash (BLAKE3 of the canonical bincode encoding).
    pub fn hash(&self) -> Result<Hash256, StoreError> {
        Ok(Hash256(blake3::hash(&encode(self)?).into()))
    }

    /// The payload kind, or an `UnsupportedPayload` consistency violation
    /// for an unrecognized tag.
    pub fn kind(&self) -> Result<PayloadKind, ConsistencyError> {
        PayloadKind::from_tag(self.payload_tag)
            .ok_or(ConsistencyError::UnsupportedPayload(self.payload_tag))
    }
}

/// Block header.
///
/// The hash covers the unsigned fields in a fixed byte layout; the signer
/// and signature are carried opaquely and checked upstream by consensus.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Header {
    /// Protocol version.
    pub version: u64,
    /// Hash of the previous block header.
    pub prev_hash: Hash256,
    /// Declared root of the account state after this block.
    pub state_root: Hash256,
    /// Merkle root of the block's transactions.
    pub tx_root: Hash256,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Block height.
    pub height: u64,
    /// Proposer public key, opaque to the store.
    pub signer: Vec<u8>,
    /// Proposer signature, opaque to the store.
    pub signature: Vec<u8>,
}

impl Header {
    /// Size of the fixed hashing layout (3 u64 fields + 3 32-byte digests).
    const HASH_SIZE: usize = 3 * 8 + 3 * 32;

    /// Block header hash (double SHA-256 over the unsigned fields).
    ///
    /// Layout: version || prev_hash || state_root || tx_root || timestamp ||
    /// height, integers little-endian.
    pub fn hash(&self) -> Hash256 {
        let mut data = Vec::with_capacity(Self::HASH_SIZE);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(self.prev_hash.as_bytes());
        data.extend_from_slice(self.state_root.as_bytes());
        data.extend_from_slice(self.tx_root.as_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&self.height.to_le_bytes());
        let first = Sha256::digest(&data);
        Hash256(Sha256::digest(first).into())
    }
}

/// A complete block: header plus ordered transactions.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// The trimmed storage form: header plus transaction hashes.
    pub fn trim(&self) -> Result<TrimmedBlock, StoreError> {
        let tx_hashes = self
            .transactions
            .iter()
            .map(|tx| tx.hash())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TrimmedBlock {
            header: self.header.clone(),
            tx_hashes,
        })
    }
}

/// The stored form of a block: full transactions live under their own keys
/// and are rejoined on read.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TrimmedBlock {
    pub header: Header,
    pub tx_hashes: Vec<Hash256>,
}

impl TrimmedBlock {
    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        decode(bytes)
    }
}

impl Transaction {
    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        decode(bytes)
    }
}
