//! Donation records: the per-block reward effective from a given height.
//!
//! A new record is created only at multiples of the configured adjustment
//! interval. The amount is derived from the treasury account's balance, so
//! emission decays with historical consumption of the treasury rather than
//! following a fixed height-based schedule.

use serde::{Deserialize, Serialize};

use quill_core::error::StoreError;
use quill_core::types::Amount;

/// The reward-per-block effective from `height` until the next adjustment
/// boundary.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Donation {
    pub height: u64,
    pub amount: Amount,
}

impl Donation {
    pub fn new(height: u64, amount: Amount) -> Self {
        Self { height, amount }
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (donation, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(donation)
    }
}

/// Per-block emission for the next interval:
/// `(treasury * dividend / divisor) / interval`, truncating at each division.
///
/// The interval share is computed in 128-bit arithmetic so the factor
/// multiplication cannot overflow; both divisions truncate toward zero
/// exactly as written.
pub fn per_block_emission(treasury: Amount, dividend: i64, divisor: i64, interval: u64) -> Amount {
    let share = (treasury.raw() as i128 * dividend as i128) / divisor as i128;
    let per_block = share / interval as i128;
    Amount(per_block as i64)
}
