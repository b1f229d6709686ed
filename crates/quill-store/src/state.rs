//! Reference account-state backend.
//!
//! Stores one flat account snapshot per state root in the same key-value
//! engine as the chain data, content-addressed by the BLAKE3 digest of the
//! canonical snapshot encoding. This gives the coordinator a real,
//! durability-exercising implementation of the [`StateView`]/[`StateBackend`]
//! seams; production deployments plug a versioned trie into the same traits.
//!
//! Snapshots are immutable once written. Applying a block clones the current
//! snapshot, replays the transactions, and yields a new candidate view that
//! stays in memory until [`StateView::commit`].

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use quill_core::constants::NATIVE_ASSET_ID;
use quill_core::error::StoreError;
use quill_core::traits::{
    KvStore, PruneJob, PruningStrategy, StateBackend, StateView, WriteBatch,
};
use quill_core::types::{
    Address, Amount, Block, GenerateIdPayload, Hash256, NanoPayPayload, PayloadKind,
    TransferPayload,
};

use crate::keys;

/// One account's state.
#[derive(Debug, Clone, PartialEq, Eq, Default, bincode::Encode, bincode::Decode)]
struct Account {
    balances: BTreeMap<Hash256, Amount>,
    nonce: u64,
    identity: Option<Vec<u8>>,
}

/// A full account-state snapshot. BTreeMaps keep the encoding canonical so
/// the root digest is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default, bincode::Encode, bincode::Decode)]
struct Snapshot {
    accounts: BTreeMap<Address, Account>,
    channels: BTreeMap<(Address, Address, u64), (Amount, u64)>,
}

impl Snapshot {
    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Encode(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (snapshot, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(snapshot)
    }

    /// Root digest of this snapshot. The empty snapshot is the zero root.
    fn root(&self) -> Result<Hash256, StoreError> {
        if self.accounts.is_empty() && self.channels.is_empty() {
            return Ok(Hash256::ZERO);
        }
        Ok(Hash256(blake3::hash(&self.encode()?).into()))
    }

    fn credit(&mut self, asset: &Hash256, address: &Address, amount: Amount) -> Result<(), StoreError> {
        let account = self.accounts.entry(*address).or_default();
        let balance = account.balances.entry(*asset).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| StoreError::State(format!("balance overflow for {address}")))?;
        Ok(())
    }

    fn debit(&mut self, asset: &Hash256, address: &Address, amount: Amount) -> Result<(), StoreError> {
        let account = self.accounts.entry(*address).or_default();
        let balance = account.balances.entry(*asset).or_default();
        let next = balance
            .checked_sub(amount)
            .ok_or_else(|| StoreError::State(format!("balance underflow for {address}")))?;
        if next.is_negative() {
            return Err(StoreError::State(format!("insufficient balance for {address}")));
        }
        *balance = next;
        Ok(())
    }

    fn bump_nonce(&mut self, address: &Address) {
        self.accounts.entry(*address).or_default().nonce += 1;
    }
}

/// An immutable snapshot view over the reference backend.
pub struct SnapshotView<K: KvStore> {
    engine: Arc<K>,
    root: Hash256,
    snapshot: Snapshot,
}

impl<K: KvStore> StateView for SnapshotView<K> {
    fn root(&self) -> Hash256 {
        self.root
    }

    fn balance(&self, asset: &Hash256, address: &Address) -> Amount {
        self.snapshot
            .accounts
            .get(address)
            .and_then(|account| account.balances.get(asset))
            .copied()
            .unwrap_or(Amount::ZERO)
    }

    fn nonce(&self, address: &Address) -> u64 {
        self.snapshot
            .accounts
            .get(address)
            .map(|account| account.nonce)
            .unwrap_or(0)
    }

    fn identity(&self, address: &Address) -> Option<Vec<u8>> {
        self.snapshot
            .accounts
            .get(address)
            .and_then(|account| account.identity.clone())
    }

    fn nano_pay(
        &self,
        sender: &Address,
        recipient: &Address,
        nonce: u64,
    ) -> Result<(Amount, u64), StoreError> {
        Ok(self
            .snapshot
            .channels
            .get(&(*sender, *recipient, nonce))
            .copied()
            .unwrap_or((Amount::ZERO, 0)))
    }

    fn apply_block(&self, block: &Block, check_supply: bool) -> Result<Self, StoreError> {
        let mut next = self.snapshot.clone();

        for (index, tx) in block.transactions.iter().enumerate() {
            let kind = tx.kind().map_err(StoreError::from)?;
            match kind {
                PayloadKind::Coinbase => {
                    if check_supply && index != 0 {
                        return Err(StoreError::State(format!(
                            "coinbase at position {index}, must lead the block"
                        )));
                    }
                    let payload = TransferPayload::decode(&tx.payload)?;
                    next.credit(&payload.asset, &payload.recipient, payload.amount)?;
                }
                PayloadKind::TransferAsset => {
                    let payload = TransferPayload::decode(&tx.payload)?;
                    next.debit(&payload.asset, &payload.sender, payload.amount)?;
                    next.credit(&payload.asset, &payload.recipient, payload.amount)?;
                    next.bump_nonce(&payload.sender);
                }
                PayloadKind::IssueAsset => {
                    let payload = TransferPayload::decode(&tx.payload)?;
                    next.credit(&payload.asset, &payload.recipient, payload.amount)?;
                    next.bump_nonce(&payload.sender);
                }
                PayloadKind::GenerateId => {
                    let payload = GenerateIdPayload::decode(&tx.payload)?;
                    next.debit(
                        &NATIVE_ASSET_ID,
                        &payload.address,
                        payload.registration_fee,
                    )?;
                    let account = next.accounts.entry(payload.address).or_default();
                    account.identity = Some(payload.public_key);
                    account.nonce += 1;
                }
                PayloadKind::NanoPay => {
                    let payload = NanoPayPayload::decode(&tx.payload)?;
                    let key = (payload.sender, payload.recipient, payload.id);
                    let claimed = next.channels.get(&key).map(|c| c.0).unwrap_or(Amount::ZERO);
                    let delta = payload
                        .amount
                        .checked_sub(claimed)
                        .ok_or_else(|| StoreError::State("nano pay amount overflow".into()))?;
                    if delta.is_negative() {
                        return Err(StoreError::State(format!(
                            "nano pay amount regressed for channel {}:{}:{}",
                            payload.sender, payload.recipient, payload.id
                        )));
                    }
                    next.debit(&NATIVE_ASSET_ID, &payload.sender, delta)?;
                    next.credit(&NATIVE_ASSET_ID, &payload.recipient, delta)?;
                    next.channels.insert(key, (payload.amount, payload.expiration));
                }
                // Name and subscription registries live outside the account
                // snapshot; these kinds carry no account-state effect here.
                PayloadKind::SigChain
                | PayloadKind::RegisterName
                | PayloadKind::TransferName
                | PayloadKind::DeleteName
                | PayloadKind::Subscribe
                | PayloadKind::Unsubscribe => {}
            }
        }

        let root = next.root()?;
        Ok(Self {
            engine: self.engine.clone(),
            root,
            snapshot: next,
        })
    }

    fn commit(&self) -> Result<(), StoreError> {
        // The zero root is the empty state; it needs no record.
        if self.root.is_zero() {
            return Ok(());
        }
        self.engine
            .put(&keys::state_snapshot(&self.root), &self.snapshot.encode()?)
    }
}

/// Flat-snapshot implementation of [`StateBackend`].
pub struct SnapshotStateBackend<K: KvStore> {
    engine: Arc<K>,
}

impl<K: KvStore> SnapshotStateBackend<K> {
    pub fn new(engine: Arc<K>) -> Self {
        Self { engine }
    }

    fn load(&self, root: Hash256) -> Result<Snapshot, StoreError> {
        if root.is_zero() {
            return Ok(Snapshot::default());
        }
        let bytes = self
            .engine
            .get(&keys::state_snapshot(&root))?
            .ok_or_else(|| StoreError::UnknownStateRoot(root.to_string()))?;
        Snapshot::decode(&bytes)
    }
}

impl<K: KvStore> StateBackend for SnapshotStateBackend<K> {
    type View = SnapshotView<K>;

    fn view_at(&self, root: Hash256) -> Result<Self::View, StoreError> {
        let snapshot = self.load(root)?;
        Ok(SnapshotView {
            engine: self.engine.clone(),
            root,
            snapshot,
        })
    }

    fn prune(&self, job: &PruneJob<'_>) -> Result<u64, StoreError> {
        let retain: HashSet<&Hash256> = job.retain.iter().collect();
        let mut batch = WriteBatch::new();
        let mut released = 0u64;

        match job.strategy {
            // Point deletes per released root; memory bounded by the release
            // window, never by total state size.
            PruningStrategy::LowMemory => {
                for root in job.release {
                    if root.is_zero() || retain.contains(root) {
                        continue;
                    }
                    let key = keys::state_snapshot(root);
                    if self.engine.contains(&key)? {
                        batch.delete(key);
                        released += 1;
                    }
                }
            }
            // Deprecated bulk paths: materialize the whole snapshot namespace
            // before deleting. Kept for migration and diagnostics only.
            PruningStrategy::RefCount | PruningStrategy::Sequential => {
                let release: HashSet<&Hash256> =
                    job.release.iter().filter(|r| !retain.contains(r)).collect();
                for (key, _) in self.engine.scan_prefix(&keys::state_snapshot_prefix())? {
                    let root = Hash256::from_slice(&key[1..])?;
                    if release.contains(&root) {
                        batch.delete(key);
                        released += 1;
                    }
                }
            }
        }

        if !batch.is_empty() {
            self.engine.write(batch)?;
        }

        Ok(released)
    }

    fn verify_reachable(&self, root: Hash256) -> Result<(), StoreError> {
        let snapshot = self.load(root)?;
        let recomputed = snapshot.root()?;
        if recomputed != root {
            return Err(StoreError::Decode(format!(
                "state snapshot digest mismatch: stored under {root}, content hashes to {recomputed}"
            )));
        }
        Ok(())
    }

    fn traverse(&self, root: Hash256) -> Result<u64, StoreError> {
        let snapshot = self.load(root)?;
        let visited = snapshot.accounts.len() as u64 + snapshot.channels.len() as u64;
        tracing::debug!(%root, visited, "state traversal complete");
        Ok(visited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RocksEngine;
    use quill_core::types::{Header, Transaction};

    fn addr(seed: u8) -> Address {
        Address([seed; 20])
    }

    fn temp_backend() -> (SnapshotStateBackend<RocksEngine>, Arc<RocksEngine>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(RocksEngine::open(dir.path().join("kv")).unwrap());
        (SnapshotStateBackend::new(engine.clone()), engine, dir)
    }

    fn coinbase_tx(recipient: Address, amount: i64) -> Transaction {
        Transaction {
            version: 1,
            payload_tag: PayloadKind::Coinbase.tag(),
            payload: TransferPayload {
                asset: NATIVE_ASSET_ID,
                sender: Address::ZERO,
                recipient,
                amount: Amount(amount),
            }
            .encode()
            .unwrap(),
            nonce: 0,
            signature: vec![],
        }
    }

    fn transfer_tx(sender: Address, recipient: Address, amount: i64) -> Transaction {
        Transaction {
            version: 1,
            payload_tag: PayloadKind::TransferAsset.tag(),
            payload: TransferPayload {
                asset: NATIVE_ASSET_ID,
                sender,
                recipient,
                amount: Amount(amount),
            }
            .encode()
            .unwrap(),
            nonce: 0,
            signature: vec![0u8; 64],
        }
    }

    fn block_of(txs: Vec<Transaction>) -> Block {
        Block {
            header: Header {
                version: 1,
                prev_hash: Hash256::ZERO,
                state_root: Hash256::ZERO,
                tx_root: Hash256::ZERO,
                timestamp: 1_700_000_000,
                height: 1,
                signer: vec![],
                signature: vec![],
            },
            transactions: txs,
        }
    }

    #[test]
    fn empty_state_has_zero_root() {
        let (backend, _engine, _dir) = temp_backend();
        let view = backend.view_at(Hash256::ZERO).unwrap();
        assert_eq!(view.root(), Hash256::ZERO);
        assert_eq!(view.balance(&NATIVE_ASSET_ID, &addr(1)), Amount::ZERO);
    }

    #[test]
    fn coinbase_credits_and_changes_root() {
        let (backend, _engine, _dir) = temp_backend();
        let view = backend.view_at(Hash256::ZERO).unwrap();

        let next = view
            .apply_block(&block_of(vec![coinbase_tx(addr(1), 500)]), true)
            .unwrap();
        assert_ne!(next.root(), Hash256::ZERO);
        assert_eq!(next.balance(&NATIVE_ASSET_ID, &addr(1)), Amount(500));
        // The originating view is untouched.
        assert_eq!(view.balance(&NATIVE_ASSET_ID, &addr(1)), Amount::ZERO);
    }

    #[test]
    fn transfer_moves_balance_and_bumps_nonce() {
        let (backend, _engine, _dir) = temp_backend();
        let view = backend.view_at(Hash256::ZERO).unwrap();
        let funded = view
            .apply_block(&block_of(vec![coinbase_tx(addr(1), 500)]), true)
            .unwrap();

        let next = funded
            .apply_block(&block_of(vec![transfer_tx(addr(1), addr(2), 200)]), false)
            .unwrap();
        assert_eq!(next.balance(&NATIVE_ASSET_ID, &addr(1)), Amount(300));
        assert_eq!(next.balance(&NATIVE_ASSET_ID, &addr(2)), Amount(200));
        assert_eq!(next.nonce(&addr(1)), 1);
    }

    #[test]
    fn overspending_transfer_fails() {
        let (backend, _engine, _dir) = temp_backend();
        let view = backend.view_at(Hash256::ZERO).unwrap();
        let err = view
            .apply_block(&block_of(vec![transfer_tx(addr(1), addr(2), 1)]), false)
            .unwrap_err();
        assert!(matches!(err, StoreError::State(_)));
    }

    #[test]
    fn misplaced_coinbase_rejected_when_supply_checked() {
        let (backend, _engine, _dir) = temp_backend();
        let view = backend.view_at(Hash256::ZERO).unwrap();
        let block = block_of(vec![coinbase_tx(addr(1), 10), coinbase_tx(addr(2), 10)]);

        assert!(view.apply_block(&block, true).is_err());
        // Genesis skips the supply check.
        assert!(view.apply_block(&block, false).is_ok());
    }

    #[test]
    fn commit_makes_root_loadable() {
        let (backend, _engine, _dir) = temp_backend();
        let view = backend.view_at(Hash256::ZERO).unwrap();
        let next = view
            .apply_block(&block_of(vec![coinbase_tx(addr(1), 500)]), true)
            .unwrap();
        let root = next.root();

        assert!(matches!(
            backend.view_at(root),
            Err(StoreError::UnknownStateRoot(_))
        ));
        next.commit().unwrap();

        let reloaded = backend.view_at(root).unwrap();
        assert_eq!(reloaded.balance(&NATIVE_ASSET_ID, &addr(1)), Amount(500));
    }

    #[test]
    fn nano_pay_tracks_cumulative_claims() {
        let (backend, _engine, _dir) = temp_backend();
        let view = backend.view_at(Hash256::ZERO).unwrap();
        let funded = view
            .apply_block(&block_of(vec![coinbase_tx(addr(1), 1_000)]), true)
            .unwrap();

        let pay = |amount: i64| Transaction {
            version: 1,
            payload_tag: PayloadKind::NanoPay.tag(),
            payload: NanoPayPayload {
                sender: addr(1),
                recipient: addr(2),
                id: 9,
                amount: Amount(amount),
                expiration: 100,
            }
            .encode()
            .unwrap(),
            nonce: 0,
            signature: vec![],
        };

        let after_first = funded.apply_block(&block_of(vec![pay(300)]), false).unwrap();
        assert_eq!(after_first.nano_pay(&addr(1), &addr(2), 9).unwrap(), (Amount(300), 100));
        assert_eq!(after_first.balance(&NATIVE_ASSET_ID, &addr(2)), Amount(300));

        // Second settlement is cumulative: only the delta moves.
        let after_second = after_first.apply_block(&block_of(vec![pay(450)]), false).unwrap();
        assert_eq!(after_second.balance(&NATIVE_ASSET_ID, &addr(2)), Amount(450));
        assert_eq!(after_second.balance(&NATIVE_ASSET_ID, &addr(1)), Amount(550));

        // Regressing the cumulative amount is rejected.
        assert!(after_second.apply_block(&block_of(vec![pay(100)]), false).is_err());
    }

    #[test]
    fn identity_registration() {
        let (backend, _engine, _dir) = temp_backend();
        let view = backend.view_at(Hash256::ZERO).unwrap();
        let funded = view
            .apply_block(&block_of(vec![coinbase_tx(addr(3), 100)]), true)
            .unwrap();

        let register = Transaction {
            version: 1,
            payload_tag: PayloadKind::GenerateId.tag(),
            payload: GenerateIdPayload {
                address: addr(3),
                public_key: vec![0xEE; 32],
                registration_fee: Amount(10),
            }
            .encode()
            .unwrap(),
            nonce: 0,
            signature: vec![],
        };

        let next = funded.apply_block(&block_of(vec![register]), false).unwrap();
        assert_eq!(next.identity(&addr(3)), Some(vec![0xEE; 32]));
        assert_eq!(next.balance(&NATIVE_ASSET_ID, &addr(3)), Amount(90));
        assert_eq!(funded.identity(&addr(3)), None);
    }

    #[test]
    fn prune_releases_only_unretained_roots() {
        let (backend, _engine, _dir) = temp_backend();
        let view = backend.view_at(Hash256::ZERO).unwrap();

        let v1 = view.apply_block(&block_of(vec![coinbase_tx(addr(1), 100)]), true).unwrap();
        let v2 = v1.apply_block(&block_of(vec![coinbase_tx(addr(1), 100)]), true).unwrap();
        let v3 = v2.apply_block(&block_of(vec![coinbase_tx(addr(1), 100)]), true).unwrap();
        for v in [&v1, &v2, &v3] {
            v.commit().unwrap();
        }
        let (r1, r2, r3) = (v1.root(), v2.root(), v3.root());

        let released = backend
            .prune(&PruneJob {
                strategy: PruningStrategy::LowMemory,
                retain: &[r3],
                release: &[r1, r2],
            })
            .unwrap();
        assert_eq!(released, 2);
        assert!(matches!(backend.view_at(r1), Err(StoreError::UnknownStateRoot(_))));
        assert!(matches!(backend.view_at(r2), Err(StoreError::UnknownStateRoot(_))));
        assert!(backend.view_at(r3).is_ok());

        // A second identical pass finds nothing to release.
        let again = backend
            .prune(&PruneJob {
                strategy: PruningStrategy::LowMemory,
                retain: &[r3],
                release: &[r1, r2],
            })
            .unwrap();
        assert_eq!(again, 0);
    }

    #[test]
    fn prune_never_touches_retained_roots() {
        let (backend, _engine, _dir) = temp_backend();
        let view = backend.view_at(Hash256::ZERO).unwrap();
        let v1 = view.apply_block(&block_of(vec![coinbase_tx(addr(1), 100)]), true).unwrap();
        v1.commit().unwrap();
        let r1 = v1.root();

        for strategy in [PruningStrategy::LowMemory, PruningStrategy::RefCount, PruningStrategy::Sequential] {
            let released = backend
                .prune(&PruneJob {
                    strategy,
                    retain: &[r1],
                    release: &[r1],
                })
                .unwrap();
            assert_eq!(released, 0, "{strategy:?} released a retained root");
            assert!(backend.view_at(r1).is_ok());
        }
    }

    #[test]
    fn bulk_strategies_match_lowmem_result() {
        for strategy in [PruningStrategy::RefCount, PruningStrategy::Sequential] {
            let (backend, _engine, _dir) = temp_backend();
            let view = backend.view_at(Hash256::ZERO).unwrap();
            let v1 = view.apply_block(&block_of(vec![coinbase_tx(addr(1), 1)]), true).unwrap();
            let v2 = v1.apply_block(&block_of(vec![coinbase_tx(addr(2), 2)]), true).unwrap();
            v1.commit().unwrap();
            v2.commit().unwrap();

            let released = backend
                .prune(&PruneJob {
                    strategy,
                    retain: &[v2.root()],
                    release: &[v1.root()],
                })
                .unwrap();
            assert_eq!(released, 1);
            assert!(backend.view_at(v1.root()).is_err());
            assert!(backend.view_at(v2.root()).is_ok());
        }
    }

    #[test]
    fn verify_detects_tampered_snapshot() {
        let (backend, engine, _dir) = temp_backend();
        let view = backend.view_at(Hash256::ZERO).unwrap();
        let v1 = view.apply_block(&block_of(vec![coinbase_tx(addr(1), 100)]), true).unwrap();
        v1.commit().unwrap();
        let root = v1.root();

        backend.verify_reachable(root).unwrap();

        // Overwrite the stored snapshot with a different (valid) snapshot.
        let other = view.apply_block(&block_of(vec![coinbase_tx(addr(2), 7)]), true).unwrap();
        engine
            .put(&keys::state_snapshot(&root), &other.snapshot.encode().unwrap())
            .unwrap();
        assert!(matches!(backend.verify_reachable(root), Err(StoreError::Decode(_))));

        // Outright garbage fails decoding.
        engine.put(&keys::state_snapshot(&root), &[0xFF, 0x01]).unwrap();
        assert!(matches!(backend.verify_reachable(root), Err(StoreError::Decode(_))));
    }

    #[test]
    fn traverse_counts_records() {
        let (backend, _engine, _dir) = temp_backend();
        let view = backend.view_at(Hash256::ZERO).unwrap();
        let v1 = view
            .apply_block(
                &block_of(vec![coinbase_tx(addr(1), 100), coinbase_tx(addr(2), 50)]),
                false,
            )
            .unwrap();
        v1.commit().unwrap();

        assert_eq!(backend.traverse(v1.root()).unwrap(), 2);
        assert_eq!(backend.traverse(Hash256::ZERO).unwrap(), 0);
    }
}
