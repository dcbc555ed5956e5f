//! An in-memory engine, the reference every other engine is compared to.
//!
//! Roots are keccak hashes of a flat RLP encoding of the sorted state, not
//! Merkle Patricia roots: two [`MemoryStateDb`]s agree on a root exactly when
//! they agree on the state, which is all the harness needs.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use anyhow::{anyhow, bail, ensure};
use ethereum_types::{Address, H256, U256};
use keccak_hash::keccak;
use log::debug;
use rlp::RlpStream;
use state_common::{code_hash, EMPTY_TRIE_HASH};

use crate::{
    error::Scope,
    state_db::{AccessListItem, ArchiveState, BalanceChangeReason, BulkLoad, Log, StateDb},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Account {
    balance: U256,
    nonce: u64,
    code: Vec<u8>,
    /// Zero values are never stored.
    storage: BTreeMap<H256, H256>,
    self_destructed: bool,
}

impl Account {
    fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code.is_empty()
    }
}

type World = BTreeMap<Address, Account>;

/// Everything a snapshot restores.
#[derive(Debug, Clone, Default)]
struct Frame {
    world: World,
    transient: BTreeMap<(Address, H256), H256>,
    refund: u64,
    warm_addresses: BTreeSet<Address>,
    warm_slots: BTreeSet<(Address, H256)>,
    logs: Vec<Log>,
}

#[derive(Debug, Default)]
pub struct MemoryStateDb {
    frame: Frame,
    /// `checkpoints[n]` is snapshot `snapshot_base + n`.
    checkpoints: Vec<Frame>,
    snapshot_base: i32,
    /// Storage values as of the start of the transaction, for slots written
    /// since.
    originals: BTreeMap<(Address, H256), H256>,
    scope: Scope,
    block: u64,
    tx_hash: H256,
    tx_index: u32,
    logs: BTreeMap<H256, Vec<Log>>,
    preimages: BTreeMap<H256, Vec<u8>>,
    archive: BTreeMap<u64, Arc<World>>,
    error: Option<String>,
    closed: bool,
}

impl MemoryStateDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number snapshots from `base` instead of zero.
    pub fn with_snapshot_base(self, base: i32) -> Self {
        Self {
            snapshot_base: base,
            ..self
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// The hash and index set by the last [`StateDb::set_tx_context`].
    pub fn tx_context(&self) -> (H256, u32) {
        (self.tx_hash, self.tx_index)
    }

    pub fn preimage(&self, hash: &H256) -> Option<&[u8]> {
        self.preimages.get(hash).map(Vec::as_slice)
    }

    fn account(&self, address: &Address) -> Option<&Account> {
        self.frame.world.get(address)
    }

    fn account_mut(&mut self, address: Address) -> &mut Account {
        self.frame.world.entry(address).or_default()
    }

    fn transition(&mut self, from: Scope, to: Scope, what: &str) -> anyhow::Result<()> {
        ensure!(!self.closed, "{what} on a closed engine");
        ensure!(
            self.scope == from,
            "{what} requires {from} scope, but the engine is in {} scope",
            self.scope
        );
        self.scope = to;
        Ok(())
    }

    fn reset_transaction(&mut self) {
        let Frame {
            transient,
            refund,
            warm_addresses,
            warm_slots,
            logs,
            ..
        } = &mut self.frame;
        transient.clear();
        *refund = 0;
        warm_addresses.clear();
        warm_slots.clear();
        if !logs.is_empty() {
            self.logs
                .entry(self.tx_hash)
                .or_default()
                .append(logs);
        }
        self.checkpoints.clear();
        self.originals.clear();
    }

    fn latch(&mut self, message: String) {
        debug!("memory engine error: {message}");
        self.error.get_or_insert(message);
    }
}

impl StateDb for MemoryStateDb {
    fn create_account(&mut self, address: Address) {
        let balance = self.account(&address).map(|it| it.balance).unwrap_or_default();
        self.frame.world.insert(
            address,
            Account {
                balance,
                ..Default::default()
            },
        );
    }
    fn exist(&mut self, address: Address) -> bool {
        self.frame.world.contains_key(&address)
    }
    fn empty(&mut self, address: Address) -> bool {
        self.account(&address).map_or(true, Account::is_empty)
    }
    fn self_destruct(&mut self, address: Address) {
        if let Some(account) = self.frame.world.get_mut(&address) {
            account.self_destructed = true;
            account.balance = U256::zero();
        }
    }
    fn has_self_destructed(&mut self, address: Address) -> bool {
        self.account(&address).is_some_and(|it| it.self_destructed)
    }

    fn get_balance(&mut self, address: Address) -> U256 {
        self.account(&address).map(|it| it.balance).unwrap_or_default()
    }
    fn add_balance(&mut self, address: Address, amount: U256, _: BalanceChangeReason) {
        let account = self.account_mut(address);
        account.balance = account.balance.saturating_add(amount);
    }
    fn sub_balance(&mut self, address: Address, amount: U256, _: BalanceChangeReason) {
        let account = self.account_mut(address);
        account.balance = account.balance.saturating_sub(amount);
    }
    fn get_nonce(&mut self, address: Address) -> u64 {
        self.account(&address).map(|it| it.nonce).unwrap_or_default()
    }
    fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.account_mut(address).nonce = nonce;
    }

    fn get_committed_state(&mut self, address: Address, key: H256) -> H256 {
        match self.originals.get(&(address, key)) {
            Some(original) => *original,
            None => self.get_state(address, key),
        }
    }
    fn get_state(&mut self, address: Address, key: H256) -> H256 {
        self.account(&address)
            .and_then(|it| it.storage.get(&key).copied())
            .unwrap_or_default()
    }
    fn set_state(&mut self, address: Address, key: H256, value: H256) {
        let previous = self.get_state(address, key);
        self.originals.entry((address, key)).or_insert(previous);
        let storage = &mut self.account_mut(address).storage;
        match value.is_zero() {
            true => storage.remove(&key),
            false => storage.insert(key, value),
        };
    }
    fn get_storage_root(&mut self, address: Address) -> H256 {
        self.account(&address)
            .map_or(EMPTY_TRIE_HASH, |it| storage_root(&it.storage))
    }
    fn get_transient_state(&mut self, address: Address, key: H256) -> H256 {
        self.frame
            .transient
            .get(&(address, key))
            .copied()
            .unwrap_or_default()
    }
    fn set_transient_state(&mut self, address: Address, key: H256, value: H256) {
        match value.is_zero() {
            true => self.frame.transient.remove(&(address, key)),
            false => self.frame.transient.insert((address, key), value),
        };
    }

    fn get_code(&mut self, address: Address) -> Vec<u8> {
        self.account(&address)
            .map(|it| it.code.clone())
            .unwrap_or_default()
    }
    fn get_code_size(&mut self, address: Address) -> usize {
        self.account(&address).map_or(0, |it| it.code.len())
    }
    fn get_code_hash(&mut self, address: Address) -> H256 {
        self.account(&address)
            .map(|it| code_hash(&it.code))
            .unwrap_or_default()
    }
    fn set_code(&mut self, address: Address, code: &[u8]) {
        self.account_mut(address).code = code.to_vec();
    }

    fn snapshot(&mut self) -> i32 {
        self.checkpoints.push(self.frame.clone());
        self.snapshot_base
            .wrapping_add((self.checkpoints.len() - 1) as i32)
    }
    fn revert_to_snapshot(&mut self, id: i32) {
        let depth = usize::try_from(id.wrapping_sub(self.snapshot_base))
            .ok()
            .filter(|it| *it < self.checkpoints.len());
        match depth {
            Some(depth) => {
                self.frame = self.checkpoints[depth].clone();
                self.checkpoints.truncate(depth + 1);
            }
            None => self.latch(format!("revert to unknown snapshot {id}")),
        }
    }

    fn add_refund(&mut self, gas: u64) {
        self.frame.refund = self.frame.refund.saturating_add(gas);
    }
    fn sub_refund(&mut self, gas: u64) {
        match self.frame.refund.checked_sub(gas) {
            Some(refund) => self.frame.refund = refund,
            None => self.latch(format!(
                "refund counter below zero ({} - {gas})",
                self.frame.refund
            )),
        }
    }
    fn get_refund(&mut self) -> u64 {
        self.frame.refund
    }

    fn prepare_access_list(
        &mut self,
        sender: Address,
        destination: Option<Address>,
        precompiles: &[Address],
        access_list: &[AccessListItem],
    ) {
        let Frame {
            warm_addresses,
            warm_slots,
            ..
        } = &mut self.frame;
        warm_addresses.clear();
        warm_slots.clear();
        warm_addresses.insert(sender);
        warm_addresses.extend(destination);
        warm_addresses.extend(precompiles.iter().copied());
        for AccessListItem {
            address,
            storage_keys,
        } in access_list
        {
            warm_addresses.insert(*address);
            warm_slots.extend(storage_keys.iter().map(|key| (*address, *key)));
        }
    }
    fn add_address_to_access_list(&mut self, address: Address) {
        self.frame.warm_addresses.insert(address);
    }
    fn address_in_access_list(&mut self, address: Address) -> bool {
        self.frame.warm_addresses.contains(&address)
    }
    fn add_slot_to_access_list(&mut self, address: Address, key: H256) {
        self.frame.warm_addresses.insert(address);
        self.frame.warm_slots.insert((address, key));
    }
    fn slot_in_access_list(&mut self, address: Address, key: H256) -> (bool, bool) {
        (
            self.frame.warm_addresses.contains(&address),
            self.frame.warm_slots.contains(&(address, key)),
        )
    }

    fn set_tx_context(&mut self, tx_hash: H256, index: u32) {
        if !self.frame.logs.is_empty() {
            let logs = std::mem::take(&mut self.frame.logs);
            self.logs.entry(self.tx_hash).or_default().extend(logs);
        }
        self.tx_hash = tx_hash;
        self.tx_index = index;
    }
    fn add_log(&mut self, log: Log) {
        self.frame.logs.push(log);
    }
    fn get_logs(&mut self, tx_hash: H256, _: u64, _: H256) -> Vec<Log> {
        let mut logs = self.logs.get(&tx_hash).cloned().unwrap_or_default();
        if tx_hash == self.tx_hash {
            logs.extend(self.frame.logs.iter().cloned());
        }
        logs
    }
    fn add_preimage(&mut self, hash: H256, preimage: &[u8]) {
        self.preimages
            .entry(hash)
            .or_insert_with(|| preimage.to_vec());
    }

    fn begin_sync_period(&mut self, _: u64) -> anyhow::Result<()> {
        self.transition(Scope::Idle, Scope::SyncPeriod, "begin_sync_period")
    }
    fn end_sync_period(&mut self) -> anyhow::Result<()> {
        self.transition(Scope::SyncPeriod, Scope::Idle, "end_sync_period")
    }
    fn begin_block(&mut self, number: u64) -> anyhow::Result<()> {
        self.transition(Scope::SyncPeriod, Scope::Block, "begin_block")?;
        self.block = number;
        Ok(())
    }
    fn end_block(&mut self) -> anyhow::Result<()> {
        self.transition(Scope::Block, Scope::SyncPeriod, "end_block")?;
        self.archive
            .insert(self.block, Arc::new(self.frame.world.clone()));
        Ok(())
    }
    fn begin_transaction(&mut self, _: u32) -> anyhow::Result<()> {
        self.transition(Scope::Block, Scope::Transaction, "begin_transaction")?;
        self.reset_transaction();
        Ok(())
    }
    fn end_transaction(&mut self) -> anyhow::Result<()> {
        self.transition(Scope::Transaction, Scope::Block, "end_transaction")?;
        self.finalise(false);
        self.reset_transaction();
        Ok(())
    }

    fn finalise(&mut self, delete_empty: bool) {
        self.frame
            .world
            .retain(|_, it| !it.self_destructed && !(delete_empty && it.is_empty()));
        self.frame.refund = 0;
    }
    fn intermediate_root(&mut self, delete_empty: bool) -> H256 {
        self.finalise(delete_empty);
        state_root(&self.frame.world)
    }
    fn commit(&mut self, _: u64, delete_empty: bool) -> anyhow::Result<H256> {
        ensure!(!self.closed, "commit on a closed engine");
        ensure!(
            self.scope != Scope::Transaction,
            "commit inside a transaction"
        );
        Ok(self.intermediate_root(delete_empty))
    }
    fn get_hash(&mut self) -> anyhow::Result<H256> {
        ensure!(!self.closed, "get_hash on a closed engine");
        Ok(state_root(&self.frame.world))
    }

    fn start_bulk_load(&mut self, block: u64) -> anyhow::Result<Box<dyn BulkLoad + '_>> {
        ensure!(
            self.scope == Scope::Idle,
            "bulk load requires idle scope, but the engine is in {} scope",
            self.scope
        );
        Ok(Box::new(MemoryBulkLoad { db: self, block }))
    }
    fn get_archive_state(&mut self, block: u64) -> anyhow::Result<Box<dyn ArchiveState>> {
        match self.archive.get(&block) {
            Some(world) => Ok(Box::new(MemoryArchive {
                world: Arc::clone(world),
            })),
            None => bail!("no archive state for block {block}"),
        }
    }
    fn get_archive_block_height(&mut self) -> anyhow::Result<Option<u64>> {
        Ok(self.archive.keys().next_back().copied())
    }

    fn error(&self) -> Option<anyhow::Error> {
        self.error.as_ref().map(|it| anyhow!("{it}"))
    }
    fn close(&mut self) -> anyhow::Result<()> {
        ensure!(!self.closed, "engine closed twice");
        self.closed = true;
        Ok(())
    }
}

struct MemoryBulkLoad<'a> {
    db: &'a mut MemoryStateDb,
    block: u64,
}

impl BulkLoad for MemoryBulkLoad<'_> {
    fn create_account(&mut self, address: Address) {
        self.db.frame.world.entry(address).or_default();
    }
    fn set_balance(&mut self, address: Address, balance: U256) {
        self.db.account_mut(address).balance = balance;
    }
    fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.db.account_mut(address).nonce = nonce;
    }
    fn set_state(&mut self, address: Address, key: H256, value: H256) {
        let storage = &mut self.db.account_mut(address).storage;
        match value.is_zero() {
            true => storage.remove(&key),
            false => storage.insert(key, value),
        };
    }
    fn set_code(&mut self, address: Address, code: &[u8]) {
        self.db.account_mut(address).code = code.to_vec();
    }
    fn close(&mut self) -> anyhow::Result<()> {
        let world = Arc::new(self.db.frame.world.clone());
        self.db.archive.insert(self.block, world);
        Ok(())
    }
}

/// The state of a [`MemoryStateDb`] at the end of a block.
#[derive(Debug, Clone)]
pub struct MemoryArchive {
    world: Arc<World>,
}

impl ArchiveState for MemoryArchive {
    fn exist(&mut self, address: Address) -> bool {
        self.world.contains_key(&address)
    }
    fn get_balance(&mut self, address: Address) -> U256 {
        self.world
            .get(&address)
            .map(|it| it.balance)
            .unwrap_or_default()
    }
    fn get_nonce(&mut self, address: Address) -> u64 {
        self.world.get(&address).map(|it| it.nonce).unwrap_or_default()
    }
    fn get_state(&mut self, address: Address, key: H256) -> H256 {
        self.world
            .get(&address)
            .and_then(|it| it.storage.get(&key).copied())
            .unwrap_or_default()
    }
    fn get_code(&mut self, address: Address) -> Vec<u8> {
        self.world
            .get(&address)
            .map(|it| it.code.clone())
            .unwrap_or_default()
    }
    fn get_code_hash(&mut self, address: Address) -> H256 {
        self.world
            .get(&address)
            .map(|it| code_hash(&it.code))
            .unwrap_or_default()
    }
    fn get_storage_root(&mut self, address: Address) -> H256 {
        self.world
            .get(&address)
            .map_or(EMPTY_TRIE_HASH, |it| storage_root(&it.storage))
    }
    fn get_hash(&mut self) -> anyhow::Result<H256> {
        Ok(state_root(&self.world))
    }
    fn release(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn storage_root(storage: &BTreeMap<H256, H256>) -> H256 {
    if storage.is_empty() {
        return EMPTY_TRIE_HASH;
    }
    let mut stream = RlpStream::new_list(storage.len());
    for (key, value) in storage {
        stream.begin_list(2).append(key).append(value);
    }
    keccak(stream.out())
}

fn state_root(world: &World) -> H256 {
    if world.is_empty() {
        return EMPTY_TRIE_HASH;
    }
    let mut stream = RlpStream::new_list(world.len());
    for (address, account) in world {
        stream
            .begin_list(5)
            .append(address)
            .append(&account.nonce)
            .append(&account.balance)
            .append(&storage_root(&account.storage))
            .append(&code_hash(&account.code));
    }
    keccak(stream.out())
}

#[cfg(test)]
mod tests {
    use state_common::EMPTY_CODE_HASH;

    use super::*;

    const A: Address = Address::repeat_byte(0x0A);
    const B: Address = Address::repeat_byte(0x0B);

    fn in_transaction() -> MemoryStateDb {
        let mut db = MemoryStateDb::new();
        db.begin_sync_period(0).unwrap();
        db.begin_block(1).unwrap();
        db.begin_transaction(0).unwrap();
        db
    }

    fn word(n: u64) -> H256 {
        H256::from_low_u64_be(n)
    }

    #[test]
    fn lifecycle_must_nest() {
        let mut db = MemoryStateDb::new();
        assert!(db.begin_block(1).is_err());
        db.begin_sync_period(0).unwrap();
        assert!(db.begin_transaction(0).is_err());
        db.begin_block(1).unwrap();
        assert!(db.end_sync_period().is_err());
        db.begin_transaction(0).unwrap();
        assert!(db.commit(1, true).is_err());
        db.end_transaction().unwrap();
        db.end_block().unwrap();
        db.end_sync_period().unwrap();
        assert_eq!(db.scope(), Scope::Idle);
        db.close().unwrap();
        assert!(db.begin_sync_period(1).is_err());
    }

    #[test]
    fn snapshots_are_numbered_from_the_base() {
        let mut db = in_transaction().with_snapshot_base(7);
        db.set_nonce(A, 1);
        assert_eq!(db.snapshot(), 7);
        db.set_nonce(A, 2);
        assert_eq!(db.snapshot(), 8);
        db.set_nonce(A, 3);
        assert_eq!(db.snapshot(), 9);

        db.revert_to_snapshot(8);
        assert_eq!(db.get_nonce(A), 2);
        // 8 survives the revert, 9 is reused
        assert_eq!(db.snapshot(), 9);
        db.revert_to_snapshot(8);
        db.revert_to_snapshot(7);
        assert_eq!(db.get_nonce(A), 1);
        assert!(db.error().is_none());
    }

    #[test]
    fn unknown_revert_is_latched() {
        let mut db = in_transaction();
        db.snapshot();
        db.revert_to_snapshot(5);
        db.revert_to_snapshot(-1);
        let err = db.error().unwrap();
        assert_eq!(err.to_string(), "revert to unknown snapshot 5");
    }

    #[test]
    fn revert_restores_transaction_scoped_state() {
        let mut db = in_transaction();
        let id = db.snapshot();
        db.set_transient_state(A, word(1), word(2));
        db.add_refund(100);
        db.add_slot_to_access_list(A, word(1));
        db.add_log(Log {
            address: A,
            ..Default::default()
        });
        db.revert_to_snapshot(id);
        assert_eq!(db.get_transient_state(A, word(1)), H256::zero());
        assert_eq!(db.get_refund(), 0);
        assert_eq!(db.slot_in_access_list(A, word(1)), (false, false));
        assert!(db.get_logs(H256::zero(), 1, H256::zero()).is_empty());
    }

    #[test]
    fn committed_state_is_as_of_transaction_start() {
        let mut db = in_transaction();
        db.set_nonce(A, 1);
        db.set_state(A, word(1), word(10));
        db.end_transaction().unwrap();
        db.begin_transaction(1).unwrap();
        db.set_state(A, word(1), word(20));
        db.set_state(A, word(1), word(30));
        assert_eq!(db.get_committed_state(A, word(1)), word(10));
        assert_eq!(db.get_state(A, word(1)), word(30));
        db.end_transaction().unwrap();
        db.begin_transaction(2).unwrap();
        assert_eq!(db.get_committed_state(A, word(1)), word(30));
    }

    #[test]
    fn empty_hashes() {
        let mut db = MemoryStateDb::new();
        assert_eq!(db.get_hash().unwrap(), EMPTY_TRIE_HASH);
        db.create_account(A);
        assert_eq!(db.get_code_hash(A), EMPTY_CODE_HASH);
        assert_eq!(db.get_code_hash(B), H256::zero());
        assert_eq!(db.get_storage_root(A), EMPTY_TRIE_HASH);
        assert_ne!(db.get_hash().unwrap(), EMPTY_TRIE_HASH);
    }

    #[test]
    fn zero_values_are_not_stored() {
        let mut db = MemoryStateDb::new();
        db.create_account(A);
        db.set_state(A, word(1), word(1));
        assert_ne!(db.get_storage_root(A), EMPTY_TRIE_HASH);
        db.set_state(A, word(1), H256::zero());
        assert_eq!(db.get_storage_root(A), EMPTY_TRIE_HASH);
    }

    #[test]
    fn hash_tracks_state_only() {
        let mut one = MemoryStateDb::new();
        let mut two = MemoryStateDb::new().with_snapshot_base(40);
        for db in [&mut one, &mut two] {
            db.add_balance(A, 5.into(), BalanceChangeReason::GenesisBalance);
            db.set_code(B, &[0x60, 0x00]);
        }
        two.snapshot();
        assert_eq!(one.get_hash().unwrap(), two.get_hash().unwrap());
        two.set_nonce(A, 1);
        assert_ne!(one.get_hash().unwrap(), two.get_hash().unwrap());
    }

    #[test]
    fn self_destructed_accounts_vanish_at_end_of_transaction() {
        let mut db = in_transaction();
        db.add_balance(A, 7.into(), BalanceChangeReason::Transfer);
        db.self_destruct(A);
        assert!(db.has_self_destructed(A));
        assert!(db.exist(A));
        assert_eq!(db.get_balance(A), U256::zero());
        db.end_transaction().unwrap();
        assert!(!db.exist(A));
    }

    #[test]
    fn archive_per_block() {
        let mut db = MemoryStateDb::new();
        {
            let mut load = db.start_bulk_load(0).unwrap();
            load.set_balance(A, 1.into());
            load.close().unwrap();
        }
        db.begin_sync_period(0).unwrap();
        db.begin_block(1).unwrap();
        db.add_balance(A, 1.into(), BalanceChangeReason::Transfer);
        db.end_block().unwrap();

        assert_eq!(db.get_archive_block_height().unwrap(), Some(1));
        let mut genesis = db.get_archive_state(0).unwrap();
        let mut one = db.get_archive_state(1).unwrap();
        assert_eq!(genesis.get_balance(A), 1.into());
        assert_eq!(one.get_balance(A), 2.into());
        assert_eq!(one.get_hash().unwrap(), db.get_hash().unwrap());
        assert!(db.get_archive_state(2).is_err());
    }

    #[test]
    fn access_list_preparation() {
        let mut db = in_transaction();
        db.add_address_to_access_list(B);
        db.prepare_access_list(
            A,
            None,
            &[Address::from_low_u64_be(1)],
            &[AccessListItem {
                address: Address::from_low_u64_be(9),
                storage_keys: vec![word(3)],
            }],
        );
        assert!(!db.address_in_access_list(B), "preparation resets");
        assert!(db.address_in_access_list(A));
        assert!(db.address_in_access_list(Address::from_low_u64_be(1)));
        assert_eq!(
            db.slot_in_access_list(Address::from_low_u64_be(9), word(3)),
            (true, true)
        );
    }
}
