#![allow(dead_code)]

use anyhow::bail;
use ethereum_types::{Address, H256, U256};
use rand::{rngs::StdRng, Rng as _, SeedableRng as _};
use state_trace::{AccessListItem, ArchiveState, BalanceChangeReason, BulkLoad, Log, StateDb};

pub fn contract(ix: u64) -> Address {
    Address::from_low_u64_be(0x1000 + ix)
}

pub fn key(ix: u64) -> H256 {
    H256::from_low_u64_be(ix)
}

/// Drive `db` through a sync period of three blocks with a handful of
/// transactions each, over a small pool of contracts and keys so that calls
/// often repeat the previous contract or slot.
///
/// Returns the final state hash.
pub fn workload<S: StateDb + ?Sized>(db: &mut S, seed: u64) -> anyhow::Result<H256> {
    let mut rng = StdRng::seed_from_u64(seed);
    db.begin_sync_period(1)?;
    for block in 1..=3 {
        db.begin_block(block)?;
        for tx in 0..4 {
            db.begin_transaction(tx)?;
            transaction(db, &mut rng, block, tx);
            db.end_transaction()?;
        }
        db.commit(block, true)?;
        db.end_block()?;
    }
    db.end_sync_period()?;
    db.get_hash()
}

fn transaction<S: StateDb + ?Sized>(db: &mut S, rng: &mut StdRng, block: u64, tx: u32) {
    let tx_hash = H256::from_low_u64_be(block << 32 | u64::from(tx));
    let sender = Address::from_low_u64_be(0xee00 + u64::from(tx));
    let to = contract(rng.gen_range(0..4));

    db.set_tx_context(tx_hash, tx);
    db.prepare_access_list(
        sender,
        Some(to),
        &[Address::from_low_u64_be(1), Address::from_low_u64_be(2)],
        &[AccessListItem {
            address: to,
            storage_keys: vec![key(0), key(1)],
        }],
    );
    let nonce = db.get_nonce(sender);
    db.set_nonce(sender, nonce + 1);
    db.add_balance(sender, 1_000_000.into(), BalanceChangeReason::Transfer);
    db.sub_balance(sender, 21_000.into(), BalanceChangeReason::GasBuy);
    if tx == 0 {
        db.set_code(to, &[0x60, block as u8, 0x00]);
    }
    db.get_code_hash(to);

    // the same contract, then the same slot, then a recently used one
    db.get_state(to, key(0));
    db.set_state(to, key(0), H256::from_low_u64_be(u64::from(tx) + 1));
    db.get_state(to, key(1));
    db.get_committed_state(to, key(0));

    for _ in 0..rng.gen_range(4..16) {
        let c = contract(rng.gen_range(0..4));
        let k = key(rng.gen_range(0..6));
        match rng.gen_range(0..9) {
            0 => {
                db.get_state(c, k);
            }
            1 | 2 => db.set_state(c, k, H256::from_low_u64_be(rng.gen())),
            3 => {
                db.get_committed_state(c, k);
            }
            4 => db.set_transient_state(c, k, H256::repeat_byte(rng.gen())),
            5 => {
                db.get_transient_state(c, k);
            }
            6 => db.add_balance(
                c,
                rng.gen_range(1..1000u64).into(),
                BalanceChangeReason::Transfer,
            ),
            7 => {
                let id = db.snapshot();
                db.set_state(c, k, H256::repeat_byte(0xee));
                if rng.gen_bool(0.5) {
                    db.revert_to_snapshot(id);
                }
            }
            _ => db.add_log(Log {
                address: c,
                topics: vec![k],
                data: vec![tx as u8; 3],
            }),
        }
    }

    db.add_refund(4800);
    db.sub_refund(2400);
    db.get_refund();
    db.get_logs(tx_hash, block, H256::zero());
}

/// An engine that answers every call with a fixed value and remembers each
/// call with its arguments.
///
/// Snapshot identifiers count down from 100 in steps of three.
#[derive(Debug)]
pub struct CapturingStateDb {
    pub calls: Vec<String>,
    next_snapshot: i32,
}

impl Default for CapturingStateDb {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            next_snapshot: 100,
        }
    }
}

macro_rules! called {
    ($db:ident, $($arg:tt)*) => {
        $db.calls.push(format!($($arg)*))
    };
}

impl StateDb for CapturingStateDb {
    fn create_account(&mut self, address: Address) {
        called!(self, "create_account({address:?})");
    }
    fn exist(&mut self, address: Address) -> bool {
        called!(self, "exist({address:?})");
        false
    }
    fn empty(&mut self, address: Address) -> bool {
        called!(self, "empty({address:?})");
        true
    }
    fn self_destruct(&mut self, address: Address) {
        called!(self, "self_destruct({address:?})");
    }
    fn has_self_destructed(&mut self, address: Address) -> bool {
        called!(self, "has_self_destructed({address:?})");
        false
    }
    fn get_balance(&mut self, address: Address) -> U256 {
        called!(self, "get_balance({address:?})");
        U256::zero()
    }
    fn add_balance(&mut self, address: Address, amount: U256, reason: BalanceChangeReason) {
        called!(self, "add_balance({address:?}, {amount}, {reason})");
    }
    fn sub_balance(&mut self, address: Address, amount: U256, reason: BalanceChangeReason) {
        called!(self, "sub_balance({address:?}, {amount}, {reason})");
    }
    fn get_nonce(&mut self, address: Address) -> u64 {
        called!(self, "get_nonce({address:?})");
        0
    }
    fn set_nonce(&mut self, address: Address, nonce: u64) {
        called!(self, "set_nonce({address:?}, {nonce})");
    }
    fn get_committed_state(&mut self, address: Address, key: H256) -> H256 {
        called!(self, "get_committed_state({address:?}, {key:?})");
        H256::zero()
    }
    fn get_state(&mut self, address: Address, key: H256) -> H256 {
        called!(self, "get_state({address:?}, {key:?})");
        H256::zero()
    }
    fn set_state(&mut self, address: Address, key: H256, value: H256) {
        called!(self, "set_state({address:?}, {key:?}, {value:?})");
    }
    fn get_storage_root(&mut self, address: Address) -> H256 {
        called!(self, "get_storage_root({address:?})");
        H256::zero()
    }
    fn get_transient_state(&mut self, address: Address, key: H256) -> H256 {
        called!(self, "get_transient_state({address:?}, {key:?})");
        H256::zero()
    }
    fn set_transient_state(&mut self, address: Address, key: H256, value: H256) {
        called!(self, "set_transient_state({address:?}, {key:?}, {value:?})");
    }
    fn get_code(&mut self, address: Address) -> Vec<u8> {
        called!(self, "get_code({address:?})");
        Vec::new()
    }
    fn get_code_size(&mut self, address: Address) -> usize {
        called!(self, "get_code_size({address:?})");
        0
    }
    fn get_code_hash(&mut self, address: Address) -> H256 {
        called!(self, "get_code_hash({address:?})");
        H256::zero()
    }
    fn set_code(&mut self, address: Address, code: &[u8]) {
        called!(self, "set_code({address:?}, {code:?})");
    }
    fn snapshot(&mut self) -> i32 {
        let id = self.next_snapshot;
        self.next_snapshot -= 3;
        called!(self, "snapshot() -> {id}");
        id
    }
    fn revert_to_snapshot(&mut self, id: i32) {
        called!(self, "revert_to_snapshot({id})");
    }
    fn add_refund(&mut self, gas: u64) {
        called!(self, "add_refund({gas})");
    }
    fn sub_refund(&mut self, gas: u64) {
        called!(self, "sub_refund({gas})");
    }
    fn get_refund(&mut self) -> u64 {
        called!(self, "get_refund()");
        0
    }
    fn prepare_access_list(
        &mut self,
        sender: Address,
        destination: Option<Address>,
        precompiles: &[Address],
        access_list: &[AccessListItem],
    ) {
        called!(
            self,
            "prepare_access_list({sender:?}, {destination:?}, {precompiles:?}, {access_list:?})"
        );
    }
    fn add_address_to_access_list(&mut self, address: Address) {
        called!(self, "add_address_to_access_list({address:?})");
    }
    fn address_in_access_list(&mut self, address: Address) -> bool {
        called!(self, "address_in_access_list({address:?})");
        false
    }
    fn add_slot_to_access_list(&mut self, address: Address, key: H256) {
        called!(self, "add_slot_to_access_list({address:?}, {key:?})");
    }
    fn slot_in_access_list(&mut self, address: Address, key: H256) -> (bool, bool) {
        called!(self, "slot_in_access_list({address:?}, {key:?})");
        (false, false)
    }
    fn set_tx_context(&mut self, tx_hash: H256, index: u32) {
        called!(self, "set_tx_context({tx_hash:?}, {index})");
    }
    fn add_log(&mut self, log: Log) {
        called!(self, "add_log({log:?})");
    }
    fn get_logs(&mut self, tx_hash: H256, block: u64, block_hash: H256) -> Vec<Log> {
        called!(self, "get_logs({tx_hash:?}, {block}, {block_hash:?})");
        Vec::new()
    }
    fn add_preimage(&mut self, hash: H256, preimage: &[u8]) {
        called!(self, "add_preimage({hash:?}, {preimage:?})");
    }
    fn begin_sync_period(&mut self, number: u64) -> anyhow::Result<()> {
        called!(self, "begin_sync_period({number})");
        Ok(())
    }
    fn end_sync_period(&mut self) -> anyhow::Result<()> {
        called!(self, "end_sync_period()");
        Ok(())
    }
    fn begin_block(&mut self, number: u64) -> anyhow::Result<()> {
        called!(self, "begin_block({number})");
        Ok(())
    }
    fn end_block(&mut self) -> anyhow::Result<()> {
        called!(self, "end_block()");
        Ok(())
    }
    fn begin_transaction(&mut self, number: u32) -> anyhow::Result<()> {
        called!(self, "begin_transaction({number})");
        Ok(())
    }
    fn end_transaction(&mut self) -> anyhow::Result<()> {
        called!(self, "end_transaction()");
        Ok(())
    }
    fn finalise(&mut self, delete_empty: bool) {
        called!(self, "finalise({delete_empty})");
    }
    fn intermediate_root(&mut self, delete_empty: bool) -> H256 {
        called!(self, "intermediate_root({delete_empty})");
        H256::zero()
    }
    fn commit(&mut self, block: u64, delete_empty: bool) -> anyhow::Result<H256> {
        called!(self, "commit({block}, {delete_empty})");
        Ok(H256::zero())
    }
    fn get_hash(&mut self) -> anyhow::Result<H256> {
        called!(self, "get_hash()");
        Ok(H256::zero())
    }
    fn start_bulk_load(&mut self, _block: u64) -> anyhow::Result<Box<dyn BulkLoad + '_>> {
        bail!("bulk loading is not captured")
    }
    fn get_archive_state(&mut self, _block: u64) -> anyhow::Result<Box<dyn ArchiveState>> {
        bail!("archives are not captured")
    }
    fn get_archive_block_height(&mut self) -> anyhow::Result<Option<u64>> {
        Ok(None)
    }
    fn error(&self) -> Option<anyhow::Error> {
        None
    }
    fn close(&mut self) -> anyhow::Result<()> {
        called!(self, "close()");
        Ok(())
    }
}

/// Call every recordable method at least once, reaching contract and slot
/// references both explicitly and through each compact form.
pub fn every_call<S: StateDb + ?Sized>(db: &mut S) -> anyhow::Result<()> {
    let (a, b) = (contract(0), contract(1));
    let tx_hash = H256::repeat_byte(7);

    db.begin_sync_period(1)?;
    db.begin_block(2)?;
    db.begin_transaction(0)?;
    db.set_tx_context(tx_hash, 0);
    db.prepare_access_list(
        a,
        None,
        &[contract(9)],
        &[AccessListItem {
            address: b,
            storage_keys: vec![key(3)],
        }],
    );

    db.create_account(a);
    db.exist(a);
    db.empty(b);
    db.has_self_destructed(b);
    db.get_balance(a);
    db.add_balance(a, 5.into(), BalanceChangeReason::Transfer);
    db.sub_balance(a, 2.into(), BalanceChangeReason::GasBuy);
    db.get_nonce(b);
    db.set_nonce(b, 3);
    db.set_code(b, &[0x60, 0x01]);
    db.set_code(a, &[0x00]);
    db.get_code(a);
    db.get_code_size(a);
    db.get_code_hash(b);
    db.get_storage_root(b);

    db.get_state(a, key(1));
    db.set_state(a, key(1), H256::repeat_byte(0x11));
    db.get_committed_state(a, key(2));
    db.get_state(a, key(1));
    db.get_state(b, key(4));
    db.set_transient_state(b, key(4), H256::repeat_byte(0x22));
    db.get_transient_state(b, key(5));

    let outer = db.snapshot();
    db.self_destruct(b);
    let inner = db.snapshot();
    db.revert_to_snapshot(inner);
    db.revert_to_snapshot(outer);

    db.add_refund(10);
    db.sub_refund(4);
    db.get_refund();
    db.add_address_to_access_list(b);
    db.address_in_access_list(a);
    db.add_slot_to_access_list(a, key(6));
    db.slot_in_access_list(b, key(6));
    db.add_log(Log {
        address: a,
        topics: vec![key(1), key(2)],
        data: vec![1, 2, 3],
    });
    db.get_logs(tx_hash, 2, H256::zero());
    db.add_preimage(H256::repeat_byte(9), b"preimage");
    db.finalise(true);
    db.intermediate_root(false);
    db.end_transaction()?;

    db.commit(2, true)?;
    db.end_block()?;
    db.end_sync_period()?;
    db.get_hash()?;
    db.close()
}
