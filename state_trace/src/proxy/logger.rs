use std::fmt;

use ethereum_types::{Address, H256, U256};
use log::Level;

use crate::state_db::{AccessListItem, ArchiveState, BalanceChangeReason, BulkLoad, Log, StateDb};

pub const TARGET: &str = "state_db";

/// A proxy that logs every call to `S`, with its arguments and result, under
/// the [`TARGET`] log target.
#[derive(Debug)]
pub struct LoggingStateDb<S> {
    inner: S,
    level: Level,
}

impl<S: StateDb> LoggingStateDb<S> {
    pub fn new(inner: S) -> Self {
        Self::with_level(inner, Level::Debug)
    }

    pub fn with_level(inner: S, level: Level) -> Self {
        Self { inner, level }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn emit(&self, call: fmt::Arguments<'_>) {
        log::log!(target: TARGET, self.level, "{call}");
    }

    fn read<T: fmt::Debug>(&self, call: fmt::Arguments<'_>, out: T) -> T {
        log::log!(target: TARGET, self.level, "{call} = {out:?}");
        out
    }
}

impl<S: StateDb> StateDb for LoggingStateDb<S> {
    fn create_account(&mut self, address: Address) {
        self.inner.create_account(address);
        self.emit(format_args!("create_account({address:?})"))
    }
    fn exist(&mut self, address: Address) -> bool {
        let out = self.inner.exist(address);
        self.read(format_args!("exist({address:?})"), out)
    }
    fn empty(&mut self, address: Address) -> bool {
        let out = self.inner.empty(address);
        self.read(format_args!("empty({address:?})"), out)
    }
    fn self_destruct(&mut self, address: Address) {
        self.inner.self_destruct(address);
        self.emit(format_args!("self_destruct({address:?})"))
    }
    fn has_self_destructed(&mut self, address: Address) -> bool {
        let out = self.inner.has_self_destructed(address);
        self.read(format_args!("has_self_destructed({address:?})"), out)
    }
    fn get_balance(&mut self, address: Address) -> U256 {
        let out = self.inner.get_balance(address);
        self.read(format_args!("get_balance({address:?})"), out)
    }
    fn add_balance(&mut self, address: Address, amount: U256, reason: BalanceChangeReason) {
        self.inner.add_balance(address, amount, reason);
        self.emit(format_args!("add_balance({address:?}, {amount}, {reason})"))
    }
    fn sub_balance(&mut self, address: Address, amount: U256, reason: BalanceChangeReason) {
        self.inner.sub_balance(address, amount, reason);
        self.emit(format_args!("sub_balance({address:?}, {amount}, {reason})"))
    }
    fn get_nonce(&mut self, address: Address) -> u64 {
        let out = self.inner.get_nonce(address);
        self.read(format_args!("get_nonce({address:?})"), out)
    }
    fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.inner.set_nonce(address, nonce);
        self.emit(format_args!("set_nonce({address:?}, {nonce})"))
    }
    fn get_committed_state(&mut self, address: Address, key: H256) -> H256 {
        let out = self.inner.get_committed_state(address, key);
        self.read(
            format_args!("get_committed_state({address:?}, {key:?})"),
            out,
        )
    }
    fn get_state(&mut self, address: Address, key: H256) -> H256 {
        let out = self.inner.get_state(address, key);
        self.read(format_args!("get_state({address:?}, {key:?})"), out)
    }
    fn set_state(&mut self, address: Address, key: H256, value: H256) {
        self.inner.set_state(address, key, value);
        self.emit(format_args!("set_state({address:?}, {key:?}, {value:?})"))
    }
    fn get_storage_root(&mut self, address: Address) -> H256 {
        let out = self.inner.get_storage_root(address);
        self.read(format_args!("get_storage_root({address:?})"), out)
    }
    fn get_transient_state(&mut self, address: Address, key: H256) -> H256 {
        let out = self.inner.get_transient_state(address, key);
        self.read(
            format_args!("get_transient_state({address:?}, {key:?})"),
            out,
        )
    }
    fn set_transient_state(&mut self, address: Address, key: H256, value: H256) {
        self.inner.set_transient_state(address, key, value);
        self.emit(format_args!(
            "set_transient_state({address:?}, {key:?}, {value:?})"
        ))
    }
    fn get_code(&mut self, address: Address) -> Vec<u8> {
        let out = self.inner.get_code(address);
        log::log!(
            target: TARGET,
            self.level,
            "get_code({address:?}) = 0x{}",
            hex::encode(&out)
        );
        out
    }
    fn get_code_size(&mut self, address: Address) -> usize {
        let out = self.inner.get_code_size(address);
        self.read(format_args!("get_code_size({address:?})"), out)
    }
    fn get_code_hash(&mut self, address: Address) -> H256 {
        let out = self.inner.get_code_hash(address);
        self.read(format_args!("get_code_hash({address:?})"), out)
    }
    fn set_code(&mut self, address: Address, code: &[u8]) {
        self.inner.set_code(address, code);
        self.emit(format_args!(
            "set_code({address:?}, 0x{})",
            hex::encode(code)
        ))
    }
    fn snapshot(&mut self) -> i32 {
        let out = self.inner.snapshot();
        self.read(format_args!("snapshot()"), out)
    }
    fn revert_to_snapshot(&mut self, id: i32) {
        self.inner.revert_to_snapshot(id);
        self.emit(format_args!("revert_to_snapshot({id})"))
    }
    fn add_refund(&mut self, gas: u64) {
        self.inner.add_refund(gas);
        self.emit(format_args!("add_refund({gas})"))
    }
    fn sub_refund(&mut self, gas: u64) {
        self.inner.sub_refund(gas);
        self.emit(format_args!("sub_refund({gas})"))
    }
    fn get_refund(&mut self) -> u64 {
        let out = self.inner.get_refund();
        self.read(format_args!("get_refund()"), out)
    }
    fn prepare_access_list(
        &mut self,
        sender: Address,
        destination: Option<Address>,
        precompiles: &[Address],
        access_list: &[AccessListItem],
    ) {
        self.inner
            .prepare_access_list(sender, destination, precompiles, access_list);
        self.emit(format_args!(
            "prepare_access_list({sender:?}, {destination:?}, {precompiles:?}, {access_list:?})"
        ))
    }
    fn add_address_to_access_list(&mut self, address: Address) {
        self.inner.add_address_to_access_list(address);
        self.emit(format_args!("add_address_to_access_list({address:?})"))
    }
    fn address_in_access_list(&mut self, address: Address) -> bool {
        let out = self.inner.address_in_access_list(address);
        self.read(format_args!("address_in_access_list({address:?})"), out)
    }
    fn add_slot_to_access_list(&mut self, address: Address, key: H256) {
        self.inner.add_slot_to_access_list(address, key);
        self.emit(format_args!(
            "add_slot_to_access_list({address:?}, {key:?})"
        ))
    }
    fn slot_in_access_list(&mut self, address: Address, key: H256) -> (bool, bool) {
        let out = self.inner.slot_in_access_list(address, key);
        self.read(
            format_args!("slot_in_access_list({address:?}, {key:?})"),
            out,
        )
    }
    fn set_tx_context(&mut self, tx_hash: H256, index: u32) {
        self.inner.set_tx_context(tx_hash, index);
        self.emit(format_args!("set_tx_context({tx_hash:?}, {index})"))
    }
    fn add_log(&mut self, log: Log) {
        let call = format!("add_log({log:?})");
        self.inner.add_log(log);
        self.emit(format_args!("{call}"))
    }
    fn get_logs(&mut self, tx_hash: H256, block: u64, block_hash: H256) -> Vec<Log> {
        let out = self.inner.get_logs(tx_hash, block, block_hash);
        self.read(
            format_args!("get_logs({tx_hash:?}, {block}, {block_hash:?})"),
            out,
        )
    }
    fn add_preimage(&mut self, hash: H256, preimage: &[u8]) {
        self.inner.add_preimage(hash, preimage);
        self.emit(format_args!(
            "add_preimage({hash:?}, 0x{})",
            hex::encode(preimage)
        ))
    }
    fn begin_sync_period(&mut self, number: u64) -> anyhow::Result<()> {
        let out = self.inner.begin_sync_period(number);
        self.read(format_args!("begin_sync_period({number})"), out)
    }
    fn end_sync_period(&mut self) -> anyhow::Result<()> {
        let out = self.inner.end_sync_period();
        self.read(format_args!("end_sync_period()"), out)
    }
    fn begin_block(&mut self, number: u64) -> anyhow::Result<()> {
        let out = self.inner.begin_block(number);
        self.read(format_args!("begin_block({number})"), out)
    }
    fn end_block(&mut self) -> anyhow::Result<()> {
        let out = self.inner.end_block();
        self.read(format_args!("end_block()"), out)
    }
    fn begin_transaction(&mut self, number: u32) -> anyhow::Result<()> {
        let out = self.inner.begin_transaction(number);
        self.read(format_args!("begin_transaction({number})"), out)
    }
    fn end_transaction(&mut self) -> anyhow::Result<()> {
        let out = self.inner.end_transaction();
        self.read(format_args!("end_transaction()"), out)
    }
    fn finalise(&mut self, delete_empty: bool) {
        self.inner.finalise(delete_empty);
        self.emit(format_args!("finalise({delete_empty})"))
    }
    fn intermediate_root(&mut self, delete_empty: bool) -> H256 {
        let out = self.inner.intermediate_root(delete_empty);
        self.read(format_args!("intermediate_root({delete_empty})"), out)
    }
    fn commit(&mut self, block: u64, delete_empty: bool) -> anyhow::Result<H256> {
        let out = self.inner.commit(block, delete_empty);
        self.read(format_args!("commit({block}, {delete_empty})"), out)
    }
    fn get_hash(&mut self) -> anyhow::Result<H256> {
        let out = self.inner.get_hash();
        self.read(format_args!("get_hash()"), out)
    }
    fn start_bulk_load(&mut self, block: u64) -> anyhow::Result<Box<dyn BulkLoad + '_>> {
        log::log!(target: TARGET, self.level, "start_bulk_load({block})");
        self.inner.start_bulk_load(block)
    }
    fn get_archive_state(&mut self, block: u64) -> anyhow::Result<Box<dyn ArchiveState>> {
        log::log!(target: TARGET, self.level, "get_archive_state({block})");
        self.inner.get_archive_state(block)
    }
    fn get_archive_block_height(&mut self) -> anyhow::Result<Option<u64>> {
        let out = self.inner.get_archive_block_height();
        self.read(format_args!("get_archive_block_height()"), out)
    }
    fn error(&self) -> Option<anyhow::Error> {
        self.inner.error()
    }
    fn close(&mut self) -> anyhow::Result<()> {
        let out = self.inner.close();
        self.read(format_args!("close()"), out)
    }
}
