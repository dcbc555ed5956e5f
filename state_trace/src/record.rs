//! Capturing calls into a trace.

use std::{io::Write, sync::Arc};

use anyhow::Context as _;
use ethereum_types::{Address, H256, U256};
use log::{debug, warn};

use crate::{
    context::{EncodingContext, KeyCache},
    error::TraceError,
    operation::{Operation, SlotTarget, Target},
    state_db::{AccessListItem, ArchiveState, BalanceChangeReason, BulkLoad, Log, StateDb},
    trace::TraceWriter,
};

/// A proxy that forwards every call to `S`, and appends it to a trace.
///
/// Accessors cannot report write failures, so the first one is latched: later
/// records are dropped, and the failure is returned by [`StateDb::error`], by
/// every fallible call, and by [`RecordingStateDb::finish`].
///
/// Bulk loads and archive reads are forwarded but not recorded.
#[derive(Debug)]
pub struct RecordingStateDb<S, W> {
    inner: S,
    writer: TraceWriter<W>,
    ctx: EncodingContext,
    snapshots: u64,
    failure: Option<Arc<TraceError>>,
}

impl<S: StateDb, W: Write> RecordingStateDb<S, W> {
    pub fn new(inner: S, sink: W) -> Self {
        Self::with_key_cache(inner, sink, KeyCache::DEFAULT_CAPACITY)
    }

    /// The replaying side must use the same `key_cache_capacity`.
    pub fn with_key_cache(inner: S, sink: W, key_cache_capacity: usize) -> Self {
        Self {
            inner,
            writer: TraceWriter::new(sink),
            ctx: EncodingContext::new(key_cache_capacity),
            snapshots: 0,
            failure: None,
        }
    }

    /// Records written so far.
    pub fn records(&self) -> u64 {
        self.writer.records()
    }

    /// Bytes written so far.
    pub fn bytes(&self) -> u64 {
        self.writer.bytes()
    }

    /// Snapshots taken during the session.
    pub fn snapshots_taken(&self) -> u64 {
        self.snapshots
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Flush the trace, and hand back the engine and the sink.
    pub fn finish(mut self) -> anyhow::Result<(S, W)> {
        if let Err(e) = self.writer.flush() {
            self.latch(e.into());
        }
        self.check()?;
        debug!(
            "recorded {} operations, {} bytes, {} snapshots",
            self.writer.records(),
            self.writer.bytes(),
            self.snapshots
        );
        Ok((self.inner, self.writer.into_inner()))
    }

    fn record(&mut self, operation: Operation) {
        if self.failure.is_some() {
            return;
        }
        if let Err(e) = self.writer.write(&operation) {
            self.latch(e);
        }
    }

    fn latch(&mut self, e: TraceError) {
        if self.failure.is_none() {
            warn!("trace recording stopped: {e}");
            self.failure = Some(Arc::new(e));
        }
    }

    fn check(&self) -> anyhow::Result<()> {
        match &self.failure {
            Some(e) => Err(anyhow::Error::new(Arc::clone(e)).context("failed to record trace")),
            None => Ok(()),
        }
    }

    fn contract(&mut self, address: Address, op: impl FnOnce(Target) -> Operation) {
        let target = self.ctx.encode_contract(address);
        self.record(op(target))
    }

    fn slot(
        &mut self,
        address: Address,
        key: H256,
        op: impl FnOnce(SlotTarget) -> Operation,
    ) {
        let target = self.ctx.encode_slot(address, key);
        self.record(op(target))
    }
}

impl<S: StateDb, W: Write> StateDb for RecordingStateDb<S, W> {
    fn create_account(&mut self, address: Address) {
        self.contract(address, Operation::CreateAccount);
        self.inner.create_account(address)
    }
    fn exist(&mut self, address: Address) -> bool {
        self.contract(address, Operation::Exist);
        self.inner.exist(address)
    }
    fn empty(&mut self, address: Address) -> bool {
        self.contract(address, Operation::Empty);
        self.inner.empty(address)
    }
    fn self_destruct(&mut self, address: Address) {
        self.contract(address, Operation::SelfDestruct);
        self.inner.self_destruct(address)
    }
    fn has_self_destructed(&mut self, address: Address) -> bool {
        self.contract(address, Operation::HasSelfDestructed);
        self.inner.has_self_destructed(address)
    }

    fn get_balance(&mut self, address: Address) -> U256 {
        self.contract(address, Operation::GetBalance);
        self.inner.get_balance(address)
    }
    fn add_balance(&mut self, address: Address, amount: U256, reason: BalanceChangeReason) {
        self.contract(address, |target| Operation::AddBalance {
            target,
            amount,
            reason,
        });
        self.inner.add_balance(address, amount, reason)
    }
    fn sub_balance(&mut self, address: Address, amount: U256, reason: BalanceChangeReason) {
        self.contract(address, |target| Operation::SubBalance {
            target,
            amount,
            reason,
        });
        self.inner.sub_balance(address, amount, reason)
    }
    fn get_nonce(&mut self, address: Address) -> u64 {
        self.contract(address, Operation::GetNonce);
        self.inner.get_nonce(address)
    }
    fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.contract(address, |target| Operation::SetNonce { target, nonce });
        self.inner.set_nonce(address, nonce)
    }

    fn get_committed_state(&mut self, address: Address, key: H256) -> H256 {
        self.slot(address, key, Operation::GetCommittedState);
        self.inner.get_committed_state(address, key)
    }
    fn get_state(&mut self, address: Address, key: H256) -> H256 {
        self.slot(address, key, Operation::GetState);
        self.inner.get_state(address, key)
    }
    fn set_state(&mut self, address: Address, key: H256, value: H256) {
        self.slot(address, key, |slot| Operation::SetState { slot, value });
        self.inner.set_state(address, key, value)
    }
    fn get_storage_root(&mut self, address: Address) -> H256 {
        self.contract(address, Operation::GetStorageRoot);
        self.inner.get_storage_root(address)
    }
    fn get_transient_state(&mut self, address: Address, key: H256) -> H256 {
        self.slot(address, key, Operation::GetTransientState);
        self.inner.get_transient_state(address, key)
    }
    fn set_transient_state(&mut self, address: Address, key: H256, value: H256) {
        self.slot(address, key, |slot| Operation::SetTransientState {
            slot,
            value,
        });
        self.inner.set_transient_state(address, key, value)
    }

    fn get_code(&mut self, address: Address) -> Vec<u8> {
        self.contract(address, Operation::GetCode);
        self.inner.get_code(address)
    }
    fn get_code_size(&mut self, address: Address) -> usize {
        self.contract(address, Operation::GetCodeSize);
        self.inner.get_code_size(address)
    }
    fn get_code_hash(&mut self, address: Address) -> H256 {
        self.contract(address, Operation::GetCodeHash);
        self.inner.get_code_hash(address)
    }
    fn set_code(&mut self, address: Address, code: &[u8]) {
        self.contract(address, |target| Operation::SetCode {
            target,
            code: code.to_vec(),
        });
        self.inner.set_code(address, code)
    }

    fn snapshot(&mut self) -> i32 {
        let id = self.inner.snapshot();
        self.snapshots += 1;
        self.record(Operation::Snapshot(id));
        id
    }
    fn revert_to_snapshot(&mut self, id: i32) {
        self.record(Operation::RevertToSnapshot(id));
        self.inner.revert_to_snapshot(id)
    }

    fn add_refund(&mut self, gas: u64) {
        self.record(Operation::AddRefund(gas));
        self.inner.add_refund(gas)
    }
    fn sub_refund(&mut self, gas: u64) {
        self.record(Operation::SubRefund(gas));
        self.inner.sub_refund(gas)
    }
    fn get_refund(&mut self) -> u64 {
        self.record(Operation::GetRefund);
        self.inner.get_refund()
    }

    fn prepare_access_list(
        &mut self,
        sender: Address,
        destination: Option<Address>,
        precompiles: &[Address],
        access_list: &[AccessListItem],
    ) {
        self.record(Operation::PrepareAccessList {
            sender,
            destination,
            precompiles: precompiles.to_vec(),
            access_list: access_list.to_vec(),
        });
        self.inner
            .prepare_access_list(sender, destination, precompiles, access_list)
    }
    fn add_address_to_access_list(&mut self, address: Address) {
        self.contract(address, Operation::AddAddressToAccessList);
        self.inner.add_address_to_access_list(address)
    }
    fn address_in_access_list(&mut self, address: Address) -> bool {
        self.contract(address, Operation::AddressInAccessList);
        self.inner.address_in_access_list(address)
    }
    fn add_slot_to_access_list(&mut self, address: Address, key: H256) {
        self.slot(address, key, Operation::AddSlotToAccessList);
        self.inner.add_slot_to_access_list(address, key)
    }
    fn slot_in_access_list(&mut self, address: Address, key: H256) -> (bool, bool) {
        self.slot(address, key, Operation::SlotInAccessList);
        self.inner.slot_in_access_list(address, key)
    }

    fn set_tx_context(&mut self, tx_hash: H256, index: u32) {
        self.record(Operation::SetTxContext { tx_hash, index });
        self.inner.set_tx_context(tx_hash, index)
    }
    fn add_log(&mut self, log: Log) {
        self.record(Operation::AddLog(log.clone()));
        self.inner.add_log(log)
    }
    fn get_logs(&mut self, tx_hash: H256, block: u64, block_hash: H256) -> Vec<Log> {
        self.record(Operation::GetLogs {
            tx_hash,
            block,
            block_hash,
        });
        self.inner.get_logs(tx_hash, block, block_hash)
    }
    fn add_preimage(&mut self, hash: H256, preimage: &[u8]) {
        self.record(Operation::AddPreimage {
            hash,
            preimage: preimage.to_vec(),
        });
        self.inner.add_preimage(hash, preimage)
    }

    fn begin_sync_period(&mut self, number: u64) -> anyhow::Result<()> {
        self.record(Operation::BeginSyncPeriod(number));
        self.inner.begin_sync_period(number)?;
        self.check()
    }
    fn end_sync_period(&mut self) -> anyhow::Result<()> {
        self.record(Operation::EndSyncPeriod);
        self.inner.end_sync_period()?;
        self.check()
    }
    fn begin_block(&mut self, number: u64) -> anyhow::Result<()> {
        self.record(Operation::BeginBlock(number));
        self.inner.begin_block(number)?;
        self.check()
    }
    fn end_block(&mut self) -> anyhow::Result<()> {
        self.record(Operation::EndBlock);
        self.inner.end_block()?;
        self.check()
    }
    fn begin_transaction(&mut self, number: u32) -> anyhow::Result<()> {
        self.record(Operation::BeginTransaction(number));
        self.inner.begin_transaction(number)?;
        self.check()
    }
    fn end_transaction(&mut self) -> anyhow::Result<()> {
        self.record(Operation::EndTransaction);
        self.inner.end_transaction()?;
        self.check()
    }

    fn finalise(&mut self, delete_empty: bool) {
        self.record(Operation::Finalise { delete_empty });
        self.inner.finalise(delete_empty)
    }
    fn intermediate_root(&mut self, delete_empty: bool) -> H256 {
        self.record(Operation::IntermediateRoot { delete_empty });
        self.inner.intermediate_root(delete_empty)
    }
    fn commit(&mut self, block: u64, delete_empty: bool) -> anyhow::Result<H256> {
        self.record(Operation::Commit {
            block,
            delete_empty,
        });
        let root = self.inner.commit(block, delete_empty)?;
        self.check()?;
        Ok(root)
    }
    fn get_hash(&mut self) -> anyhow::Result<H256> {
        self.record(Operation::GetHash);
        let hash = self.inner.get_hash()?;
        self.check()?;
        Ok(hash)
    }

    fn start_bulk_load(&mut self, block: u64) -> anyhow::Result<Box<dyn BulkLoad + '_>> {
        self.check()?;
        self.inner.start_bulk_load(block)
    }
    fn get_archive_state(&mut self, block: u64) -> anyhow::Result<Box<dyn ArchiveState>> {
        self.inner.get_archive_state(block)
    }
    fn get_archive_block_height(&mut self) -> anyhow::Result<Option<u64>> {
        self.inner.get_archive_block_height()
    }

    fn error(&self) -> Option<anyhow::Error> {
        self.check().err().or_else(|| self.inner.error())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.record(Operation::Close);
        if let Err(e) = self.writer.flush() {
            self.latch(e.into());
        }
        self.inner.close().context("closing recorded engine")?;
        self.check()
    }
}
