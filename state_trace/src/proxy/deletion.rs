use std::{
    collections::BTreeMap,
    sync::Arc,
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context as _};
use ethereum_types::{Address, H256, U256};
use log::{debug, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{
    replay::channel_capacity,
    state_db::{AccessListItem, ArchiveState, BalanceChangeReason, BulkLoad, Log, StateDb},
};

/// Events buffered ahead of the consumer by default.
pub const DEFAULT_CAPACITY: usize = 1024;

/// A contract was created (`deleted: false`) or self-destructed
/// (`deleted: true`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContractLiveness {
    pub address: Address,
    pub deleted: bool,
}

/// A proxy that publishes [`ContractLiveness`] events to a consumer thread.
///
/// Publishing blocks when the channel is full. [`StateDb::close`] returns
/// only after the consumer has seen every event, and so does dropping the
/// proxy.
///
/// Must not be used from within an asynchronous runtime.
#[derive(Debug)]
pub struct DeletionTrackingStateDb<S> {
    inner: S,
    events: Option<mpsc::Sender<ContractLiveness>>,
    consumer: Option<JoinHandle<()>>,
}

impl<S: StateDb> DeletionTrackingStateDb<S> {
    /// Feed events to `sink` on a dedicated thread. `capacity` is clamped as
    /// for [`ReplayConfig::channel_capacity`](crate::ReplayConfig::channel_capacity).
    pub fn new(
        inner: S,
        capacity: usize,
        mut sink: impl FnMut(ContractLiveness) + Send + 'static,
    ) -> anyhow::Result<Self> {
        let (tx, mut rx) = mpsc::channel(channel_capacity(capacity));
        let consumer = thread::Builder::new()
            .name("deletion-tracker".into())
            .spawn(move || {
                let mut seen = 0u64;
                while let Some(event) = rx.blocking_recv() {
                    sink(event);
                    seen += 1;
                }
                debug!("deletion tracker drained {seen} events");
            })
            .context("couldn't spawn deletion tracker")?;
        Ok(Self {
            inner,
            events: Some(tx),
            consumer: Some(consumer),
        })
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn publish(&mut self, address: Address, deleted: bool) {
        if let Some(events) = &self.events {
            if events
                .blocking_send(ContractLiveness { address, deleted })
                .is_err()
            {
                warn!("deletion tracker has stopped, dropping event for {address:?}");
            }
        }
    }
}

impl<S> DeletionTrackingStateDb<S> {
    /// Close the channel, and wait for the consumer to drain it.
    fn shutdown(&mut self) -> anyhow::Result<()> {
        drop(self.events.take());
        match self.consumer.take() {
            Some(consumer) => consumer
                .join()
                .map_err(|_| anyhow!("deletion tracker panicked")),
            None => Ok(()),
        }
    }
}

impl<S> Drop for DeletionTrackingStateDb<S> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("{e}")
        }
    }
}

impl<S: StateDb> StateDb for DeletionTrackingStateDb<S> {
    fn create_account(&mut self, address: Address) {
        self.inner.create_account(address);
        self.publish(address, false)
    }
    fn exist(&mut self, address: Address) -> bool {
        self.inner.exist(address)
    }
    fn empty(&mut self, address: Address) -> bool {
        self.inner.empty(address)
    }
    fn self_destruct(&mut self, address: Address) {
        self.inner.self_destruct(address);
        self.publish(address, true)
    }
    fn has_self_destructed(&mut self, address: Address) -> bool {
        self.inner.has_self_destructed(address)
    }
    fn get_balance(&mut self, address: Address) -> U256 {
        self.inner.get_balance(address)
    }
    fn add_balance(&mut self, address: Address, amount: U256, reason: BalanceChangeReason) {
        self.inner.add_balance(address, amount, reason)
    }
    fn sub_balance(&mut self, address: Address, amount: U256, reason: BalanceChangeReason) {
        self.inner.sub_balance(address, amount, reason)
    }
    fn get_nonce(&mut self, address: Address) -> u64 {
        self.inner.get_nonce(address)
    }
    fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.inner.set_nonce(address, nonce)
    }
    fn get_committed_state(&mut self, address: Address, key: H256) -> H256 {
        self.inner.get_committed_state(address, key)
    }
    fn get_state(&mut self, address: Address, key: H256) -> H256 {
        self.inner.get_state(address, key)
    }
    fn set_state(&mut self, address: Address, key: H256, value: H256) {
        self.inner.set_state(address, key, value)
    }
    fn get_storage_root(&mut self, address: Address) -> H256 {
        self.inner.get_storage_root(address)
    }
    fn get_transient_state(&mut self, address: Address, key: H256) -> H256 {
        self.inner.get_transient_state(address, key)
    }
    fn set_transient_state(&mut self, address: Address, key: H256, value: H256) {
        self.inner.set_transient_state(address, key, value)
    }
    fn get_code(&mut self, address: Address) -> Vec<u8> {
        self.inner.get_code(address)
    }
    fn get_code_size(&mut self, address: Address) -> usize {
        self.inner.get_code_size(address)
    }
    fn get_code_hash(&mut self, address: Address) -> H256 {
        self.inner.get_code_hash(address)
    }
    fn set_code(&mut self, address: Address, code: &[u8]) {
        self.inner.set_code(address, code)
    }
    fn snapshot(&mut self) -> i32 {
        self.inner.snapshot()
    }
    fn revert_to_snapshot(&mut self, id: i32) {
        self.inner.revert_to_snapshot(id)
    }
    fn add_refund(&mut self, gas: u64) {
        self.inner.add_refund(gas)
    }
    fn sub_refund(&mut self, gas: u64) {
        self.inner.sub_refund(gas)
    }
    fn get_refund(&mut self) -> u64 {
        self.inner.get_refund()
    }
    fn prepare_access_list(
        &mut self,
        sender: Address,
        destination: Option<Address>,
        precompiles: &[Address],
        access_list: &[AccessListItem],
    ) {
        self.inner
            .prepare_access_list(sender, destination, precompiles, access_list)
    }
    fn add_address_to_access_list(&mut self, address: Address) {
        self.inner.add_address_to_access_list(address)
    }
    fn address_in_access_list(&mut self, address: Address) -> bool {
        self.inner.address_in_access_list(address)
    }
    fn add_slot_to_access_list(&mut self, address: Address, key: H256) {
        self.inner.add_slot_to_access_list(address, key)
    }
    fn slot_in_access_list(&mut self, address: Address, key: H256) -> (bool, bool) {
        self.inner.slot_in_access_list(address, key)
    }
    fn set_tx_context(&mut self, tx_hash: H256, index: u32) {
        self.inner.set_tx_context(tx_hash, index)
    }
    fn add_log(&mut self, log: Log) {
        self.inner.add_log(log)
    }
    fn get_logs(&mut self, tx_hash: H256, block: u64, block_hash: H256) -> Vec<Log> {
        self.inner.get_logs(tx_hash, block, block_hash)
    }
    fn add_preimage(&mut self, hash: H256, preimage: &[u8]) {
        self.inner.add_preimage(hash, preimage)
    }
    fn begin_sync_period(&mut self, number: u64) -> anyhow::Result<()> {
        self.inner.begin_sync_period(number)
    }
    fn end_sync_period(&mut self) -> anyhow::Result<()> {
        self.inner.end_sync_period()
    }
    fn begin_block(&mut self, number: u64) -> anyhow::Result<()> {
        self.inner.begin_block(number)
    }
    fn end_block(&mut self) -> anyhow::Result<()> {
        self.inner.end_block()
    }
    fn begin_transaction(&mut self, number: u32) -> anyhow::Result<()> {
        self.inner.begin_transaction(number)
    }
    fn end_transaction(&mut self) -> anyhow::Result<()> {
        self.inner.end_transaction()
    }
    fn finalise(&mut self, delete_empty: bool) {
        self.inner.finalise(delete_empty)
    }
    fn intermediate_root(&mut self, delete_empty: bool) -> H256 {
        self.inner.intermediate_root(delete_empty)
    }
    fn commit(&mut self, block: u64, delete_empty: bool) -> anyhow::Result<H256> {
        self.inner.commit(block, delete_empty)
    }
    fn get_hash(&mut self) -> anyhow::Result<H256> {
        self.inner.get_hash()
    }
    fn start_bulk_load(&mut self, block: u64) -> anyhow::Result<Box<dyn BulkLoad + '_>> {
        self.inner.start_bulk_load(block)
    }
    fn get_archive_state(&mut self, block: u64) -> anyhow::Result<Box<dyn ArchiveState>> {
        self.inner.get_archive_state(block)
    }
    fn get_archive_block_height(&mut self) -> anyhow::Result<Option<u64>> {
        self.inner.get_archive_block_height()
    }
    fn error(&self) -> Option<anyhow::Error> {
        self.inner.error()
    }
    /// Closes the channel and waits for the consumer before closing the
    /// wrapped engine.
    fn close(&mut self) -> anyhow::Result<()> {
        let drained = self.shutdown();
        self.inner.close()?;
        drained
    }
}

/// A ready-made sink for [`DeletionTrackingStateDb`]: the latest liveness of
/// every contract seen.
#[derive(Debug, Clone, Default)]
pub struct DeletedAccounts {
    latest: Arc<Mutex<BTreeMap<Address, bool>>>,
}

impl DeletedAccounts {
    pub fn sink(&self) -> impl FnMut(ContractLiveness) + Send + 'static {
        let latest = Arc::clone(&self.latest);
        move |ContractLiveness { address, deleted }| {
            latest.lock().insert(address, deleted);
        }
    }

    /// Contracts whose latest event was a deletion.
    pub fn deleted(&self) -> Vec<Address> {
        self.latest
            .lock()
            .iter()
            .filter_map(|(address, deleted)| deleted.then_some(*address))
            .collect()
    }

    /// [`None`] if no event was seen for `address`.
    pub fn is_deleted(&self, address: &Address) -> Option<bool> {
        self.latest.lock().get(address).copied()
    }

    pub fn len(&self) -> usize {
        self.latest.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc as std_mpsc;

    use super::*;
    use crate::memory::MemoryStateDb;

    #[test]
    fn every_event_is_delivered_before_close_returns() {
        let accounts = DeletedAccounts::default();
        let mut db = DeletionTrackingStateDb::new(MemoryStateDb::new(), 2, accounts.sink()).unwrap();
        for n in 0..100 {
            db.create_account(Address::from_low_u64_be(n));
        }
        for n in (0..100).step_by(3) {
            db.self_destruct(Address::from_low_u64_be(n));
        }
        db.create_account(Address::from_low_u64_be(0));
        db.close().unwrap();

        assert_eq!(accounts.len(), 100);
        assert_eq!(accounts.deleted().len(), 33);
        assert_eq!(accounts.is_deleted(&Address::from_low_u64_be(0)), Some(false));
        assert_eq!(accounts.is_deleted(&Address::from_low_u64_be(3)), Some(true));
        assert_eq!(accounts.is_deleted(&Address::from_low_u64_be(1)), Some(false));
        assert_eq!(accounts.is_deleted(&Address::from_low_u64_be(500)), None);

        // the consumer is gone, but the engine is still closed only once
        let err = db.close().unwrap_err();
        assert_eq!(err.to_string(), "engine closed twice");
    }

    #[test]
    fn oversized_capacity_is_clamped() {
        let accounts = DeletedAccounts::default();
        let mut db =
            DeletionTrackingStateDb::new(MemoryStateDb::new(), usize::MAX, accounts.sink())
                .unwrap();
        db.create_account(Address::repeat_byte(2));
        db.close().unwrap();
        assert_eq!(accounts.is_deleted(&Address::repeat_byte(2)), Some(false));
    }

    #[test]
    fn drop_drains_too() {
        let (tx, rx) = std_mpsc::channel();
        {
            let mut db = DeletionTrackingStateDb::new(MemoryStateDb::new(), 1, move |event| {
                tx.send(event).unwrap()
            })
            .unwrap();
            db.create_account(Address::repeat_byte(1));
            db.self_destruct(Address::repeat_byte(1));
        }
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            [
                ContractLiveness {
                    address: Address::repeat_byte(1),
                    deleted: false
                },
                ContractLiveness {
                    address: Address::repeat_byte(1),
                    deleted: true
                },
            ]
        );
    }

    #[test]
    fn only_liveness_changes_are_published() {
        let accounts = DeletedAccounts::default();
        let mut db = DeletionTrackingStateDb::new(
            MemoryStateDb::new(),
            DEFAULT_CAPACITY,
            accounts.sink(),
        )
        .unwrap();
        db.add_balance(Address::zero(), 1.into(), BalanceChangeReason::Transfer);
        db.set_nonce(Address::zero(), 1);
        db.close().unwrap();
        assert!(accounts.is_empty());
    }
}
