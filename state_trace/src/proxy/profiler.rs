use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use ethereum_types::{Address, H256, U256};
use serde::{Serialize, Serializer};

use crate::{
    opcode::Kind,
    state_db::{AccessListItem, ArchiveState, BalanceChangeReason, BulkLoad, Log, StateDb},
};

/// Latency of one kind of call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OpStats {
    pub count: u64,
    #[serde(rename = "total_ns", serialize_with = "nanos")]
    pub total: Duration,
    #[serde(rename = "min_ns", serialize_with = "nanos")]
    pub min: Duration,
    #[serde(rename = "max_ns", serialize_with = "nanos")]
    pub max: Duration,
}

impl OpStats {
    fn new(elapsed: Duration) -> Self {
        Self {
            count: 1,
            total: elapsed,
            min: elapsed,
            max: elapsed,
        }
    }

    fn add(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total += elapsed;
        self.min = self.min.min(elapsed);
        self.max = self.max.max(elapsed);
    }

    pub fn mean(&self) -> Duration {
        match u32::try_from(self.count) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total / n,
            Err(_) => Duration::from_nanos((self.total.as_nanos() / u128::from(self.count)) as u64),
        }
    }
}

fn nanos<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
}

/// Per-kind call latencies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Profile {
    kinds: BTreeMap<Kind, OpStats>,
}

impl Profile {
    pub fn record(&mut self, kind: Kind, elapsed: Duration) {
        self.kinds
            .entry(kind)
            .and_modify(|it| it.add(elapsed))
            .or_insert_with(|| OpStats::new(elapsed));
    }

    pub fn get(&self, kind: Kind) -> Option<&OpStats> {
        self.kinds.get(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Kind, &OpStats)> {
        self.kinds.iter().map(|(kind, stats)| (*kind, stats))
    }

    /// Calls of every kind.
    pub fn calls(&self) -> u64 {
        self.kinds.values().map(|it| it.count).sum()
    }

    pub fn merge(&mut self, other: &Profile) {
        for (kind, theirs) in &other.kinds {
            self.kinds
                .entry(*kind)
                .and_modify(|ours| {
                    ours.count += theirs.count;
                    ours.total += theirs.total;
                    ours.min = ours.min.min(theirs.min);
                    ours.max = ours.max.max(theirs.max);
                })
                .or_insert(*theirs);
        }
    }
}

/// A proxy that times every call to `S`.
#[derive(Debug)]
pub struct ProfilingStateDb<S> {
    inner: S,
    profile: Profile,
}

impl<S: StateDb> ProfilingStateDb<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            profile: Profile::default(),
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_parts(self) -> (S, Profile) {
        (self.inner, self.profile)
    }

    fn timed<'a, T>(&'a mut self, kind: Kind, call: impl FnOnce(&'a mut S) -> T) -> T {
        let start = Instant::now();
        let out = call(&mut self.inner);
        self.profile.record(kind, start.elapsed());
        out
    }
}

impl<S: StateDb> StateDb for ProfilingStateDb<S> {
    fn create_account(&mut self, address: Address) {
        self.timed(Kind::CreateAccount, |db| db.create_account(address))
    }
    fn exist(&mut self, address: Address) -> bool {
        self.timed(Kind::Exist, |db| db.exist(address))
    }
    fn empty(&mut self, address: Address) -> bool {
        self.timed(Kind::Empty, |db| db.empty(address))
    }
    fn self_destruct(&mut self, address: Address) {
        self.timed(Kind::SelfDestruct, |db| db.self_destruct(address))
    }
    fn has_self_destructed(&mut self, address: Address) -> bool {
        self.timed(Kind::HasSelfDestructed, |db| db.has_self_destructed(address))
    }
    fn get_balance(&mut self, address: Address) -> U256 {
        self.timed(Kind::GetBalance, |db| db.get_balance(address))
    }
    fn add_balance(&mut self, address: Address, amount: U256, reason: BalanceChangeReason) {
        self.timed(Kind::AddBalance, |db| db.add_balance(address, amount, reason))
    }
    fn sub_balance(&mut self, address: Address, amount: U256, reason: BalanceChangeReason) {
        self.timed(Kind::SubBalance, |db| db.sub_balance(address, amount, reason))
    }
    fn get_nonce(&mut self, address: Address) -> u64 {
        self.timed(Kind::GetNonce, |db| db.get_nonce(address))
    }
    fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.timed(Kind::SetNonce, |db| db.set_nonce(address, nonce))
    }
    fn get_committed_state(&mut self, address: Address, key: H256) -> H256 {
        self.timed(Kind::GetCommittedState, |db| {
            db.get_committed_state(address, key)
        })
    }
    fn get_state(&mut self, address: Address, key: H256) -> H256 {
        self.timed(Kind::GetState, |db| db.get_state(address, key))
    }
    fn set_state(&mut self, address: Address, key: H256, value: H256) {
        self.timed(Kind::SetState, |db| db.set_state(address, key, value))
    }
    fn get_storage_root(&mut self, address: Address) -> H256 {
        self.timed(Kind::GetStorageRoot, |db| db.get_storage_root(address))
    }
    fn get_transient_state(&mut self, address: Address, key: H256) -> H256 {
        self.timed(Kind::GetTransientState, |db| {
            db.get_transient_state(address, key)
        })
    }
    fn set_transient_state(&mut self, address: Address, key: H256, value: H256) {
        self.timed(Kind::SetTransientState, |db| {
            db.set_transient_state(address, key, value)
        })
    }
    fn get_code(&mut self, address: Address) -> Vec<u8> {
        self.timed(Kind::GetCode, |db| db.get_code(address))
    }
    fn get_code_size(&mut self, address: Address) -> usize {
        self.timed(Kind::GetCodeSize, |db| db.get_code_size(address))
    }
    fn get_code_hash(&mut self, address: Address) -> H256 {
        self.timed(Kind::GetCodeHash, |db| db.get_code_hash(address))
    }
    fn set_code(&mut self, address: Address, code: &[u8]) {
        self.timed(Kind::SetCode, |db| db.set_code(address, code))
    }
    fn snapshot(&mut self) -> i32 {
        self.timed(Kind::Snapshot, |db| db.snapshot())
    }
    fn revert_to_snapshot(&mut self, id: i32) {
        self.timed(Kind::RevertToSnapshot, |db| db.revert_to_snapshot(id))
    }
    fn add_refund(&mut self, gas: u64) {
        self.timed(Kind::AddRefund, |db| db.add_refund(gas))
    }
    fn sub_refund(&mut self, gas: u64) {
        self.timed(Kind::SubRefund, |db| db.sub_refund(gas))
    }
    fn get_refund(&mut self) -> u64 {
        self.timed(Kind::GetRefund, |db| db.get_refund())
    }
    fn prepare_access_list(
        &mut self,
        sender: Address,
        destination: Option<Address>,
        precompiles: &[Address],
        access_list: &[AccessListItem],
    ) {
        self.timed(Kind::PrepareAccessList, |db| {
            db.prepare_access_list(sender, destination, precompiles, access_list)
        })
    }
    fn add_address_to_access_list(&mut self, address: Address) {
        self.timed(Kind::AddAddressToAccessList, |db| {
            db.add_address_to_access_list(address)
        })
    }
    fn address_in_access_list(&mut self, address: Address) -> bool {
        self.timed(Kind::AddressInAccessList, |db| {
            db.address_in_access_list(address)
        })
    }
    fn add_slot_to_access_list(&mut self, address: Address, key: H256) {
        self.timed(Kind::AddSlotToAccessList, |db| {
            db.add_slot_to_access_list(address, key)
        })
    }
    fn slot_in_access_list(&mut self, address: Address, key: H256) -> (bool, bool) {
        self.timed(Kind::SlotInAccessList, |db| {
            db.slot_in_access_list(address, key)
        })
    }
    fn set_tx_context(&mut self, tx_hash: H256, index: u32) {
        self.timed(Kind::SetTxContext, |db| db.set_tx_context(tx_hash, index))
    }
    fn add_log(&mut self, log: Log) {
        self.timed(Kind::AddLog, |db| db.add_log(log))
    }
    fn get_logs(&mut self, tx_hash: H256, block: u64, block_hash: H256) -> Vec<Log> {
        self.timed(Kind::GetLogs, |db| db.get_logs(tx_hash, block, block_hash))
    }
    fn add_preimage(&mut self, hash: H256, preimage: &[u8]) {
        self.timed(Kind::AddPreimage, |db| db.add_preimage(hash, preimage))
    }
    fn begin_sync_period(&mut self, number: u64) -> anyhow::Result<()> {
        self.timed(Kind::BeginSyncPeriod, |db| db.begin_sync_period(number))
    }
    fn end_sync_period(&mut self) -> anyhow::Result<()> {
        self.timed(Kind::EndSyncPeriod, |db| db.end_sync_period())
    }
    fn begin_block(&mut self, number: u64) -> anyhow::Result<()> {
        self.timed(Kind::BeginBlock, |db| db.begin_block(number))
    }
    fn end_block(&mut self) -> anyhow::Result<()> {
        self.timed(Kind::EndBlock, |db| db.end_block())
    }
    fn begin_transaction(&mut self, number: u32) -> anyhow::Result<()> {
        self.timed(Kind::BeginTransaction, |db| db.begin_transaction(number))
    }
    fn end_transaction(&mut self) -> anyhow::Result<()> {
        self.timed(Kind::EndTransaction, |db| db.end_transaction())
    }
    fn finalise(&mut self, delete_empty: bool) {
        self.timed(Kind::Finalise, |db| db.finalise(delete_empty))
    }
    fn intermediate_root(&mut self, delete_empty: bool) -> H256 {
        self.timed(Kind::IntermediateRoot, |db| {
            db.intermediate_root(delete_empty)
        })
    }
    fn commit(&mut self, block: u64, delete_empty: bool) -> anyhow::Result<H256> {
        self.timed(Kind::Commit, |db| db.commit(block, delete_empty))
    }
    fn get_hash(&mut self) -> anyhow::Result<H256> {
        self.timed(Kind::GetHash, |db| db.get_hash())
    }
    fn start_bulk_load(&mut self, block: u64) -> anyhow::Result<Box<dyn BulkLoad + '_>> {
        self.timed(Kind::StartBulkLoad, |db| db.start_bulk_load(block))
    }
    fn get_archive_state(&mut self, block: u64) -> anyhow::Result<Box<dyn ArchiveState>> {
        self.timed(Kind::GetArchiveState, |db| db.get_archive_state(block))
    }
    fn get_archive_block_height(&mut self) -> anyhow::Result<Option<u64>> {
        self.timed(Kind::GetArchiveBlockHeight, |db| {
            db.get_archive_block_height()
        })
    }
    fn error(&self) -> Option<anyhow::Error> {
        self.inner.error()
    }
    fn close(&mut self) -> anyhow::Result<()> {
        self.timed(Kind::Close, |db| db.close())
    }
}
