//! The capability interface every engine and every proxy implements.
//!
//! Calls are stateful and non-commutative, so the interface takes `&mut self`
//! even for reads: a proxy may need to record, time or compare a read.
//!
//! Accessors and mutators never fail. Only calls that move an engine through
//! its lifecycle (sync periods, blocks, transactions), or that commit, hash,
//! bulk-load, open archives or close, return an error.

use ethereum_types::{Address, H256, U256};

/// An event emitted by a contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Log {
    /// The emitting contract.
    pub address: Address,
    /// Indexed topics, at most four in practice.
    pub topics: Vec<H256>,
    /// Unindexed payload.
    pub data: Vec<u8>,
}

/// One entry of an [EIP-2930](https://eips.ethereum.org/EIPS/eip-2930) access list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AccessListItem {
    /// Warmed account.
    pub address: Address,
    /// Warmed storage keys of that account.
    pub storage_keys: Vec<H256>,
}

/// Why a balance changed.
///
/// This is a closed enumeration owned by this crate, so that recorded traces
/// do not depend on the numbering of any particular engine's reason codes.
/// The discriminants are part of the wire format and must never change.
#[repr(u8)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    strum::FromRepr,
    strum::EnumIter,
    strum::Display,
)]
pub enum BalanceChangeReason {
    #[default]
    Unspecified = 0,
    RewardMineUncle = 1,
    RewardMineBlock = 2,
    Withdrawal = 3,
    GenesisBalance = 4,
    RewardTransactionFee = 5,
    TouchAccount = 6,
    SelfDestruct = 7,
    SelfDestructBurn = 8,
    Transfer = 9,
    GasBuy = 10,
    GasReturn = 11,
    DaoContract = 12,
    DaoAccount = 13,
    BlobGas = 14,
}

/// A world-state database, as seen by an EVM executing blocks.
///
/// Engines move through a strictly nested lifecycle:
/// idle → sync period → block → transaction, and back out in reverse order.
pub trait StateDb {
    /// Create an account at `address`, keeping any balance already there.
    fn create_account(&mut self, address: Address);
    fn exist(&mut self, address: Address) -> bool;
    /// [EIP-161](https://eips.ethereum.org/EIPS/eip-161) emptiness: zero
    /// nonce, zero balance and no code.
    fn empty(&mut self, address: Address) -> bool;
    fn self_destruct(&mut self, address: Address);
    fn has_self_destructed(&mut self, address: Address) -> bool;

    fn get_balance(&mut self, address: Address) -> U256;
    fn add_balance(&mut self, address: Address, amount: U256, reason: BalanceChangeReason);
    fn sub_balance(&mut self, address: Address, amount: U256, reason: BalanceChangeReason);
    fn get_nonce(&mut self, address: Address) -> u64;
    fn set_nonce(&mut self, address: Address, nonce: u64);

    /// The value of `key` as of the start of the current transaction.
    fn get_committed_state(&mut self, address: Address, key: H256) -> H256;
    fn get_state(&mut self, address: Address, key: H256) -> H256;
    fn set_state(&mut self, address: Address, key: H256, value: H256);
    fn get_storage_root(&mut self, address: Address) -> H256;
    /// [EIP-1153](https://eips.ethereum.org/EIPS/eip-1153) storage, discarded
    /// at the end of every transaction.
    fn get_transient_state(&mut self, address: Address, key: H256) -> H256;
    fn set_transient_state(&mut self, address: Address, key: H256, value: H256);

    fn get_code(&mut self, address: Address) -> Vec<u8>;
    fn get_code_size(&mut self, address: Address) -> usize;
    fn get_code_hash(&mut self, address: Address) -> H256;
    fn set_code(&mut self, address: Address, code: &[u8]);

    /// Take a checkpoint of the transaction-scoped state.
    ///
    /// The returned identifier is engine-specific: callers must not assume
    /// anything about its numbering.
    fn snapshot(&mut self) -> i32;
    fn revert_to_snapshot(&mut self, id: i32);

    fn add_refund(&mut self, gas: u64);
    fn sub_refund(&mut self, gas: u64);
    fn get_refund(&mut self) -> u64;

    /// Reset and pre-warm the access list at the start of a transaction.
    fn prepare_access_list(
        &mut self,
        sender: Address,
        destination: Option<Address>,
        precompiles: &[Address],
        access_list: &[AccessListItem],
    );
    fn add_address_to_access_list(&mut self, address: Address);
    fn address_in_access_list(&mut self, address: Address) -> bool;
    fn add_slot_to_access_list(&mut self, address: Address, key: H256);
    /// Returns whether the address, and the slot, are warm.
    fn slot_in_access_list(&mut self, address: Address, key: H256) -> (bool, bool);

    /// Set the hash and index of the transaction subsequent logs belong to.
    fn set_tx_context(&mut self, tx_hash: H256, index: u32);
    fn add_log(&mut self, log: Log);
    fn get_logs(&mut self, tx_hash: H256, block: u64, block_hash: H256) -> Vec<Log>;
    fn add_preimage(&mut self, hash: H256, preimage: &[u8]);

    fn begin_sync_period(&mut self, number: u64) -> anyhow::Result<()>;
    fn end_sync_period(&mut self) -> anyhow::Result<()>;
    fn begin_block(&mut self, number: u64) -> anyhow::Result<()>;
    fn end_block(&mut self) -> anyhow::Result<()>;
    fn begin_transaction(&mut self, number: u32) -> anyhow::Result<()>;
    fn end_transaction(&mut self) -> anyhow::Result<()>;

    fn finalise(&mut self, delete_empty: bool);
    fn intermediate_root(&mut self, delete_empty: bool) -> H256;
    fn commit(&mut self, block: u64, delete_empty: bool) -> anyhow::Result<H256>;
    /// The state root. May be expensive.
    fn get_hash(&mut self) -> anyhow::Result<H256>;

    /// Bypass the transactional interface to load state in bulk, e.g. at
    /// genesis. The loader borrows the engine until it is closed.
    fn start_bulk_load(&mut self, block: u64) -> anyhow::Result<Box<dyn BulkLoad + '_>>;
    /// A read-only view of the state as of the end of `block`.
    fn get_archive_state(&mut self, block: u64) -> anyhow::Result<Box<dyn ArchiveState>>;
    /// The newest block with archived state, if any.
    fn get_archive_block_height(&mut self) -> anyhow::Result<Option<u64>>;

    /// Any error the engine has latched so far.
    fn error(&self) -> Option<anyhow::Error>;
    fn close(&mut self) -> anyhow::Result<()>;
}

/// A write-only loader returned by [`StateDb::start_bulk_load`].
pub trait BulkLoad {
    fn create_account(&mut self, address: Address);
    fn set_balance(&mut self, address: Address, balance: U256);
    fn set_nonce(&mut self, address: Address, nonce: u64);
    fn set_state(&mut self, address: Address, key: H256, value: H256);
    fn set_code(&mut self, address: Address, code: &[u8]);
    /// Make the loaded state visible.
    fn close(&mut self) -> anyhow::Result<()>;
}

/// A read-only historic view returned by [`StateDb::get_archive_state`].
pub trait ArchiveState {
    fn exist(&mut self, address: Address) -> bool;
    fn get_balance(&mut self, address: Address) -> U256;
    fn get_nonce(&mut self, address: Address) -> u64;
    fn get_state(&mut self, address: Address, key: H256) -> H256;
    fn get_code(&mut self, address: Address) -> Vec<u8>;
    fn get_code_hash(&mut self, address: Address) -> H256;
    fn get_storage_root(&mut self, address: Address) -> H256;
    fn get_hash(&mut self) -> anyhow::Result<H256>;
    fn release(&mut self) -> anyhow::Result<()>;
}

// Pointers to engines are engines.
macro_rules! forward {
    ($($ptr:ty),*) => {$(
        impl<T: StateDb + ?Sized> StateDb for $ptr {
            fn create_account(&mut self, address: Address) {
                (**self).create_account(address)
            }
            fn exist(&mut self, address: Address) -> bool {
                (**self).exist(address)
            }
            fn empty(&mut self, address: Address) -> bool {
                (**self).empty(address)
            }
            fn self_destruct(&mut self, address: Address) {
                (**self).self_destruct(address)
            }
            fn has_self_destructed(&mut self, address: Address) -> bool {
                (**self).has_self_destructed(address)
            }
            fn get_balance(&mut self, address: Address) -> U256 {
                (**self).get_balance(address)
            }
            fn add_balance(&mut self, address: Address, amount: U256, reason: BalanceChangeReason) {
                (**self).add_balance(address, amount, reason)
            }
            fn sub_balance(&mut self, address: Address, amount: U256, reason: BalanceChangeReason) {
                (**self).sub_balance(address, amount, reason)
            }
            fn get_nonce(&mut self, address: Address) -> u64 {
                (**self).get_nonce(address)
            }
            fn set_nonce(&mut self, address: Address, nonce: u64) {
                (**self).set_nonce(address, nonce)
            }
            fn get_committed_state(&mut self, address: Address, key: H256) -> H256 {
                (**self).get_committed_state(address, key)
            }
            fn get_state(&mut self, address: Address, key: H256) -> H256 {
                (**self).get_state(address, key)
            }
            fn set_state(&mut self, address: Address, key: H256, value: H256) {
                (**self).set_state(address, key, value)
            }
            fn get_storage_root(&mut self, address: Address) -> H256 {
                (**self).get_storage_root(address)
            }
            fn get_transient_state(&mut self, address: Address, key: H256) -> H256 {
                (**self).get_transient_state(address, key)
            }
            fn set_transient_state(&mut self, address: Address, key: H256, value: H256) {
                (**self).set_transient_state(address, key, value)
            }
            fn get_code(&mut self, address: Address) -> Vec<u8> {
                (**self).get_code(address)
            }
            fn get_code_size(&mut self, address: Address) -> usize {
                (**self).get_code_size(address)
            }
            fn get_code_hash(&mut self, address: Address) -> H256 {
                (**self).get_code_hash(address)
            }
            fn set_code(&mut self, address: Address, code: &[u8]) {
                (**self).set_code(address, code)
            }
            fn snapshot(&mut self) -> i32 {
                (**self).snapshot()
            }
            fn revert_to_snapshot(&mut self, id: i32) {
                (**self).revert_to_snapshot(id)
            }
            fn add_refund(&mut self, gas: u64) {
                (**self).add_refund(gas)
            }
            fn sub_refund(&mut self, gas: u64) {
                (**self).sub_refund(gas)
            }
            fn get_refund(&mut self) -> u64 {
                (**self).get_refund()
            }
            fn prepare_access_list(
                &mut self,
                sender: Address,
                destination: Option<Address>,
                precompiles: &[Address],
                access_list: &[AccessListItem],
            ) {
                (**self).prepare_access_list(sender, destination, precompiles, access_list)
            }
            fn add_address_to_access_list(&mut self, address: Address) {
                (**self).add_address_to_access_list(address)
            }
            fn address_in_access_list(&mut self, address: Address) -> bool {
                (**self).address_in_access_list(address)
            }
            fn add_slot_to_access_list(&mut self, address: Address, key: H256) {
                (**self).add_slot_to_access_list(address, key)
            }
            fn slot_in_access_list(&mut self, address: Address, key: H256) -> (bool, bool) {
                (**self).slot_in_access_list(address, key)
            }
            fn set_tx_context(&mut self, tx_hash: H256, index: u32) {
                (**self).set_tx_context(tx_hash, index)
            }
            fn add_log(&mut self, log: Log) {
                (**self).add_log(log)
            }
            fn get_logs(&mut self, tx_hash: H256, block: u64, block_hash: H256) -> Vec<Log> {
                (**self).get_logs(tx_hash, block, block_hash)
            }
            fn add_preimage(&mut self, hash: H256, preimage: &[u8]) {
                (**self).add_preimage(hash, preimage)
            }
            fn begin_sync_period(&mut self, number: u64) -> anyhow::Result<()> {
                (**self).begin_sync_period(number)
            }
            fn end_sync_period(&mut self) -> anyhow::Result<()> {
                (**self).end_sync_period()
            }
            fn begin_block(&mut self, number: u64) -> anyhow::Result<()> {
                (**self).begin_block(number)
            }
            fn end_block(&mut self) -> anyhow::Result<()> {
                (**self).end_block()
            }
            fn begin_transaction(&mut self, number: u32) -> anyhow::Result<()> {
                (**self).begin_transaction(number)
            }
            fn end_transaction(&mut self) -> anyhow::Result<()> {
                (**self).end_transaction()
            }
            fn finalise(&mut self, delete_empty: bool) {
                (**self).finalise(delete_empty)
            }
            fn intermediate_root(&mut self, delete_empty: bool) -> H256 {
                (**self).intermediate_root(delete_empty)
            }
            fn commit(&mut self, block: u64, delete_empty: bool) -> anyhow::Result<H256> {
                (**self).commit(block, delete_empty)
            }
            fn get_hash(&mut self) -> anyhow::Result<H256> {
                (**self).get_hash()
            }
            fn start_bulk_load(&mut self, block: u64) -> anyhow::Result<Box<dyn BulkLoad + '_>> {
                (**self).start_bulk_load(block)
            }
            fn get_archive_state(&mut self, block: u64) -> anyhow::Result<Box<dyn ArchiveState>> {
                (**self).get_archive_state(block)
            }
            fn get_archive_block_height(&mut self) -> anyhow::Result<Option<u64>> {
                (**self).get_archive_block_height()
            }
            fn error(&self) -> Option<anyhow::Error> {
                (**self).error()
            }
            fn close(&mut self) -> anyhow::Result<()> {
                (**self).close()
            }
        }
    )*};
}

forward!(&mut T, Box<T>);

#[test]
fn reason_codes_are_stable() {
    use strum::IntoEnumIterator as _;
    for (ix, reason) in BalanceChangeReason::iter().enumerate() {
        assert_eq!(reason as u8 as usize, ix);
        assert_eq!(BalanceChangeReason::from_repr(reason as u8), Some(reason));
    }
    assert_eq!(BalanceChangeReason::from_repr(15), None);
}
