//! Differential testing of two engines.
//!
//! [`ShadowStateDb`] issues every call to a primary engine and then to a
//! shadow engine, compares what they return, and hands the primary's answer
//! back. Divergences are recorded as [`Mismatch`]es and never abort the run.

use std::{fmt, sync::Arc};

use anyhow::anyhow;
use ethereum_types::{Address, H256, U256};
use itertools::Itertools as _;
use log::warn;
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    opcode::Kind,
    state_db::{AccessListItem, ArchiveState, BalanceChangeReason, BulkLoad, Log, StateDb},
};

/// One call on which the engines disagreed. Values are [`fmt::Debug`]
/// renderings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub kind: Kind,
    pub args: String,
    pub primary: String,
    pub shadow: String,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            kind,
            args,
            primary,
            shadow,
        } = self;
        write!(f, "{kind}({args}): primary {primary}, shadow {shadow}")
    }
}

/// Mismatches seen by a [`ShadowStateDb`] and the archives derived from it.
#[derive(Debug, Clone, Default)]
pub struct Mismatches(Arc<Mutex<Vec<Mismatch>>>);

impl Mismatches {
    pub fn push(&self, mismatch: Mismatch) {
        warn!("shadow mismatch: {mismatch}");
        self.0.lock().push(mismatch)
    }

    pub fn to_vec(&self) -> Vec<Mismatch> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    fn check<T: PartialEq + fmt::Debug>(
        &self,
        kind: Kind,
        args: &dyn fmt::Debug,
        primary: &T,
        shadow: &T,
    ) {
        if primary != shadow {
            self.push(Mismatch {
                kind,
                args: format!("{args:?}"),
                primary: format!("{primary:?}"),
                shadow: format!("{shadow:?}"),
            })
        }
    }

    fn check_bytes(&self, kind: Kind, args: &dyn fmt::Debug, primary: &[u8], shadow: &[u8]) {
        let render = |it: &[u8]| match primary.len() == shadow.len() {
            true => format!("0x{}", hex::encode(it)),
            false => format!("{} bytes", it.len()),
        };
        if primary != shadow {
            self.push(Mismatch {
                kind,
                args: format!("{args:?}"),
                primary: render(primary),
                shadow: render(shadow),
            })
        }
    }

    fn check_logs(&self, kind: Kind, args: &dyn fmt::Debug, primary: &[Log], shadow: &[Log]) {
        if primary.len() != shadow.len() {
            return self.push(Mismatch {
                kind,
                args: format!("{args:?}"),
                primary: format!("{} logs", primary.len()),
                shadow: format!("{} logs", shadow.len()),
            });
        }
        if let Some((ix, (ours, theirs))) = primary
            .iter()
            .zip(shadow)
            .find_position(|(ours, theirs)| ours != theirs)
        {
            self.push(Mismatch {
                kind,
                args: format!("{args:?}"),
                primary: format!("log {ix}: {ours:?}"),
                shadow: format!("log {ix}: {theirs:?}"),
            })
        }
    }

    /// A call that failed on the shadow only.
    fn shadow_failed(&self, kind: Kind, args: &dyn fmt::Debug, error: &anyhow::Error) {
        self.push(Mismatch {
            kind,
            args: format!("{args:?}"),
            primary: "ok".into(),
            shadow: format!("error: {error:#}"),
        })
    }
}

/// Runs a `P`rimary and a `S`hadow engine in lockstep.
///
/// Fallible calls go to the primary first. If it fails, its error is returned
/// and the shadow is not called. Otherwise the shadow's error, if any, is
/// returned. [`StateDb::commit`] and [`StateDb::close`] always reach both
/// engines, and only the primary's outcome is returned.
#[derive(Debug)]
pub struct ShadowStateDb<P, S> {
    primary: P,
    shadow: S,
    /// `(primary, shadow)` snapshot identifiers, oldest first.
    snapshots: Vec<(i32, i32)>,
    compare_state_hash: bool,
    mismatches: Mismatches,
}

impl<P: StateDb, S: StateDb> ShadowStateDb<P, S> {
    pub fn new(primary: P, shadow: S) -> Self {
        Self {
            primary,
            shadow,
            snapshots: Vec::new(),
            compare_state_hash: false,
            mismatches: Mismatches::default(),
        }
    }

    /// Also compare state and storage roots.
    ///
    /// Engines may compute these lazily, and they only agree at well-defined
    /// points, so this is off by default.
    pub fn compare_state_hash(mut self, compare: bool) -> Self {
        self.compare_state_hash = compare;
        self
    }

    pub fn mismatches(&self) -> Vec<Mismatch> {
        self.mismatches.to_vec()
    }

    /// A handle that keeps observing mismatches after `self` is moved or
    /// wrapped.
    pub fn mismatch_log(&self) -> Mismatches {
        self.mismatches.clone()
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    pub fn shadow(&self) -> &S {
        &self.shadow
    }

    pub fn into_parts(self) -> (P, S) {
        (self.primary, self.shadow)
    }

    fn both<T: PartialEq + fmt::Debug>(
        &mut self,
        kind: Kind,
        args: &dyn fmt::Debug,
        primary: impl FnOnce(&mut P) -> T,
        shadow: impl FnOnce(&mut S) -> T,
    ) -> T {
        let ours = primary(&mut self.primary);
        let theirs = shadow(&mut self.shadow);
        self.mismatches.check(kind, args, &ours, &theirs);
        ours
    }

    fn each(&mut self, primary: impl FnOnce(&mut P), shadow: impl FnOnce(&mut S)) {
        primary(&mut self.primary);
        shadow(&mut self.shadow);
    }

    fn fallible(
        &mut self,
        primary: impl FnOnce(&mut P) -> anyhow::Result<()>,
        shadow: impl FnOnce(&mut S) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        primary(&mut self.primary)?;
        shadow(&mut self.shadow)
    }

    fn hash(
        &mut self,
        kind: Kind,
        args: &dyn fmt::Debug,
        primary: impl FnOnce(&mut P) -> H256,
        shadow: impl FnOnce(&mut S) -> H256,
    ) -> H256 {
        match self.compare_state_hash {
            true => self.both(kind, args, primary, shadow),
            false => primary(&mut self.primary),
        }
    }
}

impl<P: StateDb, S: StateDb> StateDb for ShadowStateDb<P, S> {
    fn create_account(&mut self, address: Address) {
        self.each(|p| p.create_account(address), |s| s.create_account(address))
    }
    fn exist(&mut self, address: Address) -> bool {
        self.both(
            Kind::Exist,
            &address,
            |p| p.exist(address),
            |s| s.exist(address),
        )
    }
    fn empty(&mut self, address: Address) -> bool {
        self.both(
            Kind::Empty,
            &address,
            |p| p.empty(address),
            |s| s.empty(address),
        )
    }
    fn self_destruct(&mut self, address: Address) {
        self.each(|p| p.self_destruct(address), |s| s.self_destruct(address))
    }
    fn has_self_destructed(&mut self, address: Address) -> bool {
        self.both(
            Kind::HasSelfDestructed,
            &address,
            |p| p.has_self_destructed(address),
            |s| s.has_self_destructed(address),
        )
    }

    fn get_balance(&mut self, address: Address) -> U256 {
        self.both(
            Kind::GetBalance,
            &address,
            |p| p.get_balance(address),
            |s| s.get_balance(address),
        )
    }
    fn add_balance(&mut self, address: Address, amount: U256, reason: BalanceChangeReason) {
        self.each(
            |p| p.add_balance(address, amount, reason),
            |s| s.add_balance(address, amount, reason),
        )
    }
    fn sub_balance(&mut self, address: Address, amount: U256, reason: BalanceChangeReason) {
        self.each(
            |p| p.sub_balance(address, amount, reason),
            |s| s.sub_balance(address, amount, reason),
        )
    }
    fn get_nonce(&mut self, address: Address) -> u64 {
        self.both(
            Kind::GetNonce,
            &address,
            |p| p.get_nonce(address),
            |s| s.get_nonce(address),
        )
    }
    fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.each(
            |p| p.set_nonce(address, nonce),
            |s| s.set_nonce(address, nonce),
        )
    }

    fn get_committed_state(&mut self, address: Address, key: H256) -> H256 {
        self.both(
            Kind::GetCommittedState,
            &(address, key),
            |p| p.get_committed_state(address, key),
            |s| s.get_committed_state(address, key),
        )
    }
    fn get_state(&mut self, address: Address, key: H256) -> H256 {
        self.both(
            Kind::GetState,
            &(address, key),
            |p| p.get_state(address, key),
            |s| s.get_state(address, key),
        )
    }
    fn set_state(&mut self, address: Address, key: H256, value: H256) {
        self.each(
            |p| p.set_state(address, key, value),
            |s| s.set_state(address, key, value),
        )
    }
    fn get_storage_root(&mut self, address: Address) -> H256 {
        self.hash(
            Kind::GetStorageRoot,
            &address,
            |p| p.get_storage_root(address),
            |s| s.get_storage_root(address),
        )
    }
    fn get_transient_state(&mut self, address: Address, key: H256) -> H256 {
        self.both(
            Kind::GetTransientState,
            &(address, key),
            |p| p.get_transient_state(address, key),
            |s| s.get_transient_state(address, key),
        )
    }
    fn set_transient_state(&mut self, address: Address, key: H256, value: H256) {
        self.each(
            |p| p.set_transient_state(address, key, value),
            |s| s.set_transient_state(address, key, value),
        )
    }

    fn get_code(&mut self, address: Address) -> Vec<u8> {
        let ours = self.primary.get_code(address);
        let theirs = self.shadow.get_code(address);
        self.mismatches
            .check_bytes(Kind::GetCode, &address, &ours, &theirs);
        ours
    }
    fn get_code_size(&mut self, address: Address) -> usize {
        self.both(
            Kind::GetCodeSize,
            &address,
            |p| p.get_code_size(address),
            |s| s.get_code_size(address),
        )
    }
    fn get_code_hash(&mut self, address: Address) -> H256 {
        self.both(
            Kind::GetCodeHash,
            &address,
            |p| p.get_code_hash(address),
            |s| s.get_code_hash(address),
        )
    }
    fn set_code(&mut self, address: Address, code: &[u8]) {
        self.each(|p| p.set_code(address, code), |s| s.set_code(address, code))
    }

    fn snapshot(&mut self) -> i32 {
        let ours = self.primary.snapshot();
        let theirs = self.shadow.snapshot();
        self.snapshots.push((ours, theirs));
        ours
    }
    fn revert_to_snapshot(&mut self, id: i32) {
        match self.snapshots.iter().rposition(|(ours, _)| *ours == id) {
            Some(ix) => {
                let (ours, theirs) = self.snapshots[ix];
                self.primary.revert_to_snapshot(ours);
                self.shadow.revert_to_snapshot(theirs);
                self.snapshots.truncate(ix + 1);
            }
            None => self.mismatches.push(Mismatch {
                kind: Kind::RevertToSnapshot,
                args: id.to_string(),
                primary: "unknown snapshot".into(),
                shadow: "not reverted".into(),
            }),
        }
    }

    fn add_refund(&mut self, gas: u64) {
        self.each(|p| p.add_refund(gas), |s| s.add_refund(gas))
    }
    fn sub_refund(&mut self, gas: u64) {
        self.each(|p| p.sub_refund(gas), |s| s.sub_refund(gas))
    }
    fn get_refund(&mut self) -> u64 {
        self.both(Kind::GetRefund, &(), |p| p.get_refund(), |s| s.get_refund())
    }

    fn prepare_access_list(
        &mut self,
        sender: Address,
        destination: Option<Address>,
        precompiles: &[Address],
        access_list: &[AccessListItem],
    ) {
        self.each(
            |p| p.prepare_access_list(sender, destination, precompiles, access_list),
            |s| s.prepare_access_list(sender, destination, precompiles, access_list),
        )
    }
    fn add_address_to_access_list(&mut self, address: Address) {
        self.each(
            |p| p.add_address_to_access_list(address),
            |s| s.add_address_to_access_list(address),
        )
    }
    fn address_in_access_list(&mut self, address: Address) -> bool {
        self.both(
            Kind::AddressInAccessList,
            &address,
            |p| p.address_in_access_list(address),
            |s| s.address_in_access_list(address),
        )
    }
    fn add_slot_to_access_list(&mut self, address: Address, key: H256) {
        self.each(
            |p| p.add_slot_to_access_list(address, key),
            |s| s.add_slot_to_access_list(address, key),
        )
    }
    fn slot_in_access_list(&mut self, address: Address, key: H256) -> (bool, bool) {
        self.both(
            Kind::SlotInAccessList,
            &(address, key),
            |p| p.slot_in_access_list(address, key),
            |s| s.slot_in_access_list(address, key),
        )
    }

    fn set_tx_context(&mut self, tx_hash: H256, index: u32) {
        self.each(
            |p| p.set_tx_context(tx_hash, index),
            |s| s.set_tx_context(tx_hash, index),
        )
    }
    fn add_log(&mut self, log: Log) {
        self.primary.add_log(log.clone());
        self.shadow.add_log(log)
    }
    fn get_logs(&mut self, tx_hash: H256, block: u64, block_hash: H256) -> Vec<Log> {
        let ours = self.primary.get_logs(tx_hash, block, block_hash);
        let theirs = self.shadow.get_logs(tx_hash, block, block_hash);
        self.mismatches.check_logs(
            Kind::GetLogs,
            &(tx_hash, block, block_hash),
            &ours,
            &theirs,
        );
        ours
    }
    fn add_preimage(&mut self, hash: H256, preimage: &[u8]) {
        self.each(
            |p| p.add_preimage(hash, preimage),
            |s| s.add_preimage(hash, preimage),
        )
    }

    fn begin_sync_period(&mut self, number: u64) -> anyhow::Result<()> {
        self.fallible(
            |p| p.begin_sync_period(number),
            |s| s.begin_sync_period(number),
        )
    }
    fn end_sync_period(&mut self) -> anyhow::Result<()> {
        self.fallible(|p| p.end_sync_period(), |s| s.end_sync_period())
    }
    fn begin_block(&mut self, number: u64) -> anyhow::Result<()> {
        self.fallible(|p| p.begin_block(number), |s| s.begin_block(number))
    }
    fn end_block(&mut self) -> anyhow::Result<()> {
        self.fallible(|p| p.end_block(), |s| s.end_block())
    }
    fn begin_transaction(&mut self, number: u32) -> anyhow::Result<()> {
        self.snapshots.clear();
        self.fallible(
            |p| p.begin_transaction(number),
            |s| s.begin_transaction(number),
        )
    }
    fn end_transaction(&mut self) -> anyhow::Result<()> {
        self.snapshots.clear();
        self.fallible(|p| p.end_transaction(), |s| s.end_transaction())
    }

    fn finalise(&mut self, delete_empty: bool) {
        self.each(
            |p| p.finalise(delete_empty),
            |s| s.finalise(delete_empty),
        )
    }
    fn intermediate_root(&mut self, delete_empty: bool) -> H256 {
        let ours = self.primary.intermediate_root(delete_empty);
        let theirs = self.shadow.intermediate_root(delete_empty);
        if self.compare_state_hash {
            self.mismatches
                .check(Kind::IntermediateRoot, &delete_empty, &ours, &theirs);
        }
        ours
    }
    fn commit(&mut self, block: u64, delete_empty: bool) -> anyhow::Result<H256> {
        let ours = self.primary.commit(block, delete_empty);
        let theirs = self.shadow.commit(block, delete_empty);
        match (&ours, theirs) {
            (Ok(ours), Ok(theirs)) if self.compare_state_hash => {
                self.mismatches
                    .check(Kind::Commit, &(block, delete_empty), ours, &theirs)
            }
            (Ok(_), Err(e)) => {
                self.mismatches
                    .shadow_failed(Kind::Commit, &(block, delete_empty), &e)
            }
            _ => {}
        }
        ours
    }
    fn get_hash(&mut self) -> anyhow::Result<H256> {
        if !self.compare_state_hash {
            return self.primary.get_hash();
        }
        let ours = self.primary.get_hash()?;
        let theirs = self.shadow.get_hash()?;
        self.mismatches.check(Kind::GetHash, &(), &ours, &theirs);
        Ok(ours)
    }

    fn start_bulk_load(&mut self, block: u64) -> anyhow::Result<Box<dyn BulkLoad + '_>> {
        let primary = self.primary.start_bulk_load(block)?;
        let shadow = self.shadow.start_bulk_load(block)?;
        Ok(Box::new(ShadowBulkLoad { primary, shadow }))
    }
    fn get_archive_state(&mut self, block: u64) -> anyhow::Result<Box<dyn ArchiveState>> {
        let primary = self.primary.get_archive_state(block)?;
        let shadow = self.shadow.get_archive_state(block)?;
        Ok(Box::new(ShadowArchive {
            primary,
            shadow,
            compare_state_hash: self.compare_state_hash,
            mismatches: self.mismatches.clone(),
        }))
    }
    fn get_archive_block_height(&mut self) -> anyhow::Result<Option<u64>> {
        let ours = self.primary.get_archive_block_height()?;
        let theirs = self.shadow.get_archive_block_height()?;
        self.mismatches
            .check(Kind::GetArchiveBlockHeight, &(), &ours, &theirs);
        Ok(ours)
    }

    /// Either engine's own error, and every mismatch so far.
    fn error(&self) -> Option<anyhow::Error> {
        let mut problems = vec![];
        if let Some(e) = self.primary.error() {
            problems.push(format!("primary: {e:#}"));
        }
        if let Some(e) = self.shadow.error() {
            problems.push(format!("shadow: {e:#}"));
        }
        let mismatches = self.mismatches.to_vec();
        if !mismatches.is_empty() {
            problems.push(format!(
                "{} mismatches: {}",
                mismatches.len(),
                mismatches.iter().join("; ")
            ));
        }
        match problems.is_empty() {
            true => None,
            false => Some(anyhow!(problems.join("; "))),
        }
    }

    fn close(&mut self) -> anyhow::Result<()> {
        let ours = self.primary.close();
        if let Err(e) = self.shadow.close() {
            if ours.is_ok() {
                self.mismatches.shadow_failed(Kind::Close, &(), &e);
            }
        }
        ours
    }
}

/// Loads the same state into both engines.
struct ShadowBulkLoad<'a> {
    primary: Box<dyn BulkLoad + 'a>,
    shadow: Box<dyn BulkLoad + 'a>,
}

impl BulkLoad for ShadowBulkLoad<'_> {
    fn create_account(&mut self, address: Address) {
        self.primary.create_account(address);
        self.shadow.create_account(address)
    }
    fn set_balance(&mut self, address: Address, balance: U256) {
        self.primary.set_balance(address, balance);
        self.shadow.set_balance(address, balance)
    }
    fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.primary.set_nonce(address, nonce);
        self.shadow.set_nonce(address, nonce)
    }
    fn set_state(&mut self, address: Address, key: H256, value: H256) {
        self.primary.set_state(address, key, value);
        self.shadow.set_state(address, key, value)
    }
    fn set_code(&mut self, address: Address, code: &[u8]) {
        self.primary.set_code(address, code);
        self.shadow.set_code(address, code)
    }
    fn close(&mut self) -> anyhow::Result<()> {
        self.primary.close()?;
        self.shadow.close()
    }
}

/// Compares reads of the same block on both engines.
struct ShadowArchive {
    primary: Box<dyn ArchiveState>,
    shadow: Box<dyn ArchiveState>,
    compare_state_hash: bool,
    mismatches: Mismatches,
}

impl ShadowArchive {
    fn both<T: PartialEq + fmt::Debug>(
        &mut self,
        kind: Kind,
        args: &dyn fmt::Debug,
        read: impl Fn(&mut (dyn ArchiveState + 'static)) -> T,
    ) -> T {
        let ours = read(&mut *self.primary);
        let theirs = read(&mut *self.shadow);
        self.mismatches.check(kind, args, &ours, &theirs);
        ours
    }
}

impl ArchiveState for ShadowArchive {
    fn exist(&mut self, address: Address) -> bool {
        self.both(Kind::Exist, &address, |db| db.exist(address))
    }
    fn get_balance(&mut self, address: Address) -> U256 {
        self.both(Kind::GetBalance, &address, |db| db.get_balance(address))
    }
    fn get_nonce(&mut self, address: Address) -> u64 {
        self.both(Kind::GetNonce, &address, |db| db.get_nonce(address))
    }
    fn get_state(&mut self, address: Address, key: H256) -> H256 {
        self.both(Kind::GetState, &(address, key), |db| {
            db.get_state(address, key)
        })
    }
    fn get_code(&mut self, address: Address) -> Vec<u8> {
        let ours = self.primary.get_code(address);
        let theirs = self.shadow.get_code(address);
        self.mismatches
            .check_bytes(Kind::GetCode, &address, &ours, &theirs);
        ours
    }
    fn get_code_hash(&mut self, address: Address) -> H256 {
        self.both(Kind::GetCodeHash, &address, |db| db.get_code_hash(address))
    }
    fn get_storage_root(&mut self, address: Address) -> H256 {
        match self.compare_state_hash {
            true => self.both(Kind::GetStorageRoot, &address, |db| {
                db.get_storage_root(address)
            }),
            false => self.primary.get_storage_root(address),
        }
    }
    fn get_hash(&mut self) -> anyhow::Result<H256> {
        if !self.compare_state_hash {
            return self.primary.get_hash();
        }
        let ours = self.primary.get_hash()?;
        let theirs = self.shadow.get_hash()?;
        self.mismatches.check(Kind::GetHash, &(), &ours, &theirs);
        Ok(ours)
    }
    fn release(&mut self) -> anyhow::Result<()> {
        self.primary.release()?;
        self.shadow.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStateDb;

    const A: Address = Address::repeat_byte(0xA1);

    fn pair() -> ShadowStateDb<MemoryStateDb, MemoryStateDb> {
        ShadowStateDb::new(MemoryStateDb::new(), MemoryStateDb::new())
    }

    #[test]
    fn divergent_balance() {
        let mut primary = MemoryStateDb::new();
        primary.add_balance(A, 100.into(), BalanceChangeReason::Transfer);
        let mut shadow = MemoryStateDb::new();
        shadow.add_balance(A, 101.into(), BalanceChangeReason::Transfer);

        let mut db = ShadowStateDb::new(primary, shadow);
        assert_eq!(db.get_balance(A), U256::from(100));
        assert_eq!(
            db.mismatches(),
            [Mismatch {
                kind: Kind::GetBalance,
                args: format!("{A:?}"),
                primary: "100".into(),
                shadow: "101".into(),
            }]
        );
        assert!(db.error().is_some());
    }

    #[test]
    fn snapshot_ids_are_paired() {
        let mut db = ShadowStateDb::new(
            MemoryStateDb::new().with_snapshot_base(10),
            MemoryStateDb::new().with_snapshot_base(-50),
        );
        db.set_nonce(A, 1);
        let first = db.snapshot();
        db.set_nonce(A, 2);
        let second = db.snapshot();
        db.set_nonce(A, 3);
        assert_eq!((first, second), (10, 11));

        db.revert_to_snapshot(second);
        assert_eq!(db.get_nonce(A), 2);
        // the pair survives its own revert
        db.set_nonce(A, 4);
        db.revert_to_snapshot(second);
        assert_eq!(db.get_nonce(A), 2);
        db.revert_to_snapshot(first);
        assert_eq!(db.get_nonce(A), 1);

        assert!(db.mismatches().is_empty());
        assert!(db.error().is_none(), "{:?}", db.error());
    }

    #[test]
    fn unknown_snapshot_is_a_mismatch() {
        let mut db = pair();
        db.revert_to_snapshot(3);
        let mismatches = db.mismatches();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].kind, Kind::RevertToSnapshot);
        assert!(db.primary().error().is_none(), "no revert was issued");
    }

    #[test]
    fn hashes_are_only_compared_on_request() {
        let mut primary = MemoryStateDb::new();
        primary.set_state(A, H256::repeat_byte(1), H256::repeat_byte(1));
        let mut db = ShadowStateDb::new(primary, MemoryStateDb::new());
        db.get_hash().unwrap();
        db.get_storage_root(A);
        db.intermediate_root(false);
        assert!(db.mismatches().is_empty());

        let mut db = {
            let (primary, shadow) = db.into_parts();
            ShadowStateDb::new(primary, shadow).compare_state_hash(true)
        };
        db.get_hash().unwrap();
        db.get_storage_root(A);
        db.intermediate_root(false);
        let kinds = db.mismatches().iter().map(|it| it.kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            [Kind::GetHash, Kind::GetStorageRoot, Kind::IntermediateRoot]
        );
    }

    #[test]
    fn primary_error_skips_shadow() {
        let mut db = pair();
        db.begin_sync_period(0).unwrap();
        assert!(db.begin_transaction(0).is_err());
        // neither moved, so they are still in step
        db.begin_block(1).unwrap();
        db.begin_transaction(0).unwrap();
        assert_eq!(db.primary().scope(), db.shadow().scope());
    }

    #[test]
    fn shadow_only_close_failure_is_recorded() {
        let mut shadow = MemoryStateDb::new();
        shadow.close().unwrap();
        let mut db = ShadowStateDb::new(MemoryStateDb::new(), shadow);
        db.close().unwrap();
        assert_eq!(db.mismatches()[0].kind, Kind::Close);
    }

    #[test]
    fn logs_are_compared_elementwise() {
        let mut primary = MemoryStateDb::new();
        let mut shadow = MemoryStateDb::new();
        for (db, data) in [(&mut primary, b"ab"), (&mut shadow, b"ac")] {
            db.add_log(Log::default());
            db.add_log(Log {
                address: A,
                topics: vec![],
                data: data.to_vec(),
            });
        }
        let mut db = ShadowStateDb::new(primary, shadow);
        let logs = db.get_logs(H256::zero(), 0, H256::zero());
        assert_eq!(logs[1].data, b"ab");
        let mismatches = db.mismatches();
        assert!(mismatches[0].primary.starts_with("log 1:"), "{mismatches:?}");
    }

    #[test]
    fn archives_share_the_mismatch_log() {
        let mut db = pair();
        {
            let mut load = db.start_bulk_load(0).unwrap();
            load.set_balance(A, 5.into());
            load.close().unwrap();
        }
        let mut archive = db.get_archive_state(0).unwrap();
        assert_eq!(archive.get_balance(A), U256::from(5));
        archive.release().unwrap();
        assert!(db.mismatches().is_empty());
        assert_eq!(db.get_archive_block_height().unwrap(), Some(0));
    }
}
