//! Per-session state that compact records are relative to.
//!
//! The recorder and the replayer each hold one of these. They must start from
//! identical configurations and see the same record sequence, so both sides
//! update through the same [`Addressing`] code.

use std::collections::{BTreeMap, VecDeque};

use ethereum_types::{Address, H256};

use crate::{
    error::TraceError,
    operation::{SlotTarget, Target},
};

/// Recently used storage keys, most recent first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCache {
    keys: VecDeque<H256>,
    capacity: usize,
}

impl KeyCache {
    pub const DEFAULT_CAPACITY: usize = 32;
    /// Positions are encoded in one byte.
    pub const MAX_CAPACITY: usize = 256;

    /// `capacity` is clamped to `1..=`[`Self::MAX_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, Self::MAX_CAPACITY);
        Self {
            keys: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn position(&self, key: &H256) -> Option<u8> {
        self.keys
            .iter()
            .position(|it| it == key)
            .and_then(|ix| u8::try_from(ix).ok())
    }

    pub fn get(&self, position: u8) -> Option<H256> {
        self.keys.get(usize::from(position)).copied()
    }

    /// Move `key` to the front, evicting the oldest key if it is new and the
    /// cache is full.
    pub fn touch(&mut self, key: H256) {
        match self.keys.iter().position(|it| *it == key) {
            Some(0) => {}
            Some(ix) => {
                self.keys.remove(ix);
                self.keys.push_front(key);
            }
            None => {
                if self.keys.len() == self.capacity {
                    self.keys.pop_back();
                }
                self.keys.push_front(key);
            }
        }
    }
}

impl Default for KeyCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Addressing {
    last_contract: Option<Address>,
    keys: KeyCache,
}

impl Addressing {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            last_contract: None,
            keys: KeyCache::new(capacity),
        }
    }

    fn touch_contract(&mut self, address: Address) {
        self.last_contract = Some(address);
    }

    fn touch_slot(&mut self, address: Address, key: H256) {
        self.last_contract = Some(address);
        self.keys.touch(key);
    }
}

/// Chooses the most compact reference for each recorded call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodingContext {
    state: Addressing,
}

impl EncodingContext {
    pub fn new(key_cache_capacity: usize) -> Self {
        Self {
            state: Addressing::with_capacity(key_cache_capacity),
        }
    }

    pub fn last_contract(&self) -> Option<Address> {
        self.state.last_contract
    }

    pub fn encode_contract(&mut self, address: Address) -> Target {
        let target = match self.state.last_contract == Some(address) {
            true => Target::LastContract,
            false => Target::Explicit(address),
        };
        self.state.touch_contract(address);
        target
    }

    /// A key is only ever referenced compactly when its contract is too.
    pub fn encode_slot(&mut self, address: Address, key: H256) -> SlotTarget {
        let target = match self.state.last_contract == Some(address) {
            false => SlotTarget::Explicit(address, key),
            true => match self.state.keys.position(&key) {
                Some(0) => SlotTarget::LastContractLastSlot,
                Some(position) => SlotTarget::LastContractCachedSlot(position),
                None => SlotTarget::LastContract(key),
            },
        };
        self.state.touch_slot(address, key);
        target
    }
}

/// Resolves compact references back to addresses and keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodingContext {
    state: Addressing,
}

impl DecodingContext {
    pub fn new(key_cache_capacity: usize) -> Self {
        Self {
            state: Addressing::with_capacity(key_cache_capacity),
        }
    }

    pub fn last_contract(&self) -> Option<Address> {
        self.state.last_contract
    }

    pub fn resolve_contract(&mut self, target: Target) -> Result<Address, TraceError> {
        let address = match target {
            Target::Explicit(address) => address,
            Target::LastContract => self.last()?,
        };
        self.state.touch_contract(address);
        Ok(address)
    }

    pub fn resolve_slot(&mut self, target: SlotTarget) -> Result<(Address, H256), TraceError> {
        let (address, key) = match target {
            SlotTarget::Explicit(address, key) => (address, key),
            SlotTarget::LastContract(key) => (self.last()?, key),
            SlotTarget::LastContractLastSlot => (self.last()?, self.cached(0)?),
            SlotTarget::LastContractCachedSlot(position) => (self.last()?, self.cached(position)?),
        };
        self.state.touch_slot(address, key);
        Ok((address, key))
    }

    fn last(&self) -> Result<Address, TraceError> {
        self.state
            .last_contract
            .ok_or(TraceError::MissingLastContract)
    }

    fn cached(&self, position: u8) -> Result<H256, TraceError> {
        self.state
            .keys
            .get(position)
            .ok_or(TraceError::MissingCachedKey { position })
    }
}

/// Maps the snapshot identifiers of the recorded engine to those of the engine
/// being replayed against.
///
/// Recorded identifiers need not increase, or even stay unique once a revert
/// has released them, so snapshots are ordered by a sequence number counted as
/// they are replayed. An identifier refers to the latest snapshot that carried
/// it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotTable {
    next: u64,
    sequence: BTreeMap<i32, u64>,
    real: BTreeMap<u64, i32>,
}

impl SnapshotTable {
    /// Returns the sequence number given to the snapshot.
    pub fn insert(&mut self, recorded: i32, real: i32) -> u64 {
        let seq = self.next;
        self.next += 1;
        self.sequence.insert(recorded, seq);
        self.real.insert(seq, real);
        seq
    }

    pub fn resolve(&self, recorded: i32) -> Result<i32, TraceError> {
        self.sequence
            .get(&recorded)
            .and_then(|seq| self.real.get(seq))
            .copied()
            .ok_or(TraceError::UnmappedSnapshot { recorded })
    }

    /// Forget every snapshot taken after the one `recorded` refers to.
    pub fn prune_after(&mut self, recorded: i32) {
        let Some(&target) = self.sequence.get(&recorded) else {
            return;
        };
        self.real.split_off(&(target + 1));
        self.sequence.retain(|_, seq| *seq <= target);
    }

    pub fn clear(&mut self) {
        *self = Self::default()
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

/// Everything a replay session needs to execute decoded records.
#[derive(Debug, Clone, Default)]
pub struct ReplayContext {
    pub decoding: DecodingContext,
    pub snapshots: SnapshotTable,
}

impl ReplayContext {
    pub fn new(key_cache_capacity: usize) -> Self {
        Self {
            decoding: DecodingContext::new(key_cache_capacity),
            snapshots: SnapshotTable::default(),
        }
    }
}
