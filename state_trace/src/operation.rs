//! One recorded call against a [`StateDb`].

use std::time::{Duration, Instant};

use bytes::BufMut;
use ethereum_types::{Address, H256, U256};

use crate::{
    context::ReplayContext,
    error::TraceError,
    opcode::{Form, Kind, OpCode},
    state_db::{AccessListItem, BalanceChangeReason, Log, StateDb},
};

/// How an account operation names its contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Explicit(Address),
    LastContract,
}

/// How a storage operation names its contract and key.
///
/// A compact key always implies the last contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotTarget {
    Explicit(Address, H256),
    LastContract(H256),
    LastContractLastSlot,
    /// Position in the key cache, most recent first.
    LastContractCachedSlot(u8),
}

impl Target {
    pub const fn form(&self) -> Form {
        match self {
            Self::Explicit(_) => Form::Explicit,
            Self::LastContract => Form::LastContract,
        }
    }
}

impl SlotTarget {
    pub const fn form(&self) -> Form {
        match self {
            Self::Explicit(..) => Form::Explicit,
            Self::LastContract(_) => Form::LastContract,
            Self::LastContractLastSlot => Form::LastContractLastSlot,
            Self::LastContractCachedSlot(_) => Form::LastContractCachedSlot,
        }
    }
}

/// A call, with its arguments but not its result.
///
/// Reads are recorded too: replaying them exercises the same engine paths,
/// and a proxy downstream of the replayer may compare their results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateAccount(Target),
    Exist(Target),
    Empty(Target),
    SelfDestruct(Target),
    HasSelfDestructed(Target),
    GetBalance(Target),
    AddBalance {
        target: Target,
        amount: U256,
        reason: BalanceChangeReason,
    },
    SubBalance {
        target: Target,
        amount: U256,
        reason: BalanceChangeReason,
    },
    GetNonce(Target),
    SetNonce {
        target: Target,
        nonce: u64,
    },
    GetCode(Target),
    GetCodeSize(Target),
    GetCodeHash(Target),
    SetCode {
        target: Target,
        code: Vec<u8>,
    },
    GetStorageRoot(Target),
    AddAddressToAccessList(Target),
    AddressInAccessList(Target),

    GetState(SlotTarget),
    GetCommittedState(SlotTarget),
    SetState {
        slot: SlotTarget,
        value: H256,
    },
    GetTransientState(SlotTarget),
    SetTransientState {
        slot: SlotTarget,
        value: H256,
    },
    AddSlotToAccessList(SlotTarget),
    SlotInAccessList(SlotTarget),

    BeginSyncPeriod(u64),
    EndSyncPeriod,
    BeginBlock(u64),
    EndBlock,
    BeginTransaction(u32),
    EndTransaction,
    /// The identifier the recording engine returned.
    Snapshot(i32),
    RevertToSnapshot(i32),
    AddRefund(u64),
    SubRefund(u64),
    GetRefund,
    SetTxContext {
        tx_hash: H256,
        index: u32,
    },
    PrepareAccessList {
        sender: Address,
        destination: Option<Address>,
        precompiles: Vec<Address>,
        access_list: Vec<AccessListItem>,
    },
    AddLog(Log),
    GetLogs {
        tx_hash: H256,
        block: u64,
        block_hash: H256,
    },
    AddPreimage {
        hash: H256,
        preimage: Vec<u8>,
    },
    Finalise {
        delete_empty: bool,
    },
    IntermediateRoot {
        delete_empty: bool,
    },
    Commit {
        block: u64,
        delete_empty: bool,
    },
    GetHash,
    Close,
}

enum Reference<'a> {
    None,
    Contract(&'a Target),
    Slot(&'a SlotTarget),
}

impl Operation {
    pub fn kind(&self) -> Kind {
        match self {
            Self::CreateAccount(_) => Kind::CreateAccount,
            Self::Exist(_) => Kind::Exist,
            Self::Empty(_) => Kind::Empty,
            Self::SelfDestruct(_) => Kind::SelfDestruct,
            Self::HasSelfDestructed(_) => Kind::HasSelfDestructed,
            Self::GetBalance(_) => Kind::GetBalance,
            Self::AddBalance { .. } => Kind::AddBalance,
            Self::SubBalance { .. } => Kind::SubBalance,
            Self::GetNonce(_) => Kind::GetNonce,
            Self::SetNonce { .. } => Kind::SetNonce,
            Self::GetCode(_) => Kind::GetCode,
            Self::GetCodeSize(_) => Kind::GetCodeSize,
            Self::GetCodeHash(_) => Kind::GetCodeHash,
            Self::SetCode { .. } => Kind::SetCode,
            Self::GetStorageRoot(_) => Kind::GetStorageRoot,
            Self::AddAddressToAccessList(_) => Kind::AddAddressToAccessList,
            Self::AddressInAccessList(_) => Kind::AddressInAccessList,
            Self::GetState(_) => Kind::GetState,
            Self::GetCommittedState(_) => Kind::GetCommittedState,
            Self::SetState { .. } => Kind::SetState,
            Self::GetTransientState(_) => Kind::GetTransientState,
            Self::SetTransientState { .. } => Kind::SetTransientState,
            Self::AddSlotToAccessList(_) => Kind::AddSlotToAccessList,
            Self::SlotInAccessList(_) => Kind::SlotInAccessList,
            Self::BeginSyncPeriod(_) => Kind::BeginSyncPeriod,
            Self::EndSyncPeriod => Kind::EndSyncPeriod,
            Self::BeginBlock(_) => Kind::BeginBlock,
            Self::EndBlock => Kind::EndBlock,
            Self::BeginTransaction(_) => Kind::BeginTransaction,
            Self::EndTransaction => Kind::EndTransaction,
            Self::Snapshot(_) => Kind::Snapshot,
            Self::RevertToSnapshot(_) => Kind::RevertToSnapshot,
            Self::AddRefund(_) => Kind::AddRefund,
            Self::SubRefund(_) => Kind::SubRefund,
            Self::GetRefund => Kind::GetRefund,
            Self::SetTxContext { .. } => Kind::SetTxContext,
            Self::PrepareAccessList { .. } => Kind::PrepareAccessList,
            Self::AddLog(_) => Kind::AddLog,
            Self::GetLogs { .. } => Kind::GetLogs,
            Self::AddPreimage { .. } => Kind::AddPreimage,
            Self::Finalise { .. } => Kind::Finalise,
            Self::IntermediateRoot { .. } => Kind::IntermediateRoot,
            Self::Commit { .. } => Kind::Commit,
            Self::GetHash => Kind::GetHash,
            Self::Close => Kind::Close,
        }
    }

    fn reference(&self) -> Reference<'_> {
        match self {
            Self::CreateAccount(target)
            | Self::Exist(target)
            | Self::Empty(target)
            | Self::SelfDestruct(target)
            | Self::HasSelfDestructed(target)
            | Self::GetBalance(target)
            | Self::AddBalance { target, .. }
            | Self::SubBalance { target, .. }
            | Self::GetNonce(target)
            | Self::SetNonce { target, .. }
            | Self::GetCode(target)
            | Self::GetCodeSize(target)
            | Self::GetCodeHash(target)
            | Self::SetCode { target, .. }
            | Self::GetStorageRoot(target)
            | Self::AddAddressToAccessList(target)
            | Self::AddressInAccessList(target) => Reference::Contract(target),
            Self::GetState(slot)
            | Self::GetCommittedState(slot)
            | Self::SetState { slot, .. }
            | Self::GetTransientState(slot)
            | Self::SetTransientState { slot, .. }
            | Self::AddSlotToAccessList(slot)
            | Self::SlotInAccessList(slot) => Reference::Slot(slot),
            _ => Reference::None,
        }
    }

    pub fn form(&self) -> Form {
        match self.reference() {
            Reference::None => Form::Explicit,
            Reference::Contract(target) => target.form(),
            Reference::Slot(slot) => slot.form(),
        }
    }

    pub fn op_code(&self) -> OpCode {
        OpCode::from_parts(self.kind(), self.form())
            .expect("every operation variant admits the forms its reference can take")
    }

    /// Append the wire encoding of this operation to `buf`.
    ///
    /// On error, `buf` may hold a partial record.
    pub fn write(&self, buf: &mut impl BufMut) -> Result<(), TraceError> {
        buf.put_u8(self.op_code() as u8);
        match self.reference() {
            Reference::None => {}
            Reference::Contract(Target::Explicit(address)) => buf.put_slice(address.as_bytes()),
            Reference::Contract(Target::LastContract) => {}
            Reference::Slot(SlotTarget::Explicit(address, key)) => {
                buf.put_slice(address.as_bytes());
                buf.put_slice(key.as_bytes());
            }
            Reference::Slot(SlotTarget::LastContract(key)) => buf.put_slice(key.as_bytes()),
            Reference::Slot(SlotTarget::LastContractLastSlot) => {}
            Reference::Slot(SlotTarget::LastContractCachedSlot(position)) => buf.put_u8(*position),
        }
        match self {
            Self::AddBalance { amount, reason, .. } | Self::SubBalance { amount, reason, .. } => {
                put_u256(buf, amount);
                buf.put_u8(*reason as u8);
            }
            Self::SetNonce { nonce, .. } => buf.put_u64_le(*nonce),
            Self::SetCode { code, .. } => put_bytes(buf, "code", code)?,
            Self::SetState { value, .. } | Self::SetTransientState { value, .. } => {
                buf.put_slice(value.as_bytes())
            }
            Self::BeginSyncPeriod(number) | Self::BeginBlock(number) => buf.put_u64_le(*number),
            Self::BeginTransaction(number) => buf.put_u32_le(*number),
            Self::Snapshot(id) | Self::RevertToSnapshot(id) => buf.put_i32_le(*id),
            Self::AddRefund(gas) | Self::SubRefund(gas) => buf.put_u64_le(*gas),
            Self::SetTxContext { tx_hash, index } => {
                buf.put_slice(tx_hash.as_bytes());
                buf.put_u32_le(*index);
            }
            Self::PrepareAccessList {
                sender,
                destination,
                precompiles,
                access_list,
            } => {
                buf.put_slice(sender.as_bytes());
                buf.put_u8(destination.is_some().into());
                buf.put_slice(destination.unwrap_or_default().as_bytes());
                buf.put_u16_le(count("precompiles", precompiles.len())?);
                for precompile in precompiles {
                    buf.put_slice(precompile.as_bytes());
                }
                buf.put_u16_le(count("access list", access_list.len())?);
                for AccessListItem {
                    address,
                    storage_keys,
                } in access_list
                {
                    buf.put_slice(address.as_bytes());
                    buf.put_u16_le(count("storage keys", storage_keys.len())?);
                    for key in storage_keys {
                        buf.put_slice(key.as_bytes());
                    }
                }
            }
            Self::AddLog(Log {
                address,
                topics,
                data,
            }) => {
                buf.put_slice(address.as_bytes());
                buf.put_u8(count("topics", topics.len())?);
                for topic in topics {
                    buf.put_slice(topic.as_bytes());
                }
                put_bytes(buf, "log data", data)?;
            }
            Self::GetLogs {
                tx_hash,
                block,
                block_hash,
            } => {
                buf.put_slice(tx_hash.as_bytes());
                buf.put_u64_le(*block);
                buf.put_slice(block_hash.as_bytes());
            }
            Self::AddPreimage { hash, preimage } => {
                buf.put_slice(hash.as_bytes());
                put_bytes(buf, "preimage", preimage)?;
            }
            Self::Finalise { delete_empty } | Self::IntermediateRoot { delete_empty } => {
                buf.put_u8((*delete_empty).into())
            }
            Self::Commit {
                block,
                delete_empty,
            } => {
                buf.put_u64_le(*block);
                buf.put_u8((*delete_empty).into());
            }
            _ => {}
        }
        Ok(())
    }

    /// Resolve this operation's references through `ctx`, then issue the
    /// call against `db`.
    ///
    /// Returns how long the call itself took. Results of reads are dropped.
    pub fn execute<S: StateDb + ?Sized>(
        &self,
        db: &mut S,
        ctx: &mut ReplayContext,
    ) -> anyhow::Result<Duration> {
        let dec = &mut ctx.decoding;
        let elapsed = match self {
            Self::CreateAccount(target) => {
                let address = dec.resolve_contract(*target)?;
                clock(|| db.create_account(address)).0
            }
            Self::Exist(target) => {
                let address = dec.resolve_contract(*target)?;
                clock(|| db.exist(address)).0
            }
            Self::Empty(target) => {
                let address = dec.resolve_contract(*target)?;
                clock(|| db.empty(address)).0
            }
            Self::SelfDestruct(target) => {
                let address = dec.resolve_contract(*target)?;
                clock(|| db.self_destruct(address)).0
            }
            Self::HasSelfDestructed(target) => {
                let address = dec.resolve_contract(*target)?;
                clock(|| db.has_self_destructed(address)).0
            }
            Self::GetBalance(target) => {
                let address = dec.resolve_contract(*target)?;
                clock(|| db.get_balance(address)).0
            }
            Self::AddBalance {
                target,
                amount,
                reason,
            } => {
                let address = dec.resolve_contract(*target)?;
                clock(|| db.add_balance(address, *amount, *reason)).0
            }
            Self::SubBalance {
                target,
                amount,
                reason,
            } => {
                let address = dec.resolve_contract(*target)?;
                clock(|| db.sub_balance(address, *amount, *reason)).0
            }
            Self::GetNonce(target) => {
                let address = dec.resolve_contract(*target)?;
                clock(|| db.get_nonce(address)).0
            }
            Self::SetNonce { target, nonce } => {
                let address = dec.resolve_contract(*target)?;
                clock(|| db.set_nonce(address, *nonce)).0
            }
            Self::GetCode(target) => {
                let address = dec.resolve_contract(*target)?;
                clock(|| db.get_code(address)).0
            }
            Self::GetCodeSize(target) => {
                let address = dec.resolve_contract(*target)?;
                clock(|| db.get_code_size(address)).0
            }
            Self::GetCodeHash(target) => {
                let address = dec.resolve_contract(*target)?;
                clock(|| db.get_code_hash(address)).0
            }
            Self::SetCode { target, code } => {
                let address = dec.resolve_contract(*target)?;
                clock(|| db.set_code(address, code)).0
            }
            Self::GetStorageRoot(target) => {
                let address = dec.resolve_contract(*target)?;
                clock(|| db.get_storage_root(address)).0
            }
            Self::AddAddressToAccessList(target) => {
                let address = dec.resolve_contract(*target)?;
                clock(|| db.add_address_to_access_list(address)).0
            }
            Self::AddressInAccessList(target) => {
                let address = dec.resolve_contract(*target)?;
                clock(|| db.address_in_access_list(address)).0
            }

            Self::GetState(slot) => {
                let (address, key) = dec.resolve_slot(*slot)?;
                clock(|| db.get_state(address, key)).0
            }
            Self::GetCommittedState(slot) => {
                let (address, key) = dec.resolve_slot(*slot)?;
                clock(|| db.get_committed_state(address, key)).0
            }
            Self::SetState { slot, value } => {
                let (address, key) = dec.resolve_slot(*slot)?;
                clock(|| db.set_state(address, key, *value)).0
            }
            Self::GetTransientState(slot) => {
                let (address, key) = dec.resolve_slot(*slot)?;
                clock(|| db.get_transient_state(address, key)).0
            }
            Self::SetTransientState { slot, value } => {
                let (address, key) = dec.resolve_slot(*slot)?;
                clock(|| db.set_transient_state(address, key, *value)).0
            }
            Self::AddSlotToAccessList(slot) => {
                let (address, key) = dec.resolve_slot(*slot)?;
                clock(|| db.add_slot_to_access_list(address, key)).0
            }
            Self::SlotInAccessList(slot) => {
                let (address, key) = dec.resolve_slot(*slot)?;
                clock(|| db.slot_in_access_list(address, key)).0
            }

            Self::BeginSyncPeriod(number) => try_clock(|| db.begin_sync_period(*number))?,
            Self::EndSyncPeriod => try_clock(|| db.end_sync_period())?,
            Self::BeginBlock(number) => try_clock(|| db.begin_block(*number))?,
            Self::EndBlock => try_clock(|| db.end_block())?,
            Self::BeginTransaction(number) => {
                ctx.snapshots.clear();
                try_clock(|| db.begin_transaction(*number))?
            }
            Self::EndTransaction => try_clock(|| db.end_transaction())?,
            Self::Snapshot(recorded) => {
                let (elapsed, real) = clock(|| db.snapshot());
                ctx.snapshots.insert(*recorded, real);
                elapsed
            }
            Self::RevertToSnapshot(recorded) => {
                let real = ctx.snapshots.resolve(*recorded)?;
                let elapsed = clock(|| db.revert_to_snapshot(real)).0;
                ctx.snapshots.prune_after(*recorded);
                elapsed
            }
            Self::AddRefund(gas) => clock(|| db.add_refund(*gas)).0,
            Self::SubRefund(gas) => clock(|| db.sub_refund(*gas)).0,
            Self::GetRefund => clock(|| db.get_refund()).0,
            Self::SetTxContext { tx_hash, index } => clock(|| db.set_tx_context(*tx_hash, *index)).0,
            Self::PrepareAccessList {
                sender,
                destination,
                precompiles,
                access_list,
            } => {
                clock(|| db.prepare_access_list(*sender, *destination, precompiles, access_list)).0
            }
            Self::AddLog(log) => {
                let log = log.clone();
                clock(|| db.add_log(log)).0
            }
            Self::GetLogs {
                tx_hash,
                block,
                block_hash,
            } => clock(|| db.get_logs(*tx_hash, *block, *block_hash)).0,
            Self::AddPreimage { hash, preimage } => clock(|| db.add_preimage(*hash, preimage)).0,
            Self::Finalise { delete_empty } => clock(|| db.finalise(*delete_empty)).0,
            Self::IntermediateRoot { delete_empty } => {
                clock(|| db.intermediate_root(*delete_empty)).0
            }
            Self::Commit {
                block,
                delete_empty,
            } => try_clock(|| db.commit(*block, *delete_empty))?,
            Self::GetHash => try_clock(|| db.get_hash())?,
            Self::Close => try_clock(|| db.close())?,
        };
        Ok(elapsed)
    }
}

fn clock<T>(call: impl FnOnce() -> T) -> (Duration, T) {
    let start = Instant::now();
    let out = call();
    (start.elapsed(), out)
}

fn try_clock<T>(call: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<Duration> {
    let (elapsed, out) = clock(call);
    out.map(|_| elapsed)
}

fn count<T: TryFrom<usize>>(what: &'static str, len: usize) -> Result<T, TraceError> {
    T::try_from(len).map_err(|_| TraceError::Oversized { what, len })
}

fn put_bytes(buf: &mut impl BufMut, what: &'static str, bytes: &[u8]) -> Result<(), TraceError> {
    buf.put_u32_le(count(what, bytes.len())?);
    buf.put_slice(bytes);
    Ok(())
}

fn put_u256(buf: &mut impl BufMut, value: &U256) {
    let mut le = [0; 32];
    value.to_little_endian(&mut le);
    buf.put_slice(&le);
}
