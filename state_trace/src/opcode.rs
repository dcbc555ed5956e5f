//! The closed opcode table.
//!
//! Every recorded operation starts with one of these bytes. The numbering is
//! part of the trace format: renumbering invalidates every trace captured so
//! far.
//!
//! An opcode is the product of a [`Kind`] (which [`StateDb`](crate::StateDb)
//! method is called) and a [`Form`] (how the contract and key are referenced).

use once_cell::sync::Lazy;
use serde::Serialize;

/// Which capability method an operation invokes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    strum::Display,
    strum::IntoStaticStr,
    strum::EnumIter,
)]
pub enum Kind {
    CreateAccount,
    Exist,
    Empty,
    SelfDestruct,
    HasSelfDestructed,
    GetBalance,
    AddBalance,
    SubBalance,
    GetNonce,
    SetNonce,
    GetCode,
    GetCodeSize,
    GetCodeHash,
    SetCode,
    GetStorageRoot,
    AddAddressToAccessList,
    AddressInAccessList,
    GetState,
    GetCommittedState,
    SetState,
    GetTransientState,
    SetTransientState,
    AddSlotToAccessList,
    SlotInAccessList,
    BeginSyncPeriod,
    EndSyncPeriod,
    BeginBlock,
    EndBlock,
    BeginTransaction,
    EndTransaction,
    Snapshot,
    RevertToSnapshot,
    AddRefund,
    SubRefund,
    GetRefund,
    SetTxContext,
    PrepareAccessList,
    AddLog,
    GetLogs,
    AddPreimage,
    Finalise,
    IntermediateRoot,
    Commit,
    GetHash,
    Close,
    // Not encodable: only seen by proxies.
    StartBulkLoad,
    GetArchiveState,
    GetArchiveBlockHeight,
}

/// How an operation refers to its contract and storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
pub enum Form {
    /// Carries every reference it needs, or needs none.
    Explicit,
    /// Omits the contract: it is the last contract touched.
    LastContract,
    /// Omits the contract and the key: the key is the most recently used one.
    LastContractLastSlot,
    /// Omits the contract, and names the key by its position in the key cache.
    LastContractCachedSlot,
}

/// Which reference an operation carries, and therefore which [`Form`]s exist
/// for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Class {
    /// No contract reference.
    Plain,
    /// A contract, but no storage key.
    Account,
    /// A contract and a storage key.
    Storage,
}

impl Kind {
    pub const fn class(self) -> Class {
        use Kind::*;
        match self {
            CreateAccount | Exist | Empty | SelfDestruct | HasSelfDestructed | GetBalance
            | AddBalance | SubBalance | GetNonce | SetNonce | GetCode | GetCodeSize
            | GetCodeHash | SetCode | GetStorageRoot | AddAddressToAccessList
            | AddressInAccessList => Class::Account,
            GetState | GetCommittedState | SetState | GetTransientState | SetTransientState
            | AddSlotToAccessList | SlotInAccessList => Class::Storage,
            _ => Class::Plain,
        }
    }
}

impl Class {
    pub const fn admits(self, form: Form) -> bool {
        matches!(
            (self, form),
            (_, Form::Explicit)
                | (Class::Account | Class::Storage, Form::LastContract)
                | (Class::Storage, Form::LastContractLastSlot)
                | (Class::Storage, Form::LastContractCachedSlot)
        )
    }
}

/// Suffixes: `Lc` = last contract, `Lcls` = last contract + last slot,
/// `Lccs` = last contract + cached slot.
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
    strum::FromRepr,
    strum::EnumIter,
    strum::IntoStaticStr,
    strum::Display,
)]
pub enum OpCode {
    CreateAccount = 0x00,
    CreateAccountLc = 0x01,
    Exist = 0x02,
    ExistLc = 0x03,
    Empty = 0x04,
    EmptyLc = 0x05,
    SelfDestruct = 0x06,
    SelfDestructLc = 0x07,
    HasSelfDestructed = 0x08,
    HasSelfDestructedLc = 0x09,
    GetBalance = 0x0A,
    GetBalanceLc = 0x0B,
    AddBalance = 0x0C,
    AddBalanceLc = 0x0D,
    SubBalance = 0x0E,
    SubBalanceLc = 0x0F,
    GetNonce = 0x10,
    GetNonceLc = 0x11,
    SetNonce = 0x12,
    SetNonceLc = 0x13,
    GetCode = 0x14,
    GetCodeLc = 0x15,
    GetCodeSize = 0x16,
    GetCodeSizeLc = 0x17,
    GetCodeHash = 0x18,
    GetCodeHashLc = 0x19,
    SetCode = 0x1A,
    SetCodeLc = 0x1B,
    GetStorageRoot = 0x1C,
    GetStorageRootLc = 0x1D,
    AddAddressToAccessList = 0x1E,
    AddAddressToAccessListLc = 0x1F,
    AddressInAccessList = 0x20,
    AddressInAccessListLc = 0x21,

    GetState = 0x30,
    GetStateLc = 0x31,
    GetStateLcls = 0x32,
    GetStateLccs = 0x33,
    GetCommittedState = 0x34,
    GetCommittedStateLc = 0x35,
    GetCommittedStateLcls = 0x36,
    GetCommittedStateLccs = 0x37,
    SetState = 0x38,
    SetStateLc = 0x39,
    SetStateLcls = 0x3A,
    SetStateLccs = 0x3B,
    GetTransientState = 0x3C,
    GetTransientStateLc = 0x3D,
    GetTransientStateLcls = 0x3E,
    GetTransientStateLccs = 0x3F,
    SetTransientState = 0x40,
    SetTransientStateLc = 0x41,
    SetTransientStateLcls = 0x42,
    SetTransientStateLccs = 0x43,
    AddSlotToAccessList = 0x44,
    AddSlotToAccessListLc = 0x45,
    AddSlotToAccessListLcls = 0x46,
    AddSlotToAccessListLccs = 0x47,
    SlotInAccessList = 0x48,
    SlotInAccessListLc = 0x49,
    SlotInAccessListLcls = 0x4A,
    SlotInAccessListLccs = 0x4B,

    BeginSyncPeriod = 0x60,
    EndSyncPeriod = 0x61,
    BeginBlock = 0x62,
    EndBlock = 0x63,
    BeginTransaction = 0x64,
    EndTransaction = 0x65,
    Snapshot = 0x66,
    RevertToSnapshot = 0x67,
    AddRefund = 0x68,
    SubRefund = 0x69,
    GetRefund = 0x6A,
    SetTxContext = 0x6B,
    PrepareAccessList = 0x6C,
    AddLog = 0x6D,
    GetLogs = 0x6E,
    AddPreimage = 0x6F,
    Finalise = 0x70,
    IntermediateRoot = 0x71,
    Commit = 0x72,
    GetHash = 0x73,
    Close = 0x74,
}

impl OpCode {
    /// The [`Kind`] and [`Form`] this opcode encodes.
    pub const fn split(self) -> (Kind, Form) {
        use Form::*;
        use OpCode as O;
        match self {
            O::CreateAccount => (Kind::CreateAccount, Explicit),
            O::CreateAccountLc => (Kind::CreateAccount, LastContract),
            O::Exist => (Kind::Exist, Explicit),
            O::ExistLc => (Kind::Exist, LastContract),
            O::Empty => (Kind::Empty, Explicit),
            O::EmptyLc => (Kind::Empty, LastContract),
            O::SelfDestruct => (Kind::SelfDestruct, Explicit),
            O::SelfDestructLc => (Kind::SelfDestruct, LastContract),
            O::HasSelfDestructed => (Kind::HasSelfDestructed, Explicit),
            O::HasSelfDestructedLc => (Kind::HasSelfDestructed, LastContract),
            O::GetBalance => (Kind::GetBalance, Explicit),
            O::GetBalanceLc => (Kind::GetBalance, LastContract),
            O::AddBalance => (Kind::AddBalance, Explicit),
            O::AddBalanceLc => (Kind::AddBalance, LastContract),
            O::SubBalance => (Kind::SubBalance, Explicit),
            O::SubBalanceLc => (Kind::SubBalance, LastContract),
            O::GetNonce => (Kind::GetNonce, Explicit),
            O::GetNonceLc => (Kind::GetNonce, LastContract),
            O::SetNonce => (Kind::SetNonce, Explicit),
            O::SetNonceLc => (Kind::SetNonce, LastContract),
            O::GetCode => (Kind::GetCode, Explicit),
            O::GetCodeLc => (Kind::GetCode, LastContract),
            O::GetCodeSize => (Kind::GetCodeSize, Explicit),
            O::GetCodeSizeLc => (Kind::GetCodeSize, LastContract),
            O::GetCodeHash => (Kind::GetCodeHash, Explicit),
            O::GetCodeHashLc => (Kind::GetCodeHash, LastContract),
            O::SetCode => (Kind::SetCode, Explicit),
            O::SetCodeLc => (Kind::SetCode, LastContract),
            O::GetStorageRoot => (Kind::GetStorageRoot, Explicit),
            O::GetStorageRootLc => (Kind::GetStorageRoot, LastContract),
            O::AddAddressToAccessList => (Kind::AddAddressToAccessList, Explicit),
            O::AddAddressToAccessListLc => (Kind::AddAddressToAccessList, LastContract),
            O::AddressInAccessList => (Kind::AddressInAccessList, Explicit),
            O::AddressInAccessListLc => (Kind::AddressInAccessList, LastContract),

            O::GetState => (Kind::GetState, Explicit),
            O::GetStateLc => (Kind::GetState, LastContract),
            O::GetStateLcls => (Kind::GetState, LastContractLastSlot),
            O::GetStateLccs => (Kind::GetState, LastContractCachedSlot),
            O::GetCommittedState => (Kind::GetCommittedState, Explicit),
            O::GetCommittedStateLc => (Kind::GetCommittedState, LastContract),
            O::GetCommittedStateLcls => (Kind::GetCommittedState, LastContractLastSlot),
            O::GetCommittedStateLccs => (Kind::GetCommittedState, LastContractCachedSlot),
            O::SetState => (Kind::SetState, Explicit),
            O::SetStateLc => (Kind::SetState, LastContract),
            O::SetStateLcls => (Kind::SetState, LastContractLastSlot),
            O::SetStateLccs => (Kind::SetState, LastContractCachedSlot),
            O::GetTransientState => (Kind::GetTransientState, Explicit),
            O::GetTransientStateLc => (Kind::GetTransientState, LastContract),
            O::GetTransientStateLcls => (Kind::GetTransientState, LastContractLastSlot),
            O::GetTransientStateLccs => (Kind::GetTransientState, LastContractCachedSlot),
            O::SetTransientState => (Kind::SetTransientState, Explicit),
            O::SetTransientStateLc => (Kind::SetTransientState, LastContract),
            O::SetTransientStateLcls => (Kind::SetTransientState, LastContractLastSlot),
            O::SetTransientStateLccs => (Kind::SetTransientState, LastContractCachedSlot),
            O::AddSlotToAccessList => (Kind::AddSlotToAccessList, Explicit),
            O::AddSlotToAccessListLc => (Kind::AddSlotToAccessList, LastContract),
            O::AddSlotToAccessListLcls => (Kind::AddSlotToAccessList, LastContractLastSlot),
            O::AddSlotToAccessListLccs => (Kind::AddSlotToAccessList, LastContractCachedSlot),
            O::SlotInAccessList => (Kind::SlotInAccessList, Explicit),
            O::SlotInAccessListLc => (Kind::SlotInAccessList, LastContract),
            O::SlotInAccessListLcls => (Kind::SlotInAccessList, LastContractLastSlot),
            O::SlotInAccessListLccs => (Kind::SlotInAccessList, LastContractCachedSlot),

            O::BeginSyncPeriod => (Kind::BeginSyncPeriod, Explicit),
            O::EndSyncPeriod => (Kind::EndSyncPeriod, Explicit),
            O::BeginBlock => (Kind::BeginBlock, Explicit),
            O::EndBlock => (Kind::EndBlock, Explicit),
            O::BeginTransaction => (Kind::BeginTransaction, Explicit),
            O::EndTransaction => (Kind::EndTransaction, Explicit),
            O::Snapshot => (Kind::Snapshot, Explicit),
            O::RevertToSnapshot => (Kind::RevertToSnapshot, Explicit),
            O::AddRefund => (Kind::AddRefund, Explicit),
            O::SubRefund => (Kind::SubRefund, Explicit),
            O::GetRefund => (Kind::GetRefund, Explicit),
            O::SetTxContext => (Kind::SetTxContext, Explicit),
            O::PrepareAccessList => (Kind::PrepareAccessList, Explicit),
            O::AddLog => (Kind::AddLog, Explicit),
            O::GetLogs => (Kind::GetLogs, Explicit),
            O::AddPreimage => (Kind::AddPreimage, Explicit),
            O::Finalise => (Kind::Finalise, Explicit),
            O::IntermediateRoot => (Kind::IntermediateRoot, Explicit),
            O::Commit => (Kind::Commit, Explicit),
            O::GetHash => (Kind::GetHash, Explicit),
            O::Close => (Kind::Close, Explicit),
        }
    }

    pub const fn kind(self) -> Kind {
        self.split().0
    }

    pub const fn form(self) -> Form {
        self.split().1
    }

    /// The inverse of [`OpCode::split`].
    ///
    /// Returns [`None`] for combinations with no opcode, e.g. a plain kind in
    /// a compact form, or a kind proxies see but traces never carry.
    pub fn from_parts(kind: Kind, form: Form) -> Option<Self> {
        TABLE
            .binary_search_by_key(&(kind, form), |(parts, _)| *parts)
            .ok()
            .map(|ix| TABLE[ix].1)
    }

    /// Number of payload bytes that follow the opcode, not counting variable
    /// length tails.
    pub const fn fixed_width(self) -> usize {
        const ADDRESS: usize = 20;
        const WORD: usize = 32;
        let (kind, form) = self.split();
        let reference = match (kind.class(), form) {
            (Class::Plain, _) => 0,
            (Class::Account, Form::Explicit) => ADDRESS,
            (Class::Account, _) => 0,
            (Class::Storage, Form::Explicit) => ADDRESS + WORD,
            (Class::Storage, Form::LastContract) => WORD,
            (Class::Storage, Form::LastContractLastSlot) => 0,
            (Class::Storage, Form::LastContractCachedSlot) => 1,
        };
        let rest = match kind {
            Kind::AddBalance | Kind::SubBalance => WORD + 1,
            Kind::SetNonce => 8,
            Kind::SetCode => 4,
            Kind::SetState | Kind::SetTransientState => WORD,
            Kind::BeginSyncPeriod | Kind::BeginBlock => 8,
            Kind::BeginTransaction => 4,
            Kind::Snapshot | Kind::RevertToSnapshot => 4,
            Kind::AddRefund | Kind::SubRefund => 8,
            Kind::SetTxContext => WORD + 4,
            Kind::PrepareAccessList => ADDRESS + 1 + ADDRESS + 2 + 2,
            Kind::AddLog => ADDRESS + 1 + 4,
            Kind::GetLogs => WORD + 8 + WORD,
            Kind::AddPreimage => WORD + 4,
            Kind::Finalise | Kind::IntermediateRoot => 1,
            Kind::Commit => 8 + 1,
            _ => 0,
        };
        reference + rest
    }

    /// Whether the record carries length-prefixed data after the fixed part.
    pub const fn is_variable(self) -> bool {
        matches!(
            self.kind(),
            Kind::SetCode | Kind::PrepareAccessList | Kind::AddLog | Kind::AddPreimage
        )
    }
}

/// Sorted by `(Kind, Form)` for [`OpCode::from_parts`].
static TABLE: Lazy<Vec<((Kind, Form), OpCode)>> = Lazy::new(|| {
    use strum::IntoEnumIterator as _;
    let mut table = OpCode::iter()
        .map(|op| (op.split(), op))
        .collect::<Vec<_>>();
    table.sort_unstable();
    table
});
