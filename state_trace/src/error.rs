use crate::opcode::Kind;

/// A lifecycle level an engine can be in.
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
    serde::Serialize,
    strum::Display,
)]
pub enum Scope {
    #[default]
    Idle,
    SyncPeriod,
    Block,
    Transaction,
}

/// An error that makes a trace unusable from the point it occurs.
///
/// None of these are recoverable: the format has no resynchronisation marker,
/// and every compact record depends on all the records before it.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// The stream ended part way through a record.
    #[error("trace truncated in the record starting at byte {offset}")]
    Truncated { offset: u64 },

    /// A record could not be parsed.
    #[error("corrupt record at byte {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    #[error("unknown opcode {byte:#04x} at byte {offset}")]
    UnknownOpcode { offset: u64, byte: u8 },

    /// A compact record was seen before any contract was referenced.
    #[error("record refers to the last contract, but there is none")]
    MissingLastContract,

    /// A compact record referred to a key cache position that is empty.
    #[error("record refers to key cache position {position}, which is empty")]
    MissingCachedKey { position: u8 },

    #[error("revert to snapshot {recorded}, which was never taken in this transaction")]
    UnmappedSnapshot { recorded: i32 },

    /// A lifecycle operation was seen where it cannot nest.
    #[error("{kind} is not allowed in {scope} scope")]
    ScopeViolation { kind: Kind, scope: Scope },

    /// A list or byte string too long for its length prefix.
    #[error("{what} has {len} entries, more than its length prefix can hold")]
    Oversized { what: &'static str, len: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TraceError {
    /// Whether the stream itself is damaged, as opposed to being unreadable
    /// or inconsistent with the engine it is replayed against.
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. }
                | Self::Corrupt { .. }
                | Self::UnknownOpcode { .. }
                | Self::MissingLastContract
                | Self::MissingCachedKey { .. }
        )
    }
}
