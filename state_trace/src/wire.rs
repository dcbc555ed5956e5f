//! Decoding of the trace wire format.
//!
//! A trace is a sequence of records, each an [`OpCode`] byte followed by a
//! payload whose layout is fixed by the opcode and the counts it carries.
//! There is no framing: a reader must parse a record to find the next one.
//!
//! Parsers run over [`Partial`] input, so running out of bytes
//! ([`ErrMode::Incomplete`](winnow::error::ErrMode::Incomplete)) is
//! distinguishable from a record that can never parse.
//!
//! Decoding is context-free: compact references are returned as-is, and only
//! resolved when the record is executed.

use ethereum_types::{Address, H256, U256};
use winnow::{
    binary::{le_i32, le_u16, le_u32, le_u64},
    combinator::{fail, repeat, trace},
    error::{ContextError, StrContext},
    token::{any, take},
    Parser as _, Partial,
};

use crate::{
    opcode::{Form, Kind, OpCode},
    operation::{Operation, SlotTarget, Target},
    state_db::{AccessListItem, BalanceChangeReason, Log},
};

pub type Input<'a> = Partial<&'a [u8]>;

/// A single place to swap out the error type if required.
pub type PResult<T> = winnow::PResult<T, ContextError>;

pub fn operation(input: &mut Input<'_>) -> PResult<Operation> {
    let op_code = any
        .verify_map(OpCode::from_repr)
        .context(StrContext::Label("opcode"))
        .parse_next(input)?;
    let (kind, form) = op_code.split();
    let name: &'static str = op_code.into();
    trace(name, move |input: &mut Input<'_>| payload(kind, form, input)).parse_next(input)
}

fn payload(kind: Kind, form: Form, input: &mut Input<'_>) -> PResult<Operation> {
    use Operation as O;
    Ok(match kind {
        Kind::CreateAccount => O::CreateAccount(target(form, input)?),
        Kind::Exist => O::Exist(target(form, input)?),
        Kind::Empty => O::Empty(target(form, input)?),
        Kind::SelfDestruct => O::SelfDestruct(target(form, input)?),
        Kind::HasSelfDestructed => O::HasSelfDestructed(target(form, input)?),
        Kind::GetBalance => O::GetBalance(target(form, input)?),
        Kind::AddBalance => {
            let target = target(form, input)?;
            let (amount, reason) = (u256, reason).parse_next(input)?;
            O::AddBalance {
                target,
                amount,
                reason,
            }
        }
        Kind::SubBalance => {
            let target = target(form, input)?;
            let (amount, reason) = (u256, reason).parse_next(input)?;
            O::SubBalance {
                target,
                amount,
                reason,
            }
        }
        Kind::GetNonce => O::GetNonce(target(form, input)?),
        Kind::SetNonce => O::SetNonce {
            target: target(form, input)?,
            nonce: le_u64(input)?,
        },
        Kind::GetCode => O::GetCode(target(form, input)?),
        Kind::GetCodeSize => O::GetCodeSize(target(form, input)?),
        Kind::GetCodeHash => O::GetCodeHash(target(form, input)?),
        Kind::SetCode => O::SetCode {
            target: target(form, input)?,
            code: bytes(input)?,
        },
        Kind::GetStorageRoot => O::GetStorageRoot(target(form, input)?),
        Kind::AddAddressToAccessList => O::AddAddressToAccessList(target(form, input)?),
        Kind::AddressInAccessList => O::AddressInAccessList(target(form, input)?),

        Kind::GetState => O::GetState(slot(form, input)?),
        Kind::GetCommittedState => O::GetCommittedState(slot(form, input)?),
        Kind::SetState => O::SetState {
            slot: slot(form, input)?,
            value: hash(input)?,
        },
        Kind::GetTransientState => O::GetTransientState(slot(form, input)?),
        Kind::SetTransientState => O::SetTransientState {
            slot: slot(form, input)?,
            value: hash(input)?,
        },
        Kind::AddSlotToAccessList => O::AddSlotToAccessList(slot(form, input)?),
        Kind::SlotInAccessList => O::SlotInAccessList(slot(form, input)?),

        Kind::BeginSyncPeriod => O::BeginSyncPeriod(le_u64(input)?),
        Kind::EndSyncPeriod => O::EndSyncPeriod,
        Kind::BeginBlock => O::BeginBlock(le_u64(input)?),
        Kind::EndBlock => O::EndBlock,
        Kind::BeginTransaction => O::BeginTransaction(le_u32(input)?),
        Kind::EndTransaction => O::EndTransaction,
        Kind::Snapshot => O::Snapshot(le_i32(input)?),
        Kind::RevertToSnapshot => O::RevertToSnapshot(le_i32(input)?),
        Kind::AddRefund => O::AddRefund(le_u64(input)?),
        Kind::SubRefund => O::SubRefund(le_u64(input)?),
        Kind::GetRefund => O::GetRefund,
        Kind::SetTxContext => O::SetTxContext {
            tx_hash: hash(input)?,
            index: le_u32(input)?,
        },
        Kind::PrepareAccessList => prepare_access_list(input)?,
        Kind::AddLog => O::AddLog(log(input)?),
        Kind::GetLogs => O::GetLogs {
            tx_hash: hash(input)?,
            block: le_u64(input)?,
            block_hash: hash(input)?,
        },
        Kind::AddPreimage => O::AddPreimage {
            hash: hash(input)?,
            preimage: bytes(input)?,
        },
        Kind::Finalise => O::Finalise {
            delete_empty: flag(input)?,
        },
        Kind::IntermediateRoot => O::IntermediateRoot {
            delete_empty: flag(input)?,
        },
        Kind::Commit => O::Commit {
            block: le_u64(input)?,
            delete_empty: flag(input)?,
        },
        Kind::GetHash => O::GetHash,
        Kind::Close => O::Close,
        Kind::StartBulkLoad | Kind::GetArchiveState | Kind::GetArchiveBlockHeight => {
            return fail
                .context(StrContext::Label("recordable operation"))
                .parse_next(input)
        }
    })
}

fn target(form: Form, input: &mut Input<'_>) -> PResult<Target> {
    match form {
        Form::Explicit => address.map(Target::Explicit).parse_next(input),
        Form::LastContract => Ok(Target::LastContract),
        Form::LastContractLastSlot | Form::LastContractCachedSlot => fail
            .context(StrContext::Label("contract reference"))
            .parse_next(input),
    }
}

fn slot(form: Form, input: &mut Input<'_>) -> PResult<SlotTarget> {
    match form {
        Form::Explicit => (address, hash)
            .map(|(address, key)| SlotTarget::Explicit(address, key))
            .parse_next(input),
        Form::LastContract => hash.map(SlotTarget::LastContract).parse_next(input),
        Form::LastContractLastSlot => Ok(SlotTarget::LastContractLastSlot),
        Form::LastContractCachedSlot => any
            .map(SlotTarget::LastContractCachedSlot)
            .parse_next(input),
    }
}

fn prepare_access_list(input: &mut Input<'_>) -> PResult<Operation> {
    let sender = address(input)?;
    let (present, destination) = (flag, address).parse_next(input)?;
    let n = le_u16(input)?;
    let precompiles = repeat(usize::from(n), address).parse_next(input)?;
    let m = le_u16(input)?;
    let access_list = repeat(usize::from(m), access_list_item).parse_next(input)?;
    Ok(Operation::PrepareAccessList {
        sender,
        destination: present.then_some(destination),
        precompiles,
        access_list,
    })
}

fn access_list_item(input: &mut Input<'_>) -> PResult<AccessListItem> {
    let address = address(input)?;
    let k = le_u16(input)?;
    let storage_keys = repeat(usize::from(k), hash).parse_next(input)?;
    Ok(AccessListItem {
        address,
        storage_keys,
    })
}

fn log(input: &mut Input<'_>) -> PResult<Log> {
    let address = address(input)?;
    let n = any(input)?;
    let topics = repeat(usize::from(n), hash).parse_next(input)?;
    let data = bytes(input)?;
    Ok(Log {
        address,
        topics,
        data,
    })
}

fn address(input: &mut Input<'_>) -> PResult<Address> {
    take(Address::len_bytes())
        .map(Address::from_slice)
        .parse_next(input)
}

fn hash(input: &mut Input<'_>) -> PResult<H256> {
    take(H256::len_bytes()).map(H256::from_slice).parse_next(input)
}

/// Little-endian, unlike [`hash`].
fn u256(input: &mut Input<'_>) -> PResult<U256> {
    take(32usize).map(U256::from_little_endian).parse_next(input)
}

fn reason(input: &mut Input<'_>) -> PResult<BalanceChangeReason> {
    any.verify_map(BalanceChangeReason::from_repr)
        .context(StrContext::Label("balance change reason"))
        .parse_next(input)
}

fn flag(input: &mut Input<'_>) -> PResult<bool> {
    any.verify_map(|it| match it {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    })
    .context(StrContext::Label("bool"))
    .parse_next(input)
}

fn bytes(input: &mut Input<'_>) -> PResult<Vec<u8>> {
    let len = le_u32(input)?;
    take(len as usize).map(<[u8]>::to_vec).parse_next(input)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use winnow::error::ErrMode;

    use super::*;
    use crate::{
        context::{DecodingContext, EncodingContext},
        state_db::BalanceChangeReason as Reason,
    };

    fn decode(bytes: &[u8]) -> PResult<Operation> {
        operation(&mut Partial::new(bytes))
    }

    fn round_trip(op: &Operation) {
        let mut buf = vec![];
        op.write(&mut buf).unwrap();
        let mut input = Partial::new(&buf[..]);
        assert_eq!(&operation(&mut input).unwrap(), op);
        assert!(input.is_empty(), "{op:?} left trailing bytes");
    }

    const A: Address = Address::repeat_byte(0xAA);
    const K: H256 = H256::repeat_byte(0x01);
    const V: H256 = H256::repeat_byte(0x02);

    /// One operation per opcode.
    fn every_opcode() -> Vec<Operation> {
        use Operation as O;
        let targets = [Target::Explicit(A), Target::LastContract];
        let slots = [
            SlotTarget::Explicit(A, K),
            SlotTarget::LastContract(K),
            SlotTarget::LastContractLastSlot,
            SlotTarget::LastContractCachedSlot(7),
        ];
        let amount = U256::from_dec_str("123456789012345678901234567890").unwrap();
        let mut ops = vec![];
        for t in targets {
            ops.extend([
                O::CreateAccount(t),
                O::Exist(t),
                O::Empty(t),
                O::SelfDestruct(t),
                O::HasSelfDestructed(t),
                O::GetBalance(t),
                O::AddBalance {
                    target: t,
                    amount,
                    reason: Reason::GasBuy,
                },
                O::SubBalance {
                    target: t,
                    amount: U256::MAX,
                    reason: Reason::BlobGas,
                },
                O::GetNonce(t),
                O::SetNonce {
                    target: t,
                    nonce: u64::MAX,
                },
                O::GetCode(t),
                O::GetCodeSize(t),
                O::GetCodeHash(t),
                O::SetCode {
                    target: t,
                    code: hex!("6080604052").to_vec(),
                },
                O::GetStorageRoot(t),
                O::AddAddressToAccessList(t),
                O::AddressInAccessList(t),
            ]);
        }
        for s in slots {
            ops.extend([
                O::GetState(s),
                O::GetCommittedState(s),
                O::SetState { slot: s, value: V },
                O::GetTransientState(s),
                O::SetTransientState { slot: s, value: V },
                O::AddSlotToAccessList(s),
                O::SlotInAccessList(s),
            ]);
        }
        ops.extend([
            O::BeginSyncPeriod(3),
            O::EndSyncPeriod,
            O::BeginBlock(19_000_000),
            O::EndBlock,
            O::BeginTransaction(42),
            O::EndTransaction,
            O::Snapshot(-1),
            O::RevertToSnapshot(i32::MAX),
            O::AddRefund(4800),
            O::SubRefund(2400),
            O::GetRefund,
            O::SetTxContext {
                tx_hash: V,
                index: 5,
            },
            O::PrepareAccessList {
                sender: A,
                destination: Some(Address::repeat_byte(0xBB)),
                precompiles: vec![Address::from_low_u64_be(1), Address::from_low_u64_be(2)],
                access_list: vec![
                    AccessListItem {
                        address: A,
                        storage_keys: vec![K, V],
                    },
                    AccessListItem::default(),
                ],
            },
            O::AddLog(Log {
                address: A,
                topics: vec![K, V, K],
                data: b"transfer".to_vec(),
            }),
            O::GetLogs {
                tx_hash: V,
                block: 17,
                block_hash: K,
            },
            O::AddPreimage {
                hash: K,
                preimage: vec![0; 100],
            },
            O::Finalise { delete_empty: true },
            O::IntermediateRoot {
                delete_empty: false,
            },
            O::Commit {
                block: 9,
                delete_empty: true,
            },
            O::GetHash,
            O::Close,
        ]);
        ops
    }

    #[test]
    fn every_opcode_round_trips() {
        use strum::IntoEnumIterator as _;
        let ops = every_opcode();
        let mut seen = ops.iter().map(Operation::op_code).collect::<Vec<_>>();
        seen.sort();
        seen.dedup();
        assert_eq!(seen, OpCode::iter().collect::<Vec<_>>());
        for op in &ops {
            round_trip(op);
        }
    }

    #[test]
    fn absent_destination_and_empty_lists() {
        round_trip(&Operation::PrepareAccessList {
            sender: A,
            destination: None,
            precompiles: vec![],
            access_list: vec![],
        });
        round_trip(&Operation::AddLog(Log::default()));
        round_trip(&Operation::SetCode {
            target: Target::Explicit(A),
            code: vec![],
        });
    }

    #[test]
    fn every_prefix_is_incomplete() {
        for op in every_opcode() {
            let mut buf = vec![];
            op.write(&mut buf).unwrap();
            for len in 0..buf.len() {
                assert!(
                    matches!(decode(&buf[..len]), Err(ErrMode::Incomplete(_))),
                    "{op:?} cut at {len}"
                );
            }
        }
    }

    #[test]
    fn unknown_opcode() {
        assert!(matches!(decode(&[0x22]), Err(ErrMode::Backtrack(_))));
        assert!(matches!(decode(&[0xFF, 0, 0]), Err(ErrMode::Backtrack(_))));
    }

    #[test]
    fn bad_bool() {
        let mut buf = vec![];
        Operation::Finalise { delete_empty: true }
            .write(&mut buf)
            .unwrap();
        buf[1] = 2;
        assert!(matches!(decode(&buf), Err(ErrMode::Backtrack(_))));
    }

    #[test]
    fn bad_reason() {
        let mut buf = vec![OpCode::AddBalanceLc as u8];
        buf.extend([0; 32]);
        buf.push(200);
        assert!(matches!(decode(&buf), Err(ErrMode::Backtrack(_))));
    }

    /// Record a storage access pattern through an [`EncodingContext`], and
    /// read it back through a [`DecodingContext`].
    #[test]
    fn compact_forms_round_trip() {
        let b = Address::repeat_byte(0xBB);
        let x = H256::from_low_u64_be(1);
        let y = H256::from_low_u64_be(2);
        let accesses = [(A, x), (A, x), (A, y), (A, x), (b, y), (b, x), (A, x)];

        let mut enc = EncodingContext::default();
        let mut buf = vec![];
        for (address, key) in accesses {
            Operation::GetState(enc.encode_slot(address, key))
                .write(&mut buf)
                .unwrap();
        }

        let mut dec = DecodingContext::default();
        let mut input = Partial::new(&buf[..]);
        let mut op_codes = vec![];
        for expected in accesses {
            let Operation::GetState(slot) = operation(&mut input).unwrap() else {
                panic!("decoded a different kind")
            };
            op_codes.push(OpCode::from_parts(Kind::GetState, slot.form()).unwrap());
            assert_eq!(dec.resolve_slot(slot).unwrap(), expected);
        }
        assert_eq!(
            op_codes,
            [
                OpCode::GetState,
                OpCode::GetStateLcls,
                OpCode::GetStateLc,
                OpCode::GetStateLccs,
                OpCode::GetState,
                OpCode::GetStateLccs,
                OpCode::GetState,
            ]
        );
        assert_eq!(buf.len(), 53 + 1 + 33 + 2 + 53 + 2 + 53);
    }
}
