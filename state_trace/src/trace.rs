//! Sequential trace files.

use std::io::{self, Read, Write};

use log::trace;
use winnow::{error::ErrMode, stream::Stream as _, Partial};

use crate::{error::TraceError, opcode::OpCode, operation::Operation, wire};

/// Serialises [`Operation`]s to a byte sink.
///
/// The writer does not buffer: wrap file sinks in a [`std::io::BufWriter`].
#[derive(Debug)]
pub struct TraceWriter<W> {
    sink: W,
    scratch: Vec<u8>,
    records: u64,
    bytes: u64,
}

impl<W: Write> TraceWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            scratch: Vec::with_capacity(128),
            records: 0,
            bytes: 0,
        }
    }

    pub fn write(&mut self, operation: &Operation) -> Result<(), TraceError> {
        self.scratch.clear();
        operation.write(&mut self.scratch)?;
        self.sink.write_all(&self.scratch)?;
        self.records += 1;
        self.bytes += self.scratch.len() as u64;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }

    /// Records written so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Bytes written so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

/// A decoded operation and where it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Zero-based index of the record in the trace.
    pub position: u64,
    /// Byte offset of the record's opcode.
    pub offset: u64,
    pub operation: Operation,
}

const CHUNK: usize = 64 * 1024;

/// Decodes [`Operation`]s from a byte source, one at a time.
///
/// After the first error the reader is exhausted.
#[derive(Debug)]
pub struct TraceReader<R> {
    source: R,
    buf: Vec<u8>,
    /// Start of the unconsumed part of `buf`.
    start: usize,
    offset: u64,
    position: u64,
    eof: bool,
    done: bool,
}

impl<R: Read> TraceReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            buf: Vec::new(),
            start: 0,
            offset: 0,
            position: 0,
            eof: false,
            done: false,
        }
    }

    /// Bytes consumed by complete records so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Complete records read so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns [`None`] when the source ends cleanly on a record boundary.
    pub fn read_record(&mut self) -> Result<Option<Record>, TraceError> {
        if self.done {
            return Ok(None);
        }
        let res = self.decode();
        if !matches!(res, Ok(Some(_))) {
            self.done = true;
        }
        res
    }

    fn decode(&mut self) -> Result<Option<Record>, TraceError> {
        loop {
            let pending = &self.buf[self.start..];
            let mut input = Partial::new(pending);
            let res = wire::operation(&mut input);
            let consumed = pending.len() - input.eof_offset();
            match res {
                Ok(operation) => {
                    let record = Record {
                        position: self.position,
                        offset: self.offset,
                        operation,
                    };
                    trace!(
                        "record #{} at byte {}: {:?}",
                        record.position,
                        record.offset,
                        record.operation
                    );
                    self.start += consumed;
                    self.offset += consumed as u64;
                    self.position += 1;
                    return Ok(Some(record));
                }
                Err(ErrMode::Incomplete(_)) => match self.eof {
                    true if self.start == self.buf.len() => return Ok(None),
                    true => {
                        return Err(TraceError::Truncated {
                            offset: self.offset,
                        })
                    }
                    false => self.fill()?,
                },
                Err(ErrMode::Backtrack(e) | ErrMode::Cut(e)) => {
                    let byte = self.buf[self.start];
                    return Err(match OpCode::from_repr(byte) {
                        None => TraceError::UnknownOpcode {
                            offset: self.offset,
                            byte,
                        },
                        Some(_) => TraceError::Corrupt {
                            offset: self.offset,
                            reason: e.to_string(),
                        },
                    });
                }
            }
        }
    }

    fn fill(&mut self) -> Result<(), TraceError> {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
        let filled = self.buf.len();
        self.buf.resize(filled + CHUNK, 0);
        let read = loop {
            match self.source.read(&mut self.buf[filled..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buf.truncate(filled);
                    return Err(e.into());
                }
            }
        };
        self.buf.truncate(filled + read);
        self.eof = read == 0;
        Ok(())
    }
}

impl<R: Read> Iterator for TraceReader<R> {
    type Item = Result<Operation, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record()
            .transpose()
            .map(|res| res.map(|record| record.operation))
    }
}

#[cfg(test)]
mod tests {
    use ethereum_types::{Address, H256};

    use super::*;
    use crate::operation::{SlotTarget, Target};

    /// A source that hands out at most one byte per read.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match (self.0.split_first(), buf.first_mut()) {
                (Some((head, tail)), Some(slot)) => {
                    *slot = *head;
                    self.0 = tail;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }
    }

    fn sample() -> Vec<Operation> {
        let a = Address::repeat_byte(3);
        vec![
            Operation::BeginBlock(1),
            Operation::SetCode {
                target: Target::Explicit(a),
                code: vec![0xFE; 300],
            },
            Operation::GetCodeSize(Target::LastContract),
            Operation::SetState {
                slot: SlotTarget::LastContract(H256::repeat_byte(1)),
                value: H256::repeat_byte(2),
            },
            Operation::EndBlock,
        ]
    }

    fn encode(ops: &[Operation]) -> Vec<u8> {
        let mut writer = TraceWriter::new(vec![]);
        for op in ops {
            writer.write(op).unwrap();
        }
        assert_eq!(writer.records(), ops.len() as u64);
        assert_eq!(writer.bytes(), writer.get_ref().len() as u64);
        writer.into_inner()
    }

    #[test]
    fn reads_back_what_was_written() {
        let ops = sample();
        let bytes = encode(&ops);
        let read = TraceReader::new(&bytes[..])
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(read, ops);
    }

    #[test]
    fn tolerates_short_reads() {
        let ops = sample();
        let bytes = encode(&ops);
        let mut reader = TraceReader::new(Trickle(&bytes));
        for (ix, op) in ops.iter().enumerate() {
            let record = reader.read_record().unwrap().unwrap();
            assert_eq!(record.position, ix as u64);
            assert_eq!(&record.operation, op);
        }
        assert!(reader.read_record().unwrap().is_none());
        assert_eq!(reader.offset(), bytes.len() as u64);
    }

    #[test]
    fn truncated() {
        let ops = sample();
        let bytes = encode(&ops);
        let last = bytes.len() - 1;
        // cut inside the SetState record
        let cut = last - 40;
        let mut reader = TraceReader::new(&bytes[..cut]);
        for _ in 0..3 {
            reader.read_record().unwrap().unwrap();
        }
        let start_of_set_state = reader.offset();
        match reader.read_record() {
            Err(TraceError::Truncated { offset }) => assert_eq!(offset, start_of_set_state),
            other => panic!("expected truncation, got {other:?}"),
        }
        assert!(reader.next().is_none(), "reader is fused after an error");
    }

    #[test]
    fn unknown_opcode_is_reported_with_offset() {
        let mut bytes = encode(&[Operation::GetRefund, Operation::EndBlock]);
        bytes.push(0xEE);
        let mut reader = TraceReader::new(&bytes[..]);
        reader.read_record().unwrap();
        reader.read_record().unwrap();
        assert!(matches!(
            reader.read_record(),
            Err(TraceError::UnknownOpcode {
                offset: 2,
                byte: 0xEE
            })
        ));
    }

    #[test]
    fn corrupt_payload() {
        let mut bytes = encode(&[Operation::Commit {
            block: 1,
            delete_empty: false,
        }]);
        *bytes.last_mut().unwrap() = 7;
        assert!(matches!(
            TraceReader::new(&bytes[..]).next(),
            Some(Err(TraceError::Corrupt { offset: 0, .. }))
        ));
    }

    #[test]
    fn empty_trace() {
        assert!(TraceReader::new(io::empty()).next().is_none());
    }
}
