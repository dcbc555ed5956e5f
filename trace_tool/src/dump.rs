use std::io::{Read, Write};

use anyhow::Context as _;
use state_trace::{Record, TraceReader};

/// Print one line per record: position, byte offset, opcode and operation.
///
/// Stops after `limit` records, if given. Returns how many were printed.
pub fn dump(source: impl Read, out: &mut impl Write, limit: Option<u64>) -> anyhow::Result<u64> {
    let mut reader = TraceReader::new(source);
    let mut printed = 0;
    while limit.map_or(true, |limit| printed < limit) {
        let Some(Record {
            position,
            offset,
            operation,
        }) = reader
            .read_record()
            .with_context(|| format!("failed to decode record #{}", reader.position()))?
        else {
            break;
        };
        let op_code: &str = operation.op_code().into();
        writeln!(out, "{position:>8} {offset:>10} {op_code:<26} {operation:?}")?;
        printed += 1;
    }
    Ok(printed)
}

#[cfg(test)]
mod tests {
    use state_trace::{Operation, TraceWriter};

    use super::*;

    #[test]
    fn one_line_per_record() {
        let mut writer = TraceWriter::new(Vec::new());
        for op in [
            Operation::BeginSyncPeriod(3),
            Operation::Snapshot(-1),
            Operation::EndSyncPeriod,
        ] {
            writer.write(&op).unwrap();
        }
        let trace = writer.into_inner();

        let mut out = Vec::new();
        assert_eq!(dump(&trace[..], &mut out, None).unwrap(), 3);
        let out = String::from_utf8(out).unwrap();
        let lines = out.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("       1          9 Snapshot "));
        assert!(lines[1].ends_with("Snapshot(-1)"));

        let mut out = Vec::new();
        assert_eq!(dump(&trace[..], &mut out, Some(2)).unwrap(), 2);
    }
}
