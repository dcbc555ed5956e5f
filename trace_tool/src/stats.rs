use std::{collections::BTreeMap, io::Read};

use anyhow::Context as _;
use serde::Serialize;
use state_trace::{opcode::Class, Record, TraceReader};

/// How a trace is made up.
#[derive(Debug, Default, Serialize)]
pub struct TraceStats {
    pub records: u64,
    pub bytes: u64,
    /// Records per opcode.
    pub opcodes: BTreeMap<&'static str, u64>,
    /// Account and storage records per addressing form.
    pub forms: BTreeMap<String, u64>,
}

pub fn stats(source: impl Read) -> anyhow::Result<TraceStats> {
    let mut reader = TraceReader::new(source);
    let mut stats = TraceStats::default();
    while let Some(Record { operation, .. }) = reader
        .read_record()
        .with_context(|| format!("failed to decode record #{}", reader.position()))?
    {
        *stats
            .opcodes
            .entry(operation.op_code().into())
            .or_default() += 1;
        if operation.kind().class() != Class::Plain {
            *stats.forms.entry(operation.form().to_string()).or_default() += 1;
        }
    }
    stats.records = reader.position();
    stats.bytes = reader.offset();
    Ok(stats)
}
