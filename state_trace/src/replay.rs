//! Re-issuing a recorded trace against an engine.
//!
//! A reader thread decodes the trace into a bounded channel, and the calling
//! thread executes records in the order they were recorded. Decode errors go
//! through the channel like records do, so everything before a damaged record
//! is still applied.
//!
//! The channel is a [`tokio::sync::mpsc`] channel used in blocking mode, so
//! [`replay`] must not be called from within an async runtime.

use std::{io::Read, thread};

use anyhow::{anyhow, Context as _};
use log::{debug, warn};
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};

use crate::{
    context::{KeyCache, ReplayContext},
    error::{Scope, TraceError},
    opcode::Kind,
    proxy::Profile,
    state_db::StateDb,
    trace::{Record, TraceReader},
};

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Decoded records buffered ahead of execution. Clamped to
    /// `1..=`[`Semaphore::MAX_PERMITS`].
    pub channel_capacity: usize,
    /// Fail on lifecycle operations that do not nest. When off, violations
    /// are logged and the operation is still issued.
    pub enforce_scopes: bool,
    /// Collect per-kind latency of the replayed calls.
    pub profile: bool,
    /// Must match the capacity the trace was recorded with.
    pub key_cache_capacity: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            enforce_scopes: true,
            profile: false,
            key_cache_capacity: KeyCache::DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayReport {
    /// Records executed.
    pub operations: u64,
    /// Trace bytes consumed.
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
    /// Scopes still open when the trace ended, outermost first.
    pub open_scopes: Vec<Scope>,
}

/// Checks that lifecycle operations nest as
/// `Idle → SyncPeriod → Block → Transaction`.
#[derive(Debug, Clone, Default)]
pub struct ScopeTracker {
    open: Vec<Scope>,
}

impl ScopeTracker {
    pub fn current(&self) -> Scope {
        self.open.last().copied().unwrap_or_default()
    }

    /// Outermost first.
    pub fn open_scopes(&self) -> &[Scope] {
        &self.open
    }

    /// Advance past an operation of `kind`. A violation leaves the tracker
    /// unchanged.
    pub fn apply(&mut self, kind: Kind) -> Result<(), TraceError> {
        let (expected, enters) = match kind {
            Kind::BeginSyncPeriod => (Scope::Idle, Some(Scope::SyncPeriod)),
            Kind::EndSyncPeriod => (Scope::SyncPeriod, None),
            Kind::BeginBlock => (Scope::SyncPeriod, Some(Scope::Block)),
            Kind::EndBlock => (Scope::Block, None),
            Kind::BeginTransaction => (Scope::Block, Some(Scope::Transaction)),
            Kind::EndTransaction => (Scope::Transaction, None),
            _ => return Ok(()),
        };
        let scope = self.current();
        if scope != expected {
            return Err(TraceError::ScopeViolation { kind, scope });
        }
        match enters {
            Some(inner) => self.open.push(inner),
            None => {
                self.open.pop();
            }
        }
        Ok(())
    }
}

type Item = Result<Record, TraceError>;

/// Larger capacities make [`mpsc::channel`] panic.
pub(crate) fn channel_capacity(requested: usize) -> usize {
    requested.clamp(1, Semaphore::MAX_PERMITS)
}

/// Decode `source` and execute every record against `db`, in order.
///
/// Stops at the first decode, scope or engine error. The error carries the
/// failing record's position, byte offset and opcode.
pub fn replay<R, S>(source: R, db: &mut S, config: &ReplayConfig) -> anyhow::Result<ReplayReport>
where
    R: Read + Send,
    S: StateDb + ?Sized,
{
    thread::scope(|scope| {
        let (tx, mut rx) = mpsc::channel(channel_capacity(config.channel_capacity));
        let reader = thread::Builder::new()
            .name("trace-reader".into())
            .spawn_scoped(scope, move || produce(TraceReader::new(source), tx))
            .context("failed to spawn trace reader")?;

        let res = consume(&mut rx, db, config);
        // unblocks the reader if we stopped early
        drop(rx);
        let bytes = reader
            .join()
            .map_err(|_| anyhow!("trace reader panicked"))?;

        let mut report = res?;
        report.bytes = bytes;
        debug!(
            "replayed {} operations, {} bytes",
            report.operations, report.bytes
        );
        if !report.open_scopes.is_empty() {
            warn!(
                "trace ended with open scopes: {}",
                itertools::join(&report.open_scopes, " > ")
            );
        }
        Ok(report)
    })
}

/// Returns the bytes consumed by complete records.
fn produce<R: Read>(mut reader: TraceReader<R>, tx: mpsc::Sender<Item>) -> u64 {
    loop {
        let item = match reader.read_record() {
            Ok(Some(record)) => Ok(record),
            Ok(None) => break,
            Err(e) => Err(e),
        };
        let last = item.is_err();
        if tx.blocking_send(item).is_err() || last {
            break;
        }
    }
    reader.offset()
}

fn consume<S: StateDb + ?Sized>(
    rx: &mut mpsc::Receiver<Item>,
    db: &mut S,
    config: &ReplayConfig,
) -> anyhow::Result<ReplayReport> {
    let mut ctx = ReplayContext::new(config.key_cache_capacity);
    let mut scopes = ScopeTracker::default();
    let mut profile = config.profile.then(Profile::default);
    let mut operations = 0;

    while let Some(item) = rx.blocking_recv() {
        let Record {
            position,
            offset,
            operation,
        } = item.with_context(|| format!("failed to decode record #{operations}"))?;
        let kind = operation.kind();
        let at = || format!("record #{position} at byte {offset} ({})", operation.op_code());

        if let Err(e) = scopes.apply(kind) {
            match config.enforce_scopes {
                true => return Err(anyhow::Error::new(e).context(at())),
                false => warn!("{}: {e}", at()),
            }
        }
        let elapsed = operation.execute(db, &mut ctx).with_context(at)?;
        if let Some(profile) = &mut profile {
            profile.record(kind, elapsed);
        }
        operations += 1;
    }

    Ok(ReplayReport {
        operations,
        bytes: 0,
        profile,
        open_scopes: scopes.open_scopes().to_vec(),
    })
}
