//! Replaying a trace against a stack of proxies around the reference engine.

use std::io::Read;

use ethereum_types::{Address, H256};
use serde::Serialize;
use state_trace::{
    proxy::{DeletedAccounts, DeletionTrackingStateDb, LoggingStateDb},
    MemoryStateDb, Mismatch, ReplayConfig, ReplayReport, ShadowStateDb, StateDb,
};
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    pub config: ReplayConfig,
    /// First snapshot identifier the engine hands out.
    pub snapshot_base: i32,
    pub shadow: Option<ShadowOptions>,
    /// Log every call under the `state_db` target.
    pub log_calls: bool,
    pub track_deletions: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ShadowOptions {
    pub snapshot_base: i32,
    pub compare_state_hash: bool,
}

#[derive(Debug, Serialize)]
pub struct Outcome {
    #[serde(flatten)]
    pub report: ReplayReport,
    /// [`None`] if the trace closed the engine.
    pub state_hash: Option<H256>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mismatches: Vec<Mismatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<Vec<Address>>,
    /// What the engine stack reported through [`StateDb::error`] at the end.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn replay(source: impl Read + Send, options: &ReplayOptions) -> anyhow::Result<Outcome> {
    let primary = MemoryStateDb::new().with_snapshot_base(options.snapshot_base);
    let mut mismatches = None;
    let mut engine: Box<dyn StateDb> = match &options.shadow {
        Some(shadow) => {
            let db = ShadowStateDb::new(
                primary,
                MemoryStateDb::new().with_snapshot_base(shadow.snapshot_base),
            )
            .compare_state_hash(shadow.compare_state_hash);
            mismatches = Some(db.mismatch_log());
            Box::new(db)
        }
        None => Box::new(primary),
    };
    let deleted = options.track_deletions.then(DeletedAccounts::default);
    if let Some(deleted) = &deleted {
        engine = Box::new(DeletionTrackingStateDb::new(
            engine,
            options.config.channel_capacity,
            deleted.sink(),
        )?);
    }
    if options.log_calls {
        engine = Box::new(LoggingStateDb::new(engine));
    }

    let report = state_trace::replay(source, &mut *engine, &options.config)?;
    info!(
        "replayed {} operations ({} bytes)",
        report.operations, report.bytes
    );
    let state_hash = match engine.get_hash() {
        Ok(hash) => Some(hash),
        Err(e) => {
            warn!("no final state hash: {e:#}");
            None
        }
    };
    let error = engine.error().map(|e| format!("{e:#}"));
    // drains the deletion tracker
    drop(engine);

    Ok(Outcome {
        report,
        state_hash,
        mismatches: mismatches.map(|it| it.to_vec()).unwrap_or_default(),
        deleted: deleted.map(|it| it.deleted()),
        error,
    })
}

#[cfg(test)]
mod tests {
    use state_trace::{BalanceChangeReason, RecordingStateDb};

    use super::*;

    fn trace() -> Vec<u8> {
        let a = Address::repeat_byte(0xa);
        let b = Address::repeat_byte(0xb);
        let mut db = RecordingStateDb::new(MemoryStateDb::new(), Vec::new());
        db.begin_sync_period(0).unwrap();
        db.begin_block(1).unwrap();
        db.begin_transaction(0).unwrap();
        db.create_account(a);
        db.create_account(b);
        db.add_balance(a, 5.into(), BalanceChangeReason::Transfer);
        let id = db.snapshot();
        db.set_state(a, H256::repeat_byte(1), H256::repeat_byte(2));
        db.revert_to_snapshot(id);
        db.self_destruct(b);
        db.end_transaction().unwrap();
        db.end_block().unwrap();
        db.end_sync_period().unwrap();
        db.finish().unwrap().1
    }

    #[test]
    fn full_stack() {
        let trace = trace();
        let options = ReplayOptions {
            config: ReplayConfig {
                profile: true,
                ..Default::default()
            },
            snapshot_base: 40,
            shadow: Some(ShadowOptions {
                snapshot_base: -3,
                compare_state_hash: true,
            }),
            log_calls: true,
            track_deletions: true,
        };
        let outcome = replay(&trace[..], &options).unwrap();
        assert_eq!(outcome.report.operations, 13);
        assert!(outcome.mismatches.is_empty());
        assert_eq!(outcome.error, None);
        assert_eq!(outcome.deleted, Some(vec![Address::repeat_byte(0xb)]));

        let plain = replay(&trace[..], &ReplayOptions::default()).unwrap();
        assert_eq!(plain.state_hash, outcome.state_hash);
        assert_eq!(plain.deleted, None);
        assert!(plain.report.profile.is_none());
    }

    #[test]
    fn closed_engines_have_no_hash() {
        let mut trace = trace();
        trace.push(state_trace::OpCode::Close as u8);
        let outcome = replay(&trace[..], &ReplayOptions::default()).unwrap();
        assert_eq!(outcome.state_hash, None);
        assert_eq!(outcome.report.operations, 14);
    }
}
