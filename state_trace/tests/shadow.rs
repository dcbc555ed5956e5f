//! Shadowing an engine with a copy of itself must be invisible; shadowing it
//! with a divergent one must not.

mod common;

use std::collections::BTreeMap;

use assert2::check;
use common::{contract, workload};
use ethereum_types::U256;
use state_trace::{
    proxy::{Profile, ProfilingStateDb},
    replay, BalanceChangeReason, Kind, MemoryStateDb, RecordingStateDb, ReplayConfig,
    ShadowStateDb, StateDb as _,
};

fn counts(profile: &Profile) -> BTreeMap<Kind, u64> {
    profile.iter().map(|(kind, it)| (kind, it.count)).collect()
}

#[test]
fn identical_engines_never_disagree() {
    let mut db = ProfilingStateDb::new(
        ShadowStateDb::new(
            ProfilingStateDb::new(MemoryStateDb::new()),
            ProfilingStateDb::new(MemoryStateDb::new().with_snapshot_base(-300)),
        )
        .compare_state_hash(true),
    );
    let hash = workload(&mut db, 11).unwrap();
    check!(hash == workload(&mut MemoryStateDb::new(), 11).unwrap());
    check!(db.error().is_none());

    let (shadow, outer) = db.into_parts();
    check!(shadow.mismatches().is_empty());
    let (primary, shadow) = shadow.into_parts();
    // every call reached each side exactly once
    check!(counts(primary.profile()) == counts(&outer));
    check!(counts(shadow.profile()) == counts(&outer));
}

#[test]
fn divergent_balance_is_reported_once() {
    let a = contract(0);
    let mut primary = MemoryStateDb::new();
    let mut shadow = MemoryStateDb::new();
    primary.add_balance(a, 100.into(), BalanceChangeReason::Transfer);
    shadow.add_balance(a, 101.into(), BalanceChangeReason::Transfer);

    let mut db = ShadowStateDb::new(primary, shadow);
    check!(db.get_balance(a) == U256::from(100));
    let mismatches = db.mismatches();
    check!(mismatches.len() == 1);
    check!(mismatches[0].kind == Kind::GetBalance);
    check!(mismatches[0].primary == "100");
    check!(mismatches[0].shadow == "101");
    check!(db.error().is_some());
}

#[test]
fn a_recorded_shadow_session_replays() {
    let recorded = RecordingStateDb::new(MemoryStateDb::new(), Vec::new());
    let mut db = ShadowStateDb::new(recorded, MemoryStateDb::new().with_snapshot_base(9));
    let expected = workload(&mut db, 4).unwrap();
    check!(db.mismatches().is_empty());

    let (recorded, _) = db.into_parts();
    let (_, trace) = recorded.finish().unwrap();
    let mut replayed = MemoryStateDb::new().with_snapshot_base(77);
    replay(&trace[..], &mut replayed, &ReplayConfig::default()).unwrap();
    check!(replayed.get_hash().unwrap() == expected);
}
