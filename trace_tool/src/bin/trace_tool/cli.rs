use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint};
use state_trace::{context::KeyCache, ReplayConfig};
use ::trace_tool::session::{ReplayOptions, ShadowOptions};

const REPLAY_HELP_HEADING: &str = "Replay options";
const SHADOW_HELP_HEADING: &str = "Shadow options";

/// Replay and inspect state database traces.
#[derive(Parser)]
#[command(version, propagate_version = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Replays a trace against the in-memory engine and prints a JSON report.
    Replay {
        /// The trace to replay.
        #[arg(env = "STATE_TRACE_FILE", value_hint = ValueHint::FilePath)]
        trace: PathBuf,
        #[clap(flatten)]
        replay: ReplayArgs,
        #[clap(flatten)]
        shadow: ShadowArgs,
    },
    /// Prints per-opcode and per-form record counts as JSON.
    Stats {
        #[arg(env = "STATE_TRACE_FILE", value_hint = ValueHint::FilePath)]
        trace: PathBuf,
    },
    /// Prints one line per record.
    Dump {
        #[arg(env = "STATE_TRACE_FILE", value_hint = ValueHint::FilePath)]
        trace: PathBuf,
        /// Stop after this many records.
        #[arg(short = 'n', long)]
        limit: Option<u64>,
    },
}

#[derive(Args)]
pub(crate) struct ReplayArgs {
    /// Decoded records buffered ahead of execution.
    #[arg(long, help_heading = REPLAY_HELP_HEADING, env = "STATE_TRACE_CHANNEL_CAPACITY", default_value_t = 1024)]
    channel_capacity: usize,
    /// Must match the capacity the trace was recorded with.
    #[arg(long, help_heading = REPLAY_HELP_HEADING, env = "STATE_TRACE_KEY_CACHE_CAPACITY", default_value_t = KeyCache::DEFAULT_CAPACITY)]
    key_cache_capacity: usize,
    /// Log lifecycle operations that do not nest, instead of failing.
    #[arg(long, help_heading = REPLAY_HELP_HEADING, env = "STATE_TRACE_LENIENT_SCOPES")]
    lenient_scopes: bool,
    /// Include per-operation latencies in the report.
    #[arg(long, help_heading = REPLAY_HELP_HEADING, env = "STATE_TRACE_PROFILE")]
    profile: bool,
    /// First snapshot identifier the engine hands out.
    #[arg(long, help_heading = REPLAY_HELP_HEADING, allow_hyphen_values = true, default_value_t = 0)]
    snapshot_base: i32,
    /// Log every call under the `state_db` target. Enable it with
    /// `RUST_LOG=state_db=debug`.
    #[arg(long, help_heading = REPLAY_HELP_HEADING, env = "STATE_TRACE_LOG_CALLS")]
    log_calls: bool,
    /// Report contracts that were self-destructed.
    #[arg(long, help_heading = REPLAY_HELP_HEADING)]
    track_deletions: bool,
}

#[derive(Args)]
pub(crate) struct ShadowArgs {
    /// Run a second in-memory engine in lockstep and report disagreements.
    #[arg(long, help_heading = SHADOW_HELP_HEADING, env = "STATE_TRACE_SHADOW")]
    shadow: bool,
    /// First snapshot identifier the shadow engine hands out.
    #[arg(long, help_heading = SHADOW_HELP_HEADING, allow_hyphen_values = true, default_value_t = 1000)]
    shadow_snapshot_base: i32,
    /// Also compare state and storage roots.
    #[arg(long, help_heading = SHADOW_HELP_HEADING, env = "STATE_TRACE_COMPARE_STATE_HASH")]
    compare_state_hash: bool,
}

impl ReplayArgs {
    pub(crate) fn into_options(self, shadow: ShadowArgs) -> ReplayOptions {
        let Self {
            channel_capacity,
            key_cache_capacity,
            lenient_scopes,
            profile,
            snapshot_base,
            log_calls,
            track_deletions,
        } = self;
        ReplayOptions {
            config: ReplayConfig {
                channel_capacity,
                enforce_scopes: !lenient_scopes,
                profile,
                key_cache_capacity,
            },
            snapshot_base,
            shadow: shadow.shadow.then_some(ShadowOptions {
                snapshot_base: shadow.shadow_snapshot_base,
                compare_state_hash: shadow.compare_state_hash,
            }),
            log_calls,
            track_deletions,
        }
    }
}
