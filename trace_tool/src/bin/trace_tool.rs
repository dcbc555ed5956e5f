use std::{fs::File, io, path::Path};

use anyhow::{bail, Context as _, Result};
use clap::Parser;
use dotenvy::dotenv;
use tracing::info;

use self::trace_tool::*;
mod trace_tool {
    pub mod cli;
}

fn open(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("couldn't open trace {}", path.display()))
}

// Not async: the replay pipeline blocks on its channels.
fn main() -> Result<()> {
    dotenv().ok();
    ::trace_tool::tracing::init();

    let args = cli::Cli::parse();
    match args.command {
        cli::Command::Replay {
            trace,
            replay,
            shadow,
        } => {
            let options = replay.into_options(shadow);
            let outcome = ::trace_tool::session::replay(open(&trace)?, &options)?;
            serde_json::to_writer_pretty(io::stdout().lock(), &outcome)?;
            println!();
            if let Some(error) = outcome.error {
                bail!("replay finished with errors: {error}")
            }
        }
        cli::Command::Stats { trace } => {
            let stats = ::trace_tool::stats::stats(open(&trace)?)?;
            serde_json::to_writer_pretty(io::stdout().lock(), &stats)?;
            println!();
        }
        cli::Command::Dump { trace, limit } => {
            let printed =
                ::trace_tool::dump::dump(open(&trace)?, &mut io::stdout().lock(), limit)?;
            info!("printed {printed} records");
        }
    }
    Ok(())
}
