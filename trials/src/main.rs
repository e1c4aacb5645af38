//! run-trials - run a series of chained closed-loop trials
//!
//! Each trial gets its own directory under the runs root:
//! - Linux: ~/.local/share/cloop/runs/
//! - Windows: %APPDATA%\cloop\runs\
//! - MacOS: ~/Library/Application Support/cloop/runs/
//!
//! Exit status: 0 on success, 1 if a trial fails, 130 on Ctrl-C.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cloop::config::LoopConfig;
use cloop::trial_id::TrialId;
use cloop_trials::paths::AppPaths;
use cloop_trials::{ChainError, ChainReport, TrialChain, TrialRunner};

/// Run a series of chained simulations.
#[derive(Parser, Debug)]
#[command(name = "run-trials", version, long_about = None)]
struct Args {
    /// The number of trials to run sequentially
    num_trials: usize,

    /// Starting parent: a trial id or a path to its run directory. If not
    /// provided, starts a fresh chain
    #[arg(long)]
    parent_id: Option<String>,

    /// Label appended to every trial id
    #[arg(long, default_value = "")]
    label: String,

    /// JSON run configuration (defaults to <data dir>/config.json if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding one subdirectory per trial
    #[arg(long)]
    runs_dir: Option<PathBuf>,
}

async fn run(args: Args, cancel: CancellationToken) -> Result<ChainReport, ChainError> {
    let app = AppPaths::new().map_err(ChainError::Setup)?;
    let runs_dir = args.runs_dir.unwrap_or_else(|| app.runs_dir());

    let config = match args.config {
        Some(path) => LoopConfig::load(&path)?,
        None if app.config_file().is_file() => LoopConfig::load(&app.config_file())?,
        None => LoopConfig::default(),
    };
    let parent = args.parent_id.as_deref().and_then(TrialId::extract);

    info!("Runs directory: {}", runs_dir.display());
    if let Some(parent) = &parent {
        info!("Continuing from parent run: {parent}");
    }

    let runner = TrialRunner::new(runs_dir, config).with_cancellation(cancel);
    TrialChain::new(runner, args.label).run(args.num_trials, parent).await
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    // Ctrl-C stops the current trial; its partial artifacts are discarded.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C: interrupting trial series");
                cancel.cancel();
            }
        });
    }

    let code = match run(args, cancel).await {
        Ok(report) => {
            for id in &report.trials {
                info!("completed {id}");
            }
            0
        }
        Err(e) => {
            error!("{e}");
            e.exit_code()
        }
    };
    process::exit(code);
}
