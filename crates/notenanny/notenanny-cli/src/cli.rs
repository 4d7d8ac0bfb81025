use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use notenanny_core::{PassPacer, Scanner, SleepPacer};
use notenanny_process::{CancellationToken, ProcessExecutor, install_interrupt_handler};
use tracing::{info, warn};

use crate::logging;
use crate::settings::{Settings, StoreKind};
use crate::store;
use crate::watch::WatchPacer;

/// Watches notes for code fences, runs them and writes the output back.
#[derive(Debug, Parser)]
#[command(name = "notenanny", version, about)]
pub struct Cli {
    /// Settings file [default: <config dir>/notenanny/config.toml]
    #[arg(long, env = "NOTENANNY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Where notes are read from
    #[arg(long, value_enum, env = "NOTENANNY_STORE")]
    pub store: Option<StoreKind>,

    /// Bear database file
    #[arg(long, env = "NOTENANNY_BEAR_DB")]
    pub bear_db: Option<PathBuf>,

    /// Directory of markdown notes
    #[arg(long, env = "NOTENANNY_DIR")]
    pub dir: Option<PathBuf>,

    /// Longest pause between two scans
    #[arg(long, env = "NOTENANNY_INTERVAL_MS")]
    pub interval_ms: Option<u64>,

    /// Kill a script after this many seconds
    #[arg(long, env = "NOTENANNY_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Scan once and exit
    #[arg(long)]
    pub once: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Less logging (-q warn, -qq error)
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "verbose")]
    pub quiet: u8,
}

pub fn run_from_env() -> Result<()> {
    run(Cli::parse())
}

pub fn run_with_args<I, S>(args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: Into<std::ffi::OsString> + Clone,
{
    let cli = Cli::try_parse_from(args).context("parse command line")?;
    run(cli)
}

pub fn run(cli: Cli) -> Result<()> {
    logging::init(cli.verbose, cli.quiet)?;
    let mut settings = Settings::load(cli.config.as_deref())?;
    settings.apply_cli(&cli);
    settings.validate()?;
    let store_path = settings.store_path()?;

    let token = CancellationToken::new();
    install_interrupt_handler(&token)?;
    let executor = ProcessExecutor::new(token.clone())
        .with_timeout(settings.exec_timeout())
        .with_kill_grace(settings.kill_grace());

    let opened = store::open(settings.store.kind, &store_path, &executor)
        .with_context(|| format!("open {} store at {}", settings.store.kind, store_path.display()))?;
    info!(
        store = %settings.store.kind,
        path = %store_path.display(),
        "watching notes"
    );

    let mut scanner = Scanner::new(
        opened.store,
        opened.writeback,
        Box::new(executor),
        settings.trigger_config(),
        token,
    )
    .with_cursor(opened.cursor)
    .with_temp_dir(settings.temp_dir.clone());

    if cli.once {
        let report = scanner.run_pass()?;
        info!(?report, "single pass finished");
        return Ok(());
    }

    let mut pacer: Box<dyn PassPacer> =
        match WatchPacer::new(&opened.watch_root, opened.recursive, settings.poll_interval()) {
            Ok(pacer) => Box::new(pacer),
            Err(err) => {
                warn!("file watching unavailable, polling instead: {err:#}");
                Box::new(SleepPacer::new(settings.poll_interval()))
            }
        };
    scanner.run(pacer.as_mut(), settings.store_retries)
}
