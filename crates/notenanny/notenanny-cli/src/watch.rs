use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use notenanny_core::PassPacer;
use notenanny_process::CancellationToken;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{trace, warn};

const WATCH_DEBOUNCE_WINDOW: Duration = Duration::from_millis(120);
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(75);

/// Waits out the poll interval, returning early once something under the
/// watched root changes. The scanner still applies its watermark, so a
/// spurious wake-up only costs one empty query.
pub struct WatchPacer {
    // dropping the watcher closes the channel
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    interval: Duration,
}

impl WatchPacer {
    pub fn new(root: &Path, recursive: bool, interval: Duration) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let mut watcher = RecommendedWatcher::new(
            move |result| {
                let _ = tx.send(result);
            },
            notify::Config::default(),
        )
        .context("initialize file watcher")?;
        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(root, mode)
            .with_context(|| format!("watch {}", root.display()))?;
        Ok(Self {
            _watcher: watcher,
            rx,
            interval,
        })
    }

    /// Swallow the burst of events a single save produces.
    fn debounce(&self) -> Result<()> {
        loop {
            match self.rx.recv_timeout(WATCH_DEBOUNCE_WINDOW) {
                Ok(Ok(_)) => continue,
                Ok(Err(err)) => warn!("watch error: {err}"),
                Err(RecvTimeoutError::Timeout) => return Ok(()),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(anyhow!("watcher channel closed"));
                }
            }
        }
    }
}

impl PassPacer for WatchPacer {
    fn wait(&mut self, token: &CancellationToken) -> Result<()> {
        let deadline = Instant::now() + self.interval;
        loop {
            if token.is_cancelled() {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            match self.rx.recv_timeout(remaining.min(CANCEL_POLL_INTERVAL)) {
                Ok(Ok(event)) if is_relevant(&event) => {
                    trace!(paths = ?event.paths, "change detected");
                    return self.debounce();
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!("watch error: {err}"),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(anyhow!("watcher channel closed"));
                }
            }
        }
    }
}

fn is_relevant(event: &Event) -> bool {
    let kind = matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    );
    kind && (event.paths.is_empty() || event.paths.iter().any(|path| !is_hidden(path)))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}
