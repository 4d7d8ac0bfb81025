use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result};
use notenanny_process::{CancellationToken, CommandCancelled, Executor, is_cancelled};
use tracing::{debug, error, info, warn};

use crate::config::TriggerConfig;
use crate::document::{CursorPosition, Document};
use crate::reconcile::Reconciler;
use crate::store::{CursorPlacer, DocumentQuery, DocumentStore, NoopCursor, WriteBack};

const PACER_SLICE: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    pub config_notes: usize,
    pub scanned: usize,
    pub written: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Blocks between two passes.
pub trait PassPacer {
    fn wait(&mut self, token: &CancellationToken) -> Result<()>;
}

/// Fixed interval, cut short by cancellation.
#[derive(Clone, Copy, Debug)]
pub struct SleepPacer {
    interval: Duration,
}

impl SleepPacer {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl PassPacer for SleepPacer {
    fn wait(&mut self, token: &CancellationToken) -> Result<()> {
        let deadline = Instant::now() + self.interval;
        while !token.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(PACER_SLICE));
        }
        Ok(())
    }
}

/// Polls a store for notes changed since the watermark, reconciles them and
/// writes modified ones back.
pub struct Scanner {
    store: Box<dyn DocumentStore>,
    writeback: Box<dyn WriteBack>,
    cursor: Box<dyn CursorPlacer>,
    executor: Box<dyn Executor>,
    config: TriggerConfig,
    token: CancellationToken,
    temp_dir: Option<PathBuf>,
    watermark: Option<SystemTime>,
}

impl Scanner {
    pub fn new(
        store: Box<dyn DocumentStore>,
        writeback: Box<dyn WriteBack>,
        executor: Box<dyn Executor>,
        config: TriggerConfig,
        token: CancellationToken,
    ) -> Self {
        Self {
            store,
            writeback,
            cursor: Box::new(NoopCursor),
            executor,
            config,
            token,
            temp_dir: None,
            watermark: None,
        }
    }

    pub fn with_cursor(mut self, cursor: Box<dyn CursorPlacer>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn with_temp_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.temp_dir = dir;
        self
    }

    pub fn with_watermark(mut self, watermark: Option<SystemTime>) -> Self {
        self.watermark = watermark;
        self
    }

    pub fn watermark(&self) -> Option<SystemTime> {
        self.watermark
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    /// Run passes until cancelled. A pass that fails (store unreachable)
    /// is retried; more than `retries` failures in a row end the loop.
    pub fn run(&mut self, pacer: &mut dyn PassPacer, retries: usize) -> Result<()> {
        let mut failures = 0;
        loop {
            if self.token.is_cancelled() {
                info!("cancelled, stopping");
                return Ok(());
            }
            match self.run_pass() {
                Ok(report) => {
                    failures = 0;
                    if report.written > 0 || report.failed > 0 {
                        info!(?report, "pass finished");
                    } else {
                        debug!(?report, "pass finished");
                    }
                    if report.cancelled {
                        info!("cancelled, stopping");
                        return Ok(());
                    }
                }
                Err(err) => {
                    failures += 1;
                    if failures > retries {
                        return Err(err.context(format!("giving up after {failures} failed passes")));
                    }
                    warn!(attempt = failures, "scan pass failed: {err:#}");
                }
            }
            pacer.wait(&self.token)?;
        }
    }

    /// One pass: config notes first, so new triggers apply to the notes
    /// scanned right after; the watermark moves only once everything seen in
    /// this pass has been handled.
    pub fn run_pass(&mut self) -> Result<PassReport> {
        let mut report = PassReport::default();
        let mut newest = self.watermark;

        let config_query = DocumentQuery {
            modified_after: self.watermark,
            contains_any: vec![self.config.config_marker()],
        };
        let mut config_notes = self
            .store
            .query(&config_query)
            .context("query config notes")?;
        config_notes.sort_by_key(|doc| doc.modified);
        for doc in &config_notes {
            if self.config.apply_document(doc) > 0 {
                report.config_notes += 1;
            }
            newest = newest.max(Some(doc.modified));
        }

        let content_query = DocumentQuery {
            modified_after: self.watermark,
            contains_any: self.config.relevance_markers(),
        };
        let notes = self.store.query(&content_query).context("query notes")?;
        for doc in &notes {
            if self.token.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.scanned += 1;
            match self.process(doc) {
                Ok(true) => report.written += 1,
                Ok(false) => {}
                Err(err) if is_cancelled(&err) => {
                    report.cancelled = true;
                    break;
                }
                Err(err) => {
                    report.failed += 1;
                    error!(doc = %doc.id, "{err:#}");
                }
            }
            newest = newest.max(Some(doc.modified));
        }

        if report.cancelled {
            warn!("pass cancelled, watermark kept");
        } else {
            self.watermark = newest;
        }
        Ok(report)
    }

    fn process(&mut self, doc: &Document) -> Result<bool> {
        debug!(doc = %doc.id, title = %doc.title, "reconciling");
        let result = Reconciler::new(&self.config, self.executor.as_mut())
            .with_temp_dir(self.temp_dir.clone())
            .reconcile(doc)?;
        if !result.modified {
            return Ok(false);
        }
        if self.token.is_cancelled() {
            return Err(CommandCancelled.into());
        }

        self.writeback
            .replace_text(doc, &doc.full_text(&result.body))
            .with_context(|| format!("write back note {}", doc.id))?;
        info!(doc = %doc.id, title = %doc.title, "updated note");

        if let Some(location) = result.location {
            let position = CursorPosition::from_body_line(location.line, location.column);
            if let Err(err) = self.cursor.place(doc, position) {
                warn!(doc = %doc.id, "place cursor: {err:#}");
            }
        }
        Ok(true)
    }
}
