//! One left-to-right pass over a note's segments.
//!
//! Meta blocks feed the next code block. Each code block is handled on its
//! own: markers are stripped, the source is optionally formatted and saved,
//! and when a run is due the output unit that follows it (`errors` and/or
//! `output`) is rebuilt. The pass emits a fresh segment list instead of
//! editing in place, so removing or inserting blocks never shifts indices
//! that are still to be visited.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notenanny_process::{CommandRequest, Executor, is_cancelled};
use tempfile::NamedTempFile;
use tracing::{debug, info, trace, warn};

use crate::config::TriggerConfig;
use crate::document::Document;
use crate::files;
use crate::fingerprint::fingerprint;
use crate::interpreter::{self, Invocation};
use crate::meta::MetaState;
use crate::segments::{self, OutputTag, Segment};
use crate::trigger::{self, Detection, MarkerLocation};

const NEW_GAP: &str = "\n";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reconciliation {
    pub body: String,
    pub modified: bool,
    /// First trigger marker of the pass as a 0-based body line and column.
    pub location: Option<MarkerLocation>,
}

pub struct Reconciler<'c, E> {
    config: &'c TriggerConfig,
    executor: E,
    temp_dir: Option<PathBuf>,
}

struct Pass<'d> {
    doc: &'d Document,
    emitted: Vec<String>,
    meta: MetaState,
    modified: bool,
    location: Option<MarkerLocation>,
}

impl Pass<'_> {
    fn keep(&mut self, segment: &str) {
        self.emitted.push(segment.to_string());
    }

    fn emitted_lines(&self) -> usize {
        self.emitted
            .iter()
            .map(|segment| segment.matches('\n').count())
            .sum()
    }
}

/// The `errors`/`output` blocks directly after a code block.
struct OutputUnit<'s> {
    gap: &'s str,
    errors_gap: Option<&'s str>,
    tag: OutputTag,
    segments: &'s [String],
}

impl OutputUnit<'_> {
    fn len(&self) -> usize {
        self.segments.len()
    }
}

/// Code text plus the prelude its interpreter needs. The prelude is left
/// empty when the code already starts with it.
struct Source {
    prelude: &'static str,
    code: String,
}

impl Source {
    fn new(tag: &str, code: String) -> Self {
        let prelude = interpreter::prelude_for(tag);
        let prelude = if code.starts_with(prelude) { "" } else { prelude };
        Self { prelude, code }
    }

    fn text(&self) -> String {
        format!("{}{}", self.prelude, self.code)
    }

    fn replace(&mut self, formatted: &str) {
        self.code = formatted
            .strip_prefix(self.prelude)
            .unwrap_or(formatted)
            .to_string();
    }
}

struct RunOutput {
    stdout: String,
    stderr: String,
}

impl RunOutput {
    fn from_error(err: &anyhow::Error) -> Self {
        Self {
            stdout: String::new(),
            stderr: render_error(err),
        }
    }
}

impl<'c, E: Executor> Reconciler<'c, E> {
    pub fn new(config: &'c TriggerConfig, executor: E) -> Self {
        Self {
            config,
            executor,
            temp_dir: None,
        }
    }

    /// Directory for scratch script copies; the system default when unset.
    pub fn with_temp_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.temp_dir = dir;
        self
    }

    /// Errors only when execution was cancelled; every other failure is
    /// logged or written into the note.
    pub fn reconcile(&mut self, doc: &Document) -> Result<Reconciliation> {
        let segments = segments::split(&doc.body);
        let mut pass = Pass {
            doc,
            emitted: Vec::with_capacity(segments.len()),
            meta: MetaState::new(),
            modified: false,
            location: None,
        };

        let mut index = 0;
        while index < segments.len() {
            index += match segments::classify(&segments, index, &self.config.config_tag) {
                Segment::Meta { body } => {
                    pass.meta.reset();
                    pass.meta.ingest_block(body);
                    pass.keep(&segments[index]);
                    1
                }
                Segment::Config { .. } => {
                    pass.meta.reset();
                    pass.keep(&segments[index]);
                    1
                }
                Segment::Code { tag, code } => {
                    let consumed = self.handle_code(&mut pass, &segments, index, tag, code);
                    pass.meta.reset();
                    consumed?
                }
                _ => {
                    pass.keep(&segments[index]);
                    1
                }
            };
        }

        Ok(Reconciliation {
            body: segments::join(&pass.emitted),
            modified: pass.modified,
            location: pass.location,
        })
    }

    /// Emits the code block and, when touched, its output unit. Returns the
    /// number of input segments consumed.
    fn handle_code(
        &mut self,
        pass: &mut Pass<'_>,
        segments: &[String],
        index: usize,
        tag: &str,
        code: &str,
    ) -> Result<usize> {
        let original = &segments[index];
        if tag.is_empty() && pass.meta.is_empty() {
            trace!(doc = %pass.doc.id, "untagged fence without meta, skipping");
            pass.keep(original);
            return Ok(1);
        }

        let config = self.config;
        let detection = trigger::detect(code, &config.run_marker, &config.format_marker);
        let mut source = Source::new(
            tag,
            if detection.fired() {
                detection.stripped.clone()
            } else {
                code.to_string()
            },
        );
        if detection.fired() {
            pass.modified = true;
            if pass.location.is_none() {
                let offset = pass.emitted_lines();
                pass.location =
                    first_marker(original, &detection, config).map(|found| MarkerLocation {
                        line: offset + found.line,
                        column: found.column,
                    });
            }
        }

        let unit = find_unit(segments, index, &config.config_tag);
        let mut retag = None;
        if detection.format || (detection.run && config.format_on_run) {
            let before = source.text();
            if let Some(formatted) = self.format(tag, &before)?
                && formatted != before
            {
                source.replace(&formatted);
                pass.modified = true;
                let was_current = unit
                    .as_ref()
                    .is_some_and(|unit| unit.tag.is_current(&fingerprint(&before)));
                if !detection.run && was_current {
                    retag = Some(fingerprint(&source.text()));
                }
            }
        }

        let text = source.text();
        let tag_now = fingerprint(&text);
        let saved = save_source(pass, &text);

        let header = segments::header_line(original);
        pass.emitted.push(format!("{header}\n{}", source.code));

        let wants_run = if detection.fired() {
            detection.run
        } else {
            unit.as_ref()
                .is_some_and(|unit| !unit.tag.is_current(&tag_now))
        };
        if wants_run {
            match interpreter::resolve(tag, &pass.meta) {
                Some(invocation) => {
                    let output = self.execute(&invocation, &text, saved.as_deref())?;
                    let rendered = render_unit(unit.as_ref(), &tag_now, output, detection.fired());
                    let consumed = unit.as_ref().map_or(0, OutputUnit::len);
                    if unit.as_ref().is_none_or(|unit| unit.segments != rendered.as_slice()) {
                        pass.modified = true;
                    }
                    pass.emitted.extend(rendered);
                    return Ok(1 + consumed);
                }
                None => {
                    debug!(doc = %pass.doc.id, tag, "no interpreter and no `run` override");
                }
            }
        }

        if let (Some(new_tag), Some(unit)) = (retag, unit.as_ref()) {
            let (last, rest) = unit
                .segments
                .split_last()
                .context("output unit without output block")?;
            pass.emitted.extend(rest.iter().cloned());
            let body = last.split_once('\n').map_or("", |(_, body)| body);
            pass.emitted.push(segments::render_output(&new_tag, body));
            return Ok(1 + unit.len());
        }
        Ok(1)
    }

    fn format(&mut self, tag: &str, source: &str) -> Result<Option<String>> {
        let Some(spec) = self.config.formatter_for(tag) else {
            debug!(tag, "no formatter configured");
            return Ok(None);
        };
        let extension = interpreter::lookup(tag).map_or(tag, |found| found.extension);
        let extension = if extension.is_empty() { "txt" } else { extension };
        let copy = match files::scratch_file(self.temp_dir.as_deref(), extension, source) {
            Ok(copy) => copy,
            Err(err) => {
                warn!("{err:#}");
                return Ok(None);
            }
        };

        let request = spec.request(copy.path());
        info!(command = %request.render(), "formatting");
        let output = match self.executor.execute(&request) {
            Ok(output) => output,
            Err(err) if is_cancelled(&err) => return Err(err),
            Err(err) => {
                warn!("formatter failed, keeping original code: {err:#}");
                return Ok(None);
            }
        };
        if !output.success() || !output.stderr.is_empty() {
            warn!(
                status = ?output.status,
                stderr = %output.stderr_lossy().trim_end(),
                "formatter failed, keeping original code"
            );
            return Ok(None);
        }

        let formatted = if spec.in_place() {
            match fs::read_to_string(copy.path()) {
                Ok(text) => text,
                Err(err) => {
                    warn!(path = %copy.path().display(), "read formatted copy: {err}");
                    return Ok(None);
                }
            }
        } else {
            output.stdout_lossy()
        };
        if formatted.trim().is_empty() {
            warn!(tag, "formatter produced no output, keeping original code");
            return Ok(None);
        }
        if !formatted.starts_with(interpreter::prelude_for(tag)) {
            warn!(tag, "formatter dropped the language prelude, keeping original code");
            return Ok(None);
        }
        Ok(Some(formatted))
    }

    fn execute(
        &mut self,
        invocation: &Invocation,
        source: &str,
        saved: Option<&Path>,
    ) -> Result<RunOutput> {
        let scratch: Option<NamedTempFile> = match saved {
            Some(_) => None,
            None => match files::scratch_file(
                self.temp_dir.as_deref(),
                &invocation.extension,
                source,
            ) {
                Ok(file) => Some(file),
                Err(err) => return Ok(RunOutput::from_error(&err)),
            },
        };
        let script = match (saved, scratch.as_ref()) {
            (Some(path), _) => path,
            (None, Some(file)) => file.path(),
            (None, None) => return Ok(RunOutput::from_error(&anyhow::anyhow!("no script file"))),
        };

        let mut request = CommandRequest::new(&invocation.program);
        request.args(&invocation.args).arg(script);
        info!(command = %request.render(), "running");
        trace!(source, "script");
        match self.executor.execute(&request) {
            Ok(output) => {
                if !output.success() {
                    debug!(status = ?output.status, timed_out = output.timed_out, "script failed");
                }
                Ok(RunOutput {
                    stdout: output.stdout_lossy(),
                    stderr: output.stderr_lossy(),
                })
            }
            Err(err) if is_cancelled(&err) => Err(err),
            Err(err) => Ok(RunOutput::from_error(&err)),
        }
    }
}

/// Write the source to the meta `saveas` target. Returns the path when the
/// file now holds exactly this source and can be executed directly.
fn save_source(pass: &mut Pass<'_>, text: &str) -> Option<PathBuf> {
    let path = pass.meta.consume_save_as()?;
    match files::save_as(&path, text, pass.doc.modified, pass.meta.chmod()) {
        Ok(outcome) if outcome.usable() => Some(path),
        Ok(_) => None,
        Err(err) => {
            warn!(doc = %pass.doc.id, "{err:#}");
            None
        }
    }
}

fn find_unit<'s>(segments: &'s [String], index: usize, config_tag: &str) -> Option<OutputUnit<'s>> {
    let gap = segments.get(index + 1)?;
    if !segments::is_gap(gap) {
        return None;
    }
    match segments::classify(segments, index + 2, config_tag) {
        Segment::Output { tag, .. } => Some(OutputUnit {
            gap,
            errors_gap: None,
            tag,
            segments: &segments[index + 1..index + 3],
        }),
        Segment::Errors { .. } => {
            let errors_gap = segments.get(index + 3)?;
            if !segments::is_gap(errors_gap) {
                return None;
            }
            match segments::classify(segments, index + 4, config_tag) {
                Segment::Output { tag, .. } => Some(OutputUnit {
                    gap,
                    errors_gap: Some(errors_gap),
                    tag,
                    segments: &segments[index + 1..index + 5],
                }),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Segments that replace (or create) the output unit. A run requested by a
/// marker keeps stderr in its own `errors` block; the content-change path
/// folds it into `output`.
fn render_unit(
    unit: Option<&OutputUnit<'_>>,
    tag: &str,
    output: RunOutput,
    triggered: bool,
) -> Vec<String> {
    let gap = unit.map_or(NEW_GAP, |unit| unit.gap);
    let stdout = segments::normalize_stream(&output.stdout);
    let stderr = segments::normalize_stream(&output.stderr);
    trace!(stdout = %stdout, stderr = %stderr, "captured");

    if triggered && !stderr.is_empty() {
        let errors_gap = unit.and_then(|unit| unit.errors_gap).unwrap_or(NEW_GAP);
        vec![
            gap.to_string(),
            segments::render_errors(&stderr),
            errors_gap.to_string(),
            segments::render_output(tag, &stdout),
        ]
    } else if triggered {
        vec![gap.to_string(), segments::render_output(tag, &stdout)]
    } else {
        vec![
            gap.to_string(),
            segments::render_output(tag, &format!("{stdout}{stderr}")),
        ]
    }
}

fn first_marker(
    segment: &str,
    detection: &Detection,
    config: &TriggerConfig,
) -> Option<MarkerLocation> {
    let run = detection
        .run
        .then(|| trigger::locate(segment, &config.run_marker))
        .flatten();
    let format = detection
        .format
        .then(|| trigger::locate(segment, &config.format_marker))
        .flatten();
    run.into_iter().chain(format).min()
}

fn render_error(err: &anyhow::Error) -> String {
    let mut text = format!("error: {err}\n");
    for cause in err.chain().skip(1) {
        text.push_str(&format!("caused by: {cause}\n"));
    }
    text
}
