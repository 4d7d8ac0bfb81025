use std::collections::BTreeMap;
use std::path::Path;

use notenanny_process::CommandRequest;
use tracing::{debug, info, warn};

use crate::document::Document;
use crate::meta::split_directive;
use crate::segments::{self, FENCE, Segment};

pub const DEFAULT_RUN_TRIGGER: &str = "::run::";
pub const DEFAULT_FORMAT_TRIGGER: &str = "::fmt::";
pub const DEFAULT_CONFIG_TAG: &str = "notenanny";

const FILE_PLACEHOLDER: &str = "{file}";
const FORMAT_KEY_PREFIX: &str = "Format";

/// Trigger strings and formatter commands for one scan pass. Settings give
/// the initial snapshot; config blocks in notes override it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerConfig {
    pub run_marker: String,
    pub format_marker: String,
    pub format_on_run: bool,
    /// Language tag (lowercase) to formatter command.
    pub formatters: BTreeMap<String, FormatterSpec>,
    /// Fence header that marks a config block. Not changeable from a note.
    pub config_tag: String,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            run_marker: DEFAULT_RUN_TRIGGER.to_string(),
            format_marker: DEFAULT_FORMAT_TRIGGER.to_string(),
            format_on_run: false,
            formatters: BTreeMap::new(),
            config_tag: DEFAULT_CONFIG_TAG.to_string(),
        }
    }
}

impl TriggerConfig {
    pub fn formatter_for(&self, tag: &str) -> Option<&FormatterSpec> {
        self.formatters.get(&tag.to_ascii_lowercase())
    }

    pub fn set_formatter(&mut self, tag: &str, command: &str) {
        let tag = tag.to_ascii_lowercase();
        match FormatterSpec::parse(command) {
            Some(spec) => {
                self.formatters.insert(tag, spec);
            }
            None => {
                self.formatters.remove(&tag);
            }
        }
    }

    /// Substring that identifies notes holding a config block.
    pub fn config_marker(&self) -> String {
        format!("{FENCE}{}", self.config_tag)
    }

    /// Cheap pre-filter for notes worth parsing.
    pub fn relevance_markers(&self) -> Vec<String> {
        let mut markers = vec![
            format!("{FENCE}{}", segments::OUTPUT_TAG),
            format!("{FENCE}{}", segments::META_TAG),
            format!("{FENCE}{}", segments::ERRORS_TAG),
        ];
        for marker in [&self.run_marker, &self.format_marker] {
            if !marker.is_empty() && !markers.contains(marker) {
                markers.push(marker.clone());
            }
        }
        markers
    }

    /// Apply every config block of `doc`, in order.
    pub fn apply_document(&mut self, doc: &Document) -> usize {
        let segments = segments::split(&doc.body);
        let mut applied = 0;
        for index in 0..segments.len() {
            if let Segment::Config { body } = segments::classify(&segments, index, &self.config_tag)
            {
                applied += self.apply_block(body);
            }
        }
        if applied > 0 {
            info!(doc = %doc.id, applied, "loaded note configuration");
        }
        applied
    }

    pub fn apply_block(&mut self, body: &str) -> usize {
        body.lines().filter(|line| self.apply_line(line)).count()
    }

    pub fn apply_line(&mut self, line: &str) -> bool {
        if line.trim().is_empty() {
            return false;
        }
        let Some((key, value)) = split_directive(line) else {
            warn!(line, "config line without `key: value`, ignoring");
            return false;
        };
        match key {
            "RunTrigger" => self.run_marker = value.to_string(),
            "FormatTrigger" => self.format_marker = value.to_string(),
            "FormatOnRun" => self.format_on_run = value == "true",
            _ => match key.strip_prefix(FORMAT_KEY_PREFIX) {
                Some(lang) if !lang.is_empty() => self.set_formatter(lang, value),
                _ => {
                    warn!(key, "unknown config key, ignoring");
                    return false;
                }
            },
        }
        debug!(key, value, "config");
        true
    }
}

/// External formatter command line. A `{file}` word makes it an in-place
/// formatter; otherwise the code is piped through standard input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormatterSpec {
    program: String,
    args: Vec<String>,
}

impl FormatterSpec {
    pub fn parse(command: &str) -> Option<Self> {
        let mut words = command.split_whitespace().map(str::to_string);
        let program = words.next()?;
        Some(Self {
            program,
            args: words.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn in_place(&self) -> bool {
        self.args.iter().any(|arg| arg.contains(FILE_PLACEHOLDER))
    }

    pub fn request(&self, file: &Path) -> CommandRequest {
        let mut request = CommandRequest::new(&self.program);
        if self.in_place() {
            let path = file.to_string_lossy();
            request.args(self.args.iter().map(|arg| arg.replace(FILE_PLACEHOLDER, &path)));
        } else {
            request.args(&self.args).stdin_file(file);
        }
        request
    }
}
