use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, warn};

pub const SAVE_AS: &str = "saveas";
pub const CHMOD: &str = "chmod";
pub const RUN: &str = "run";
pub const EXT: &str = "ext";

const KNOWN_KEYS: [&str; 4] = [SAVE_AS, CHMOD, RUN, EXT];

/// Directives collected from `meta` segments for the next code segment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetaState {
    entries: BTreeMap<String, String>,
}

impl MetaState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn ingest_block(&mut self, body: &str) {
        for line in body.lines() {
            self.ingest_line(line);
        }
    }

    pub fn ingest_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        let Some((key, value)) = split_directive(line) else {
            warn!(line, "meta line without `key: value`, ignoring");
            return;
        };
        if !KNOWN_KEYS.contains(&key) {
            // kept so the block still counts as meta for the next fence
            warn!(key, "unknown meta key, unused");
        }
        let value = if key == SAVE_AS {
            expand_tilde(value)
        } else {
            value.to_string()
        };
        debug!(key, value = %value, "meta");
        self.entries.insert(key.to_string(), value);
    }

    /// One-shot: a later code segment sharing this state must not save again.
    pub fn consume_save_as(&mut self) -> Option<PathBuf> {
        self.entries
            .remove(SAVE_AS)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
    }

    pub fn chmod(&self) -> Option<&str> {
        self.non_empty(CHMOD)
    }

    pub fn run(&self) -> Option<&str> {
        self.non_empty(RUN)
    }

    pub fn ext(&self) -> Option<&str> {
        self.non_empty(EXT)
    }

    fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|value| !value.is_empty())
    }
}

/// Split `key: value` on the first colon, trimming whitespace and quotes
/// from both halves.
pub(crate) fn split_directive(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let key = trim_directive(key);
    if key.is_empty() {
        return None;
    }
    Some((key, trim_directive(value)))
}

fn trim_directive(text: &str) -> &str {
    text.trim_matches(|ch: char| ch.is_whitespace() || ch == '"' || ch == '\'')
}

fn expand_tilde(path: &str) -> String {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => return path.to_string(),
    };
    match dirs::home_dir() {
        Some(home) => format!("{}{rest}", home.display()),
        None => path.to_string(),
    }
}
