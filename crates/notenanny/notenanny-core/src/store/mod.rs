//! Collaborators the scan driver talks to: where notes come from, how a
//! rewritten note goes back, and where the editor cursor should land.

mod memory;

pub use memory::MemoryStore;

use std::time::SystemTime;

use anyhow::Result;

use crate::document::{CursorPosition, Document};

/// Filter for one store query. Trashed notes are never returned.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentQuery {
    pub modified_after: Option<SystemTime>,
    /// Matches when the note text contains at least one of these. Empty
    /// matches everything.
    pub contains_any: Vec<String>,
}

impl DocumentQuery {
    pub fn matches(&self, doc: &Document) -> bool {
        !doc.trashed
            && self
                .modified_after
                .is_none_or(|watermark| doc.modified > watermark)
            && (self.contains_any.is_empty()
                || self.contains_any.iter().any(|needle| doc.contains(needle)))
    }
}

pub trait DocumentStore {
    fn query(&mut self, query: &DocumentQuery) -> Result<Vec<Document>>;
}

pub trait WriteBack {
    /// Replace the whole stored text (title line included) of `doc`.
    fn replace_text(&mut self, doc: &Document, text: &str) -> Result<()>;
}

pub trait CursorPlacer {
    fn place(&mut self, doc: &Document, position: CursorPosition) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCursor;

impl CursorPlacer for NoopCursor {
    fn place(&mut self, _doc: &Document, _position: CursorPosition) -> Result<()> {
        Ok(())
    }
}
