use anyhow::Result;
use notenanny_core::{CursorPlacer, CursorPosition, Document};
use notenanny_process::Executor;
use tracing::info;

use crate::writeback::{open_note_url, open_url};

/// Bear cannot jump to a line from outside, so the note is brought to the
/// front and the position is logged.
pub struct BearCursor<E> {
    executor: E,
}

impl<E: Executor> BearCursor<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }
}

impl<E: Executor> CursorPlacer for BearCursor<E> {
    fn place(&mut self, doc: &Document, position: CursorPosition) -> Result<()> {
        info!(
            doc = %doc.id,
            line = position.line,
            column = position.column,
            "trigger was here"
        );
        open_url(&mut self.executor, &open_note_url(&doc.id))
    }
}
