use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use notenanny_core::{Document, WriteBack};
use notenanny_process::{CommandRequest, Executor};
use tempfile::NamedTempFile;
use tracing::debug;

pub const BEAR_CALLBACK: &str = "bear://x-callback-url";
const OPENER: &str = "open";

/// Bear `add-text` URL replacing the whole note. Every reserved byte of the
/// text is percent-encoded so fences and line breaks arrive unchanged.
pub fn add_text_url(id: &str, text: &str) -> String {
    format!(
        "{BEAR_CALLBACK}/add-text?id={}&mode=replace_all&text={}",
        urlencoding::encode(id),
        urlencoding::encode(text)
    )
}

pub fn open_note_url(id: &str) -> String {
    format!("{BEAR_CALLBACK}/open-note?id={}", urlencoding::encode(id))
}

/// Hand a URL to the system opener.
pub(crate) fn open_url<E: Executor>(executor: &mut E, url: &str) -> Result<()> {
    let mut request = CommandRequest::new(OPENER);
    request.arg(url);
    let output = executor
        .execute(&request)
        .with_context(|| format!("launch {OPENER}"))?;
    if !output.success() {
        bail!(
            "{OPENER} exited with {}: {}",
            output.status,
            output.stderr_lossy().trim_end()
        );
    }
    Ok(())
}

/// Updates notes through Bear's URL scheme.
pub struct BearWriteBack<E> {
    executor: E,
}

impl<E: Executor> BearWriteBack<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }
}

impl<E: Executor> WriteBack for BearWriteBack<E> {
    fn replace_text(&mut self, doc: &Document, text: &str) -> Result<()> {
        let url = add_text_url(&doc.id, text);
        debug!(doc = %doc.id, bytes = url.len(), "sending note to Bear");
        open_url(&mut self.executor, &url)
    }
}

/// Replaces note files under a root atomically: the new text goes to a
/// temporary file next to the note, which is then renamed over it.
pub struct FileWriteBack {
    root: PathBuf,
}

impl FileWriteBack {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn note_path(&self, id: &str) -> Result<PathBuf> {
        let relative = Path::new(id);
        if !relative
            .components()
            .all(|part| matches!(part, Component::Normal(_)))
        {
            bail!("note id {id:?} escapes the note directory");
        }
        Ok(self.root.join(relative))
    }
}

impl WriteBack for FileWriteBack {
    fn replace_text(&mut self, doc: &Document, text: &str) -> Result<()> {
        let path = self.note_path(&doc.id)?;
        let dir = path.parent().unwrap_or(&self.root);
        let permissions = fs::metadata(&path)
            .with_context(|| format!("stat {}", path.display()))?
            .permissions();

        let mut staged = NamedTempFile::new_in(dir)
            .with_context(|| format!("stage update in {}", dir.display()))?;
        staged
            .write_all(text.as_bytes())
            .with_context(|| format!("write {}", staged.path().display()))?;
        fs::set_permissions(staged.path(), permissions)
            .with_context(|| format!("copy permissions to {}", staged.path().display()))?;
        staged
            .persist(&path)
            .map_err(|err| err.error)
            .with_context(|| format!("replace {}", path.display()))?;
        Ok(())
    }
}
