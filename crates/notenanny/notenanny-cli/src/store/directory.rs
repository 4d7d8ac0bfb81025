use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use notenanny_core::{Document, DocumentQuery, DocumentStore};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

const NOTE_EXTENSIONS: [&str; 3] = ["md", "markdown", "txt"];

/// Every markdown or text file below a root directory is a note; its id is
/// the path relative to the root.
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn open(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            bail!("{} is not a directory", root.display());
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn read_note(&self, entry: &DirEntry, query: &DocumentQuery) -> Result<Option<Document>> {
        let path = entry.path();
        let modified = entry
            .metadata()
            .with_context(|| format!("stat {}", path.display()))?
            .modified()
            .with_context(|| format!("modification time of {}", path.display()))?;
        if query.modified_after.is_some_and(|after| modified <= after) {
            return Ok(None);
        }
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {
                debug!(path = %path.display(), "not UTF-8, skipping");
                return Ok(None);
            }
            Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
        };
        let id = note_id(&self.root, path)?;
        let doc = Document::from_text(id, &text, modified);
        Ok(query.matches(&doc).then_some(doc))
    }
}

impl DocumentStore for DirectoryStore {
    fn query(&mut self, query: &DocumentQuery) -> Result<Vec<Document>> {
        if !self.root.is_dir() {
            bail!("note directory {} is gone", self.root.display());
        }
        let mut docs = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("skipping unreadable entry: {err}");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !has_note_extension(entry.path()) {
                continue;
            }
            match self.read_note(&entry, query) {
                Ok(Some(doc)) => docs.push(doc),
                Ok(None) => {}
                Err(err) => warn!("{err:#}"),
            }
        }
        Ok(docs)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

fn has_note_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| NOTE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn note_id(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .with_context(|| format!("{} is outside {}", path.display(), root.display()))?;
    let parts: Vec<String> = relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}
