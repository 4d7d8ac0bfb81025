mod bear;
mod directory;

pub use bear::{BearStore, from_core_data, to_core_data};
pub use directory::DirectoryStore;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use notenanny_core::{CursorPlacer, DocumentStore, NoopCursor, WriteBack};
use notenanny_process::ProcessExecutor;

use crate::cursor::BearCursor;
use crate::settings::StoreKind;
use crate::writeback::{BearWriteBack, FileWriteBack};

const OPENER_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything the scanner needs for one store kind, plus what to watch for
/// early wake-ups.
pub struct OpenedStore {
    pub store: Box<dyn DocumentStore>,
    pub writeback: Box<dyn WriteBack>,
    pub cursor: Box<dyn CursorPlacer>,
    pub watch_root: PathBuf,
    pub recursive: bool,
}

pub fn open(kind: StoreKind, path: &Path, executor: &ProcessExecutor) -> Result<OpenedStore> {
    match kind {
        StoreKind::Bear => {
            let opener = executor.clone().with_timeout(OPENER_TIMEOUT);
            Ok(OpenedStore {
                store: Box::new(BearStore::open(path)?),
                writeback: Box::new(BearWriteBack::new(opener.clone())),
                cursor: Box::new(BearCursor::new(opener)),
                // the database is rewritten alongside its -wal/-shm files
                watch_root: path.parent().unwrap_or(path).to_path_buf(),
                recursive: false,
            })
        }
        StoreKind::Directory => Ok(OpenedStore {
            store: Box::new(DirectoryStore::open(path)?),
            writeback: Box::new(FileWriteBack::new(path)),
            cursor: Box::new(NoopCursor),
            watch_root: path.to_path_buf(),
            recursive: true,
        }),
    }
}
