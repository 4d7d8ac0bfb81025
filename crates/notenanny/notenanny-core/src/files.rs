use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::time::SystemTime;

use anyhow::{Context, Result, bail};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const SCRATCH_PREFIX: &str = "notenanny-";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    Written,
    /// Target already held exactly this source.
    Unchanged,
    /// Target was modified after the note; left alone.
    Conflict,
}

impl SaveOutcome {
    pub fn usable(self) -> bool {
        matches!(self, Self::Written | Self::Unchanged)
    }
}

/// Write `contents` to `path` unless the file on disk is newer than the
/// note. `chmod` (octal) is applied after a write.
pub fn save_as(
    path: &Path,
    contents: &str,
    note_modified: SystemTime,
    chmod: Option<&str>,
) -> Result<SaveOutcome> {
    match fs::metadata(path) {
        Ok(meta) => {
            let existing = fs::read(path).with_context(|| format!("read {}", path.display()))?;
            if existing == contents.as_bytes() {
                debug!(path = %path.display(), "saved file already up to date");
                return Ok(SaveOutcome::Unchanged);
            }
            let file_modified = meta
                .modified()
                .with_context(|| format!("modification time of {}", path.display()))?;
            if file_modified > note_modified {
                warn!(
                    path = %path.display(),
                    "file changed after the note, not overwriting"
                );
                return Ok(SaveOutcome::Conflict);
            }
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("stat {}", path.display()));
        }
    }

    fs::write(path, contents).with_context(|| format!("write {}", path.display()))?;
    debug!(path = %path.display(), "saved code");
    if let Some(mode) = chmod
        && let Err(err) = apply_chmod(path, mode)
    {
        warn!(path = %path.display(), "{err:#}");
    }
    Ok(SaveOutcome::Written)
}

pub fn apply_chmod(path: &Path, mode: &str) -> Result<()> {
    let bits = u32::from_str_radix(mode.trim(), 8)
        .with_context(|| format!("invalid chmod value {mode:?}"))?;
    set_mode(path, bits)
}

#[cfg(unix)]
fn set_mode(path: &Path, bits: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(bits))
        .with_context(|| format!("chmod {bits:o} {}", path.display()))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, bits: u32) -> Result<()> {
    bail!("chmod {bits:o} {} is not supported on this platform", path.display())
}

/// Uniquely named temporary file holding `contents`, removed on drop.
pub fn scratch_file(dir: Option<&Path>, extension: &str, contents: &str) -> Result<NamedTempFile> {
    if extension.contains(std::path::is_separator) {
        bail!("invalid file extension {extension:?}");
    }
    let suffix = format!(".{extension}");
    let mut builder = tempfile::Builder::new();
    builder.prefix(SCRATCH_PREFIX).suffix(&suffix);
    let mut file = match dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .context("create temporary script file")?;
    file.write_all(contents.as_bytes())
        .and_then(|()| file.flush())
        .with_context(|| format!("write {}", file.path().display()))?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn writes_missing_file_and_applies_mode() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("tool.sh");
        let outcome = save_as(&target, "echo hi\n", SystemTime::now(), Some("750"))?;
        assert_eq!(outcome, SaveOutcome::Written);
        assert_eq!(fs::read_to_string(&target)?, "echo hi\n");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(fs::metadata(&target)?.permissions().mode() & 0o777, 0o750);
        }
        Ok(())
    }

    #[test]
    fn identical_contents_are_not_rewritten() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("x.py");
        fs::write(&target, "print(1)\n")?;
        let long_ago = SystemTime::UNIX_EPOCH + Duration::from_secs(60);
        assert_eq!(
            save_as(&target, "print(1)\n", long_ago, None)?,
            SaveOutcome::Unchanged
        );
        Ok(())
    }

    #[test]
    fn newer_file_is_a_conflict() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("x.py");
        fs::write(&target, "print('edited by hand')\n")?;
        let note_modified = SystemTime::now() - Duration::from_secs(3600);
        assert_eq!(
            save_as(&target, "print(1)\n", note_modified, None)?,
            SaveOutcome::Conflict
        );
        assert_eq!(fs::read_to_string(&target)?, "print('edited by hand')\n");
        Ok(())
    }

    #[test]
    fn older_file_is_replaced() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("x.py");
        fs::write(&target, "old\n")?;
        fs::File::options()
            .write(true)
            .open(&target)?
            .set_modified(SystemTime::now() - Duration::from_secs(3600))?;
        assert_eq!(
            save_as(&target, "new\n", SystemTime::now(), None)?,
            SaveOutcome::Written
        );
        assert_eq!(fs::read_to_string(&target)?, "new\n");
        Ok(())
    }

    #[test]
    fn bad_chmod_value_is_rejected() {
        assert!(apply_chmod(Path::new("/nonexistent"), "rwx").is_err());
    }

    #[test]
    fn scratch_file_has_extension_and_contents() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = scratch_file(Some(dir.path()), "php", "<?php\necho 1;\n")?;
        let name = file.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("notenanny-") && name.ends_with(".php"));
        assert_eq!(fs::read_to_string(file.path())?, "<?php\necho 1;\n");
        let path = file.path().to_path_buf();
        drop(file);
        assert!(!path.exists());
        Ok(())
    }
}
