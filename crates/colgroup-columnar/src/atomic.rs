//! Crash-safe placement of files and directories.
//!
//! Contents are written and synced under a temporary name in the destination's directory and
//! then renamed into place, so a reader sees either nothing or the complete result.

use crate::error::StoreResult;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use tempfile::{Builder, NamedTempFile, TempDir};

fn parent_dir_or_dot(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

/// Replace `dest` with `bytes`.
pub fn write_file_atomic(dest: &Path, bytes: &[u8]) -> StoreResult<()> {
    let dir = parent_dir_or_dot(dest);
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|err| err.error)?;
    // Best effort: the file is already in place.
    let _ = sync_dir(dir);
    Ok(())
}

/// Empty scratch directory beside `dest`. It is removed on drop unless passed to
/// [`commit_dir`].
pub fn stage_dir(dest: &Path) -> StoreResult<TempDir> {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let prefix = format!(".{name}.");
    Ok(Builder::new()
        .prefix(&prefix)
        .tempdir_in(parent_dir_or_dot(dest))?)
}

/// Rename a staged directory to `dest`, which must not exist yet.
pub fn commit_dir(staged: TempDir, dest: &Path) -> StoreResult<()> {
    let path = staged.keep();
    if let Err(err) = fs::rename(&path, dest) {
        let _ = fs::remove_dir_all(&path);
        return Err(err.into());
    }
    let _ = sync_dir(parent_dir_or_dot(dest));
    Ok(())
}
