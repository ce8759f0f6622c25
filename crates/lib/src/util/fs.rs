//! Directory relocation helpers.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};
use walkdir::WalkDir;

/// Move a directory tree from `from` to `to`.
///
/// Uses a rename when both paths share a filesystem and falls back to a
/// recursive copy followed by removal of the source otherwise. `to` must not
/// exist.
pub fn move_dir(from: &Path, to: &Path) -> io::Result<()> {
  if let Some(parent) = to.parent() {
    fs::create_dir_all(parent)?;
  }

  match fs::rename(from, to) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
      debug!(from = %from.display(), to = %to.display(), "rename crosses filesystems, copying");
      copy_then_remove(from, to)
    }
    Err(e) => Err(e),
  }
}

/// Copy `from` to `to` and remove `from`. A failed copy removes the partial
/// `to` and leaves `from` untouched.
fn copy_then_remove(from: &Path, to: &Path) -> io::Result<()> {
  if let Err(e) = copy_tree(from, to) {
    if let Err(cleanup) = remove_path(to) {
      warn!(path = %to.display(), error = %cleanup, "failed to remove partial copy");
    }
    return Err(e);
  }
  fs::remove_dir_all(from)
}

/// Recursively copy `from` into `to`, preserving permissions and symlinks.
pub fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
  for entry in WalkDir::new(from).follow_links(false) {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(from).map_err(io::Error::other)?;
    let dest = to.join(rel);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      fs::create_dir_all(&dest)?;
      fs::set_permissions(&dest, entry.metadata().map_err(io::Error::other)?.permissions())?;
    } else if file_type.is_symlink() {
      let target = fs::read_link(entry.path())?;
      #[cfg(unix)]
      std::os::unix::fs::symlink(&target, &dest)?;
      #[cfg(windows)]
      {
        if entry.path().is_dir() {
          std::os::windows::fs::symlink_dir(&target, &dest)?;
        } else {
          std::os::windows::fs::symlink_file(&target, &dest)?;
        }
      }
    } else {
      fs::copy(entry.path(), &dest)?;
    }
  }
  Ok(())
}

/// Remove a file or directory if it exists.
pub fn remove_path(path: &Path) -> io::Result<()> {
  match fs::symlink_metadata(path) {
    Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
    Ok(_) => fs::remove_file(path),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e),
  }
}
