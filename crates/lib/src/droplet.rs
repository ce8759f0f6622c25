//! Droplet and build-artifacts-cache archives.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::info;

use crate::consts::STAGING_INFO_FILE;

/// Top-level entries of a droplet, relative to the staging root.
pub const DROPLET_ENTRIES: [&str; 5] = ["app", "deps", STAGING_INFO_FILE, "tmp", "logs"];

#[derive(Debug, Error)]
pub enum AssemblyError {
  #[error("Failed to set up droplet filesystem '{path}': {source}")]
  Prepare {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("Failed to create archive '{path}': {source}")]
  Create {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("Failed to add '{entry}' to archive: {source}")]
  Append {
    entry: String,
    #[source]
    source: io::Error,
  },

  #[error("Failed to finalize archive '{path}': {source}")]
  Finish {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// A written archive.
#[derive(Debug, Clone)]
pub struct ArchiveInfo {
  pub path: PathBuf,
  pub size: u64,
}

/// Package the staged app as a droplet at `output`.
///
/// `./deps` is taken from `deps_dir`; every other entry from `staging_root`,
/// where `tmp` and `logs` are recreated empty first. Nothing is left at
/// `output` unless the archive is complete.
pub fn assemble_droplet(staging_root: &Path, deps_dir: &Path, output: &Path) -> Result<ArchiveInfo, AssemblyError> {
  for name in ["tmp", "logs"] {
    let dir = staging_root.join(name);
    let prepare_err = |source| AssemblyError::Prepare {
      path: dir.clone(),
      source,
    };
    match fs::remove_dir_all(&dir) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => return Err(prepare_err(e)),
    }
    fs::create_dir_all(&dir).map_err(prepare_err)?;
  }

  let mut builder = create_archive(output)?;
  for entry in DROPLET_ENTRIES {
    let src = if entry == "deps" {
      deps_dir.to_path_buf()
    } else {
      staging_root.join(entry)
    };
    let name = format!("./{}", entry);
    let appended = if src.is_dir() {
      builder.append_dir_all(&name, &src)
    } else {
      builder.append_path_with_name(&src, &name)
    };
    appended.map_err(|source| AssemblyError::Append { entry: name, source })?;
  }

  let info = finish_archive(builder, output)?;
  info!(path = %info.path.display(), size = info.size, "droplet assembled");
  Ok(info)
}

/// Archive the contents of the cache root at `output`.
pub fn archive_cache(cache_root: &Path, output: &Path) -> Result<ArchiveInfo, AssemblyError> {
  let mut builder = create_archive(output)?;
  builder
    .append_dir_all(".", cache_root)
    .map_err(|source| AssemblyError::Append {
      entry: cache_root.display().to_string(),
      source,
    })?;

  let info = finish_archive(builder, output)?;
  info!(path = %info.path.display(), size = info.size, "build artifacts cache archived");
  Ok(info)
}

/// Archives are written to a temp file next to `output` and renamed into
/// place by `finish_archive`; dropping the builder removes the temp file.
fn create_archive(output: &Path) -> Result<tar::Builder<GzEncoder<NamedTempFile>>, AssemblyError> {
  let create_err = |source| AssemblyError::Create {
    path: output.to_path_buf(),
    source,
  };

  let parent = match output.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent,
    _ => Path::new("."),
  };
  fs::create_dir_all(parent).map_err(create_err)?;
  let file = tempfile::Builder::new()
    .prefix(".multipack-")
    .suffix(".partial")
    .tempfile_in(parent)
    .map_err(create_err)?;

  let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
  builder.follow_symlinks(false);
  Ok(builder)
}

fn finish_archive(builder: tar::Builder<GzEncoder<NamedTempFile>>, output: &Path) -> Result<ArchiveInfo, AssemblyError> {
  let finish_err = |source| AssemblyError::Finish {
    path: output.to_path_buf(),
    source,
  };

  let encoder = builder.into_inner().map_err(finish_err)?;
  let file = encoder.finish().map_err(finish_err)?;

  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(file.path(), fs::Permissions::from_mode(0o644)).map_err(finish_err)?;
  }
  file.persist(output).map_err(|e| finish_err(e.error))?;

  let size = fs::metadata(output).map(|m| m.len()).unwrap_or(0);
  Ok(ArchiveInfo {
    path: output.to_path_buf(),
    size,
  })
}
