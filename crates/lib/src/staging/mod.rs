//! Scratch workspace for a staging run.
//!
//! Before the chain runs, the build directory is moved into a freshly
//! allocated `<temp root>/contents*/app`, next to the shared `deps` root and
//! the directory `staging_info.yml` is written to. Buildpacks only ever see
//! the scratch paths.
//!
//! Afterwards the deps root is folded into `<app>/.deps`, a profile script is
//! installed that moves it back next to the app at container start, and the
//! app is moved back to its original path. The app is moved back on failure
//! too. The downloads directory is always removed; the scratch directory is
//! removed once the app is back in place.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chain::StagingContext;
use crate::config::ChainConfig;
use crate::consts::{DEPS_DIR_ENV, DOWNLOADS_PREFIX, FOLDED_DEPS_DIR, PROFILE_DIR, PROFILE_SCRIPT, SCRATCH_PREFIX};
use crate::log::StepLog;
use crate::util::fs::{move_dir, remove_path};

#[derive(Debug, Error)]
pub enum StagingError {
  #[error("failed to allocate scratch directory in '{path}': {source}")]
  Scratch {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to move '{from}' to '{to}': {source}")]
  Relocate {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid deps directory pattern '{pattern}': {message}")]
  Glob { pattern: String, message: String },

  #[error("no new deps directory was created during staging")]
  DepsDirNotFound,

  #[error("expected exactly one new deps directory, found {0:?}")]
  AmbiguousDepsDir(Vec<PathBuf>),

  #[error("failed to write profile script '{path}': {source}")]
  ProfileScript {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// An allocated scratch workspace holding the app for the duration of a run.
///
/// Dropping the area without calling `finalize` or `abandon` still moves the
/// app back and removes the scratch directories.
#[derive(Debug)]
pub struct StagingArea {
  build_dir: PathBuf,
  temp_root: PathBuf,
  scratch: PathBuf,
  downloads: PathBuf,
  deps_before: Vec<PathBuf>,
  log: StepLog,
  released: bool,
}

impl StagingArea {
  /// Allocate the scratch workspace and move `build_dir` into it.
  pub fn prepare(build_dir: &Path, temp_root: &Path, log: StepLog) -> Result<Self, StagingError> {
    fs::create_dir_all(temp_root).map_err(|source| StagingError::Scratch {
      path: temp_root.to_path_buf(),
      source,
    })?;

    let deps_before = snapshot_deps_dirs(temp_root)?;
    let scratch = allocate(temp_root, SCRATCH_PREFIX)?;
    let downloads = allocate(temp_root, DOWNLOADS_PREFIX)?;

    let app = scratch.join("app");
    if let Err(source) = move_dir(build_dir, &app) {
      remove_quietly(&scratch);
      remove_quietly(&downloads);
      return Err(StagingError::Relocate {
        from: build_dir.to_path_buf(),
        to: app,
        source,
      });
    }

    info!(build_dir = %build_dir.display(), scratch = %scratch.display(), "prepared staging area");

    Ok(Self {
      build_dir: build_dir.to_path_buf(),
      temp_root: temp_root.to_path_buf(),
      scratch,
      downloads,
      deps_before,
      log,
      released: false,
    })
  }

  /// Where buildpacks see the app.
  pub fn app_dir(&self) -> PathBuf {
    self.scratch.join("app")
  }

  pub fn deps_dir(&self) -> PathBuf {
    self.scratch.join("deps")
  }

  /// Directory receiving `staging_info.yml`, `tmp` and `logs`.
  pub fn staging_root(&self) -> &Path {
    &self.scratch
  }

  pub fn downloads_dir(&self) -> &Path {
    &self.downloads
  }

  pub fn context(&self, cache_root: &Path, chain: ChainConfig) -> StagingContext {
    StagingContext {
      build_dir: self.app_dir(),
      cache_root: cache_root.to_path_buf(),
      downloads_root: self.downloads.clone(),
      deps_root: self.deps_dir(),
      staging_root: self.scratch.clone(),
      chain,
    }
  }

  /// The deps directory the chain run produced.
  ///
  /// `reported_deps` is the deps root reported by the chain run. When absent
  /// (or gone), the deps directory created during the run is found by diffing
  /// `<temp root>/contents*/deps` against the snapshot taken in `prepare`.
  pub fn resolve_deps(&self, reported_deps: Option<&Path>) -> Result<PathBuf, StagingError> {
    match reported_deps.filter(|p| p.is_dir()) {
      Some(path) => Ok(path.to_path_buf()),
      None => {
        let after = snapshot_deps_dirs(&self.temp_root)?;
        find_new_deps_dir(&self.deps_before, &after)
      }
    }
  }

  /// Fold the deps directory into the app, install the profile script and
  /// move the app back.
  ///
  /// Returns the folded deps path inside the restored build directory.
  pub fn finalize(mut self, reported_deps: Option<&Path>) -> Result<PathBuf, StagingError> {
    let folded = self.resolve_deps(reported_deps).and_then(|deps| self.fold_deps(&deps));
    self.release()?;
    folded?;
    Ok(self.build_dir.join(FOLDED_DEPS_DIR))
  }

  /// Move the app back and clean up without folding deps.
  pub fn abandon(mut self) -> Result<(), StagingError> {
    self.release()
  }

  fn fold_deps(&self, deps: &Path) -> Result<(), StagingError> {
    let app = self.app_dir();
    relocate_deps(deps, &app)?;
    write_profile_script(&app)?;
    Ok(())
  }

  /// Move the app back, then remove the downloads and scratch directories.
  ///
  /// When the app cannot be moved back the scratch directory holds its only
  /// copy and is left in place.
  fn release(&mut self) -> Result<(), StagingError> {
    if self.released {
      return Ok(());
    }
    self.released = true;

    let restored = self.restore();

    self
      .log
      .begin_step(&format!("Removing buildpack downloads directory {}", self.downloads.display()));
    remove_downloads(&self.downloads, &self.log);

    match &restored {
      Ok(()) => remove_quietly(&self.scratch),
      Err(e) => {
        let app = self.app_dir();
        warn!(app = %app.display(), error = %e, "build directory not restored, keeping scratch directory");
        self
          .log
          .warning(&format!("App could not be moved back and was left at {}", app.display()));
      }
    }

    restored
  }

  fn restore(&self) -> Result<(), StagingError> {
    let app = self.app_dir();
    move_dir(&app, &self.build_dir).map_err(|source| StagingError::Relocate {
      from: app,
      to: self.build_dir.clone(),
      source,
    })?;
    debug!(build_dir = %self.build_dir.display(), "restored build directory");
    Ok(())
  }
}

impl Drop for StagingArea {
  fn drop(&mut self) {
    if let Err(e) = self.release() {
      warn!(error = %e, "failed to restore build directory");
    }
  }
}

fn allocate(temp_root: &Path, prefix: &str) -> Result<PathBuf, StagingError> {
  tempfile::Builder::new()
    .prefix(prefix)
    .tempdir_in(temp_root)
    .map(|dir| dir.keep())
    .map_err(|source| StagingError::Scratch {
      path: temp_root.to_path_buf(),
      source,
    })
}

fn remove_quietly(path: &Path) {
  if let Err(e) = remove_path(path) {
    warn!(path = %path.display(), error = %e, "failed to remove directory");
  }
}

/// Every `<temp_root>/contents*/deps` directory that currently exists.
pub fn snapshot_deps_dirs(temp_root: &Path) -> Result<Vec<PathBuf>, StagingError> {
  let root = temp_root.to_str().ok_or_else(|| StagingError::Glob {
    pattern: temp_root.display().to_string(),
    message: "path is not valid UTF-8".to_string(),
  })?;
  let pattern = format!("{}/{}*/deps", glob::Pattern::escape(root), SCRATCH_PREFIX);

  let paths = glob::glob(&pattern).map_err(|e| StagingError::Glob {
    pattern: pattern.clone(),
    message: e.to_string(),
  })?;

  let mut dirs: Vec<PathBuf> = paths.flatten().filter(|p| p.is_dir()).collect();
  dirs.sort();
  Ok(dirs)
}

/// The single entry of `after` that is not in `before`.
pub fn find_new_deps_dir(before: &[PathBuf], after: &[PathBuf]) -> Result<PathBuf, StagingError> {
  let mut new: Vec<PathBuf> = after.iter().filter(|p| !before.contains(p)).cloned().collect();
  match new.len() {
    0 => Err(StagingError::DepsDirNotFound),
    1 => Ok(new.remove(0)),
    _ => Err(StagingError::AmbiguousDepsDir(new)),
  }
}

/// Move `deps` to `<app_dir>/.deps`, replacing anything already there.
pub fn relocate_deps(deps: &Path, app_dir: &Path) -> Result<PathBuf, StagingError> {
  let target = app_dir.join(FOLDED_DEPS_DIR);
  let relocate_err = |source| StagingError::Relocate {
    from: deps.to_path_buf(),
    to: target.clone(),
    source,
  };

  remove_path(&target).map_err(relocate_err)?;
  move_dir(deps, &target).map_err(relocate_err)?;
  debug!(from = %deps.display(), to = %target.display(), "folded deps directory into app");
  Ok(target)
}

fn profile_script() -> String {
  format!(
    r#"#!/usr/bin/env bash
if [ -d "$HOME/{folded}" ]; then
  mkdir -p "$HOME/../deps"
  for entry in "$HOME"/{folded}/*; do
    [ -e "$entry" ] && mv "$entry" "$HOME/../deps/"
  done
  rmdir "$HOME/{folded}"
fi
export {env}="$HOME/../deps"
"#,
    folded = FOLDED_DEPS_DIR,
    env = DEPS_DIR_ENV,
  )
}

/// Install `<app_dir>/.profile.d/000_multi-buildpack.sh`.
pub fn write_profile_script(app_dir: &Path) -> Result<PathBuf, StagingError> {
  let dir = app_dir.join(PROFILE_DIR);
  let path = dir.join(PROFILE_SCRIPT);
  let err = |source| StagingError::ProfileScript {
    path: path.clone(),
    source,
  };

  fs::create_dir_all(&dir).map_err(err)?;
  fs::write(&path, profile_script()).map_err(err)?;

  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).map_err(err)?;
  }

  Ok(path)
}

/// Remove the downloads directory. Failure is reported, never fatal.
pub fn remove_downloads(downloads: &Path, log: &StepLog) {
  if let Err(e) = remove_path(downloads) {
    warn!(path = %downloads.display(), error = %e, "failed to remove downloads directory");
    log.warning(&format!("Unable to remove downloaded buildpacks: {}", e));
  }
}
