use std::path::PathBuf;

use crate::consts::{DEFAULT_BUILDPACKS_DIR, RELEASE_FILE};

/// Overrides the platform temp root.
pub const TMPDIR_ENV: &str = "MULTIPACK_TMPDIR";

/// Overrides the directory holding pre-installed system buildpacks.
pub const BUILDPACKS_DIR_ENV: &str = "MULTIPACK_BUILDPACKS_DIR";

/// Returns the platform temp root.
///
/// Scratch `contents*` directories and the downloads directory live here. The
/// deps-directory discovery protocol globs under this root.
pub fn temp_root() -> PathBuf {
  std::env::var_os(TMPDIR_ENV)
    .filter(|v| !v.is_empty())
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
}

/// Returns the directory where the platform pre-installs buildpacks referenced by name.
pub fn buildpacks_dir() -> PathBuf {
  std::env::var_os(BUILDPACKS_DIR_ENV)
    .filter(|v| !v.is_empty())
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from(DEFAULT_BUILDPACKS_DIR))
}

/// Returns where `compile` writes the release descriptor and `release` reads it.
pub fn release_output() -> PathBuf {
  temp_root().join(RELEASE_FILE)
}
