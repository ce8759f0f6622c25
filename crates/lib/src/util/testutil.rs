//! Test helpers for building fake buildpacks on disk.
//!
//! Tests that execute the generated scripts should be `#[serial]`: writing an
//! executable while another thread forks can fail the exec with ETXTBSY.

use std::fs;
use std::path::{Path, PathBuf};

/// Write an executable `/bin/sh` script.
#[cfg(unix)]
pub fn write_script(path: &Path, body: &str) {
  use std::os::unix::fs::PermissionsExt;

  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).unwrap();
  }
  fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
  fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// A buildpack directory with a `bin/` entrypoint per configured script.
pub struct FakeBuildpack {
  root: PathBuf,
  scripts: Vec<(&'static str, String)>,
}

impl FakeBuildpack {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      scripts: Vec::new(),
    }
  }

  pub fn script(mut self, name: &'static str, body: impl Into<String>) -> Self {
    self.scripts.push((name, body.into()));
    self
  }

  pub fn detect(self, body: impl Into<String>) -> Self {
    self.script("detect", body)
  }

  pub fn supply(self, body: impl Into<String>) -> Self {
    self.script("supply", body)
  }

  pub fn compile(self, body: impl Into<String>) -> Self {
    self.script("compile", body)
  }

  pub fn release(self, body: impl Into<String>) -> Self {
    self.script("release", body)
  }

  /// Write the scripts and return the buildpack root.
  #[cfg(unix)]
  pub fn write(self) -> PathBuf {
    fs::create_dir_all(self.root.join("bin")).unwrap();
    for (name, body) in &self.scripts {
      write_script(&self.root.join("bin").join(name), body);
    }
    self.root
  }
}
