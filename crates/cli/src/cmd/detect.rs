//! Implementation of the `multipack detect` command.

use std::path::Path;

use anyhow::{Result, bail};

use multipack_lib::consts::CONFIG_FILE;

/// Succeed (printing the buildpack name) when the app has a chain config.
pub fn cmd_detect(build_dir: &Path) -> Result<()> {
  if !build_dir.join(CONFIG_FILE).is_file() {
    bail!("no {} found in {}", CONFIG_FILE, build_dir.display());
  }

  println!("multi-buildpack");
  Ok(())
}
