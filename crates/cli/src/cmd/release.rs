//! Implementation of the `multipack release` command.

use std::path::Path;

use anyhow::{Context, Result};

use multipack_lib::platform::paths;

/// Print the release descriptor left behind by `compile`.
pub fn cmd_release(file: Option<&Path>) -> Result<()> {
  let path = file.map(Path::to_path_buf).unwrap_or_else(paths::release_output);
  let content =
    std::fs::read_to_string(&path).with_context(|| format!("Failed to read release descriptor {}", path.display()))?;

  print!("{}", content);
  Ok(())
}
