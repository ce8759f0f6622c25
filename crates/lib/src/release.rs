//! Release descriptor translation.
//!
//! The platform asks for the app's start command through `bin/release`, which
//! runs after staging and only sees files. Compile therefore leaves a small
//! YAML descriptor behind, built from `staging_info.yml`.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::chain::{ReleaseDescriptor, StagingInfo};

#[derive(Debug, Error)]
pub enum ReleaseError {
  #[error("Unable to read staging info '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("Unable to parse staging info '{path}': {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("Unable to encode release descriptor: {0}")]
  Encode(#[from] serde_yaml::Error),

  #[error("Unable to write start command '{path}': {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Descriptor for a staged app: a single `web` process running the start
/// command.
pub fn descriptor(info: &StagingInfo) -> ReleaseDescriptor {
  let mut default_process_types = BTreeMap::new();
  default_process_types.insert("web".to_string(), info.start_command.clone());
  ReleaseDescriptor { default_process_types }
}

pub fn render(info: &StagingInfo) -> Result<String, ReleaseError> {
  Ok(serde_yaml::to_string(&descriptor(info))?)
}

pub fn read_staging_info(path: &Path) -> Result<StagingInfo, ReleaseError> {
  let content = std::fs::read_to_string(path).map_err(|source| ReleaseError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  serde_json::from_str(&content).map_err(|source| ReleaseError::Parse {
    path: path.to_path_buf(),
    source,
  })
}

/// Translate `staging_info` into a release descriptor written to `output`.
///
/// Nothing is written when the staging info cannot be read or parsed.
pub fn write_start_command(staging_info: &Path, output: &Path) -> Result<ReleaseDescriptor, ReleaseError> {
  let info = read_staging_info(staging_info)?;
  let rendered = render(&info)?;

  let write_err = |source| ReleaseError::Write {
    path: output.to_path_buf(),
    source,
  };
  if let Some(parent) = output.parent() {
    std::fs::create_dir_all(parent).map_err(write_err)?;
  }
  std::fs::write(output, rendered).map_err(write_err)?;

  debug!(output = %output.display(), start_command = %info.start_command, "wrote release descriptor");
  Ok(descriptor(&info))
}
