//! Top-level staging error.

use thiserror::Error;

use crate::chain::ChainError;
use crate::config::ConfigError;
use crate::droplet::AssemblyError;
use crate::release::ReleaseError;
use crate::staging::StagingError;

/// Process exit codes understood by the hosting platform.
pub mod exit_codes {
  pub const GENERIC: i32 = 1;
  pub const NO_CONFIG: i32 = 2;
  pub const MALFORMED_CONFIG: i32 = 3;
  pub const DETECT: i32 = 222;
  pub const COMPILE: i32 = 223;
  pub const RELEASE: i32 = 224;
  pub const SUPPLY: i32 = 225;
}

#[derive(Debug, Error)]
pub enum StageError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Chain(#[from] ChainError),

  #[error(transparent)]
  Staging(#[from] StagingError),

  #[error(transparent)]
  Assembly(#[from] AssemblyError),

  #[error(transparent)]
  Release(#[from] ReleaseError),
}

impl StageError {
  pub fn exit_code(&self) -> i32 {
    match self {
      StageError::Config(ConfigError::NotFound(_)) => exit_codes::NO_CONFIG,
      StageError::Config(ConfigError::Malformed { .. }) => exit_codes::MALFORMED_CONFIG,
      StageError::Chain(e) => e.exit_code(),
      _ => exit_codes::GENERIC,
    }
  }
}
