//! Buildpack chain configuration.
//!
//! The chain is declared by the app in `multi-buildpack.yml`:
//!
//! ```yaml
//! buildpacks:
//!   - https://github.com/cloudfoundry/nodejs-buildpack#v1.5.30
//!   - https://example.com/buildpacks/custom.zip
//!   - ruby_buildpack
//! ```
//!
//! Order is significant: every entry but the last is a supply buildpack, the
//! last one is terminal.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::CONFIG_FILE;

/// Errors that can occur while loading the chain configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  /// The app does not provide a `multi-buildpack.yml`.
  #[error("A multi-buildpack.yml file must be provided at your app root to use this buildpack ({0})")]
  NotFound(PathBuf),

  /// The config file exists but could not be read.
  #[error("failed to read '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// The config file is not valid YAML or has the wrong shape.
  #[error("The multi-buildpack.yml file is malformed ({path}): {source}")]
  Malformed {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },
}

/// One entry of the buildpack chain.
///
/// Either a local name (resolved against the pre-installed system buildpacks
/// directory) or an absolute URL, optionally suffixed with `#<branch or tag>`
/// or pointing at a `.zip` resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildpackRef(String);

impl BuildpackRef {
  pub fn new(reference: impl Into<String>) -> Self {
    Self(reference.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for BuildpackRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for BuildpackRef {
  fn from(value: &str) -> Self {
    Self::new(value)
  }
}

/// The ordered buildpack chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
  #[serde(default)]
  pub buildpacks: Vec<BuildpackRef>,
}

impl ChainConfig {
  pub fn new<I, R>(buildpacks: I) -> Self
  where
    I: IntoIterator<Item = R>,
    R: Into<BuildpackRef>,
  {
    Self {
      buildpacks: buildpacks.into_iter().map(Into::into).collect(),
    }
  }

  /// Load `multi-buildpack.yml` from the app root.
  pub fn load(app_dir: &Path) -> Result<Self, ConfigError> {
    let path = app_dir.join(CONFIG_FILE);

    let content = std::fs::read_to_string(&path).map_err(|e| {
      if e.kind() == io::ErrorKind::NotFound {
        ConfigError::NotFound(path.clone())
      } else {
        ConfigError::Read {
          path: path.clone(),
          source: e,
        }
      }
    })?;

    let config = Self::parse(&content).map_err(|source| ConfigError::Malformed {
      path: path.clone(),
      source,
    })?;

    debug!(path = %path.display(), buildpacks = config.len(), "loaded chain config");
    Ok(config)
  }

  pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
    if content.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(content)
  }

  pub fn len(&self) -> usize {
    self.buildpacks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buildpacks.is_empty()
  }

  /// True when the chain has supply buildpacks in front of the terminal one.
  pub fn is_multi(&self) -> bool {
    self.buildpacks.len() > 1
  }

  pub fn refs(&self) -> &[BuildpackRef] {
    &self.buildpacks
  }

  /// Every buildpack except the last.
  pub fn supply_refs(&self) -> &[BuildpackRef] {
    match self.buildpacks.split_last() {
      Some((_, supply)) => supply,
      None => &[],
    }
  }

  pub fn terminal(&self) -> Option<&BuildpackRef> {
    self.buildpacks.last()
  }
}
