//! Data carried into and out of a chain run.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::cache::PruneStats;
use crate::config::ChainConfig;

/// Directories a chain run operates on.
#[derive(Debug, Clone)]
pub struct StagingContext {
  /// The app directory buildpacks mutate.
  pub build_dir: PathBuf,
  /// Persistent cache root holding one slot per buildpack.
  pub cache_root: PathBuf,
  /// Ephemeral directory for fetched remote buildpacks.
  pub downloads_root: PathBuf,
  /// Shared deps root; supply buildpacks write numbered subdirectories here.
  pub deps_root: PathBuf,
  /// Where `staging_info.yml` is written.
  pub staging_root: PathBuf,
  pub chain: ChainConfig,
}

/// Persisted summary of a staging run.
///
/// Written as JSON (a subset of YAML) to `staging_info.yml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingInfo {
  #[serde(default)]
  pub detected_buildpack: String,
  #[serde(default)]
  pub start_command: String,
}

/// Process types reported by the terminal buildpack's `bin/release`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
  #[serde(default)]
  pub default_process_types: BTreeMap<String, String>,
}

impl ReleaseDescriptor {
  pub fn web(&self) -> Option<&str> {
    self
      .default_process_types
      .get("web")
      .map(String::as_str)
      .filter(|cmd| !cmd.is_empty())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleMetadata {
  pub buildpack_key: String,
  pub detected_buildpack: String,
}

/// Result metadata handed back to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingResult {
  pub lifecycle_metadata: LifecycleMetadata,
  pub process_types: BTreeMap<String, String>,
  pub execution_metadata: String,
  pub lifecycle_type: String,
}

impl StagingResult {
  pub fn new(process_types: BTreeMap<String, String>, lifecycle_metadata: LifecycleMetadata) -> Self {
    Self {
      lifecycle_metadata,
      process_types,
      execution_metadata: String::new(),
      lifecycle_type: "buildpack".to_string(),
    }
  }
}

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
  /// Path of the written `staging_info.yml`.
  pub staging_info: PathBuf,
  /// Deps root the buildpacks wrote into, when the chain ran at all.
  pub deps_dir: Option<PathBuf>,
  pub release: ReleaseDescriptor,
  /// Reference of the buildpack that compiled the app.
  pub buildpack_key: String,
  pub detect_output: String,
  /// What the cache prune removed before any buildpack ran.
  pub cache_prune: PruneStats,
}

/// Position of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Init,
  Downloading,
  CacheClean,
  Supply(usize),
  Detect,
  SkipDetect,
  Compile,
  ProcfileRead,
  Release,
  Done,
  Failed,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Stage::Init => write!(f, "init"),
      Stage::Downloading => write!(f, "downloading"),
      Stage::CacheClean => write!(f, "cache-clean"),
      Stage::Supply(i) => write!(f, "supply[{}]", i),
      Stage::Detect => write!(f, "detect"),
      Stage::SkipDetect => write!(f, "skip-detect"),
      Stage::Compile => write!(f, "compile"),
      Stage::ProcfileRead => write!(f, "procfile-read"),
      Stage::Release => write!(f, "release"),
      Stage::Done => write!(f, "done"),
      Stage::Failed => write!(f, "failed"),
    }
  }
}
