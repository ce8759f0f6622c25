//! Persistent per-buildpack cache slots.
//!
//! Each buildpack in the chain gets a cache directory under the platform
//! cache root, named by the hash key of its reference. When the chain has more
//! than one buildpack, the terminal buildpack uses the reserved `primary` slot
//! instead, so its cache survives changes to the terminal reference.
//!
//! Entries of the cache root that no current chain member maps to are pruned
//! before any buildpack runs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::{fs, io};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{BuildpackRef, ChainConfig};
use crate::consts::PRIMARY_SLOT;
use crate::log::StepLog;
use crate::util::fs::remove_path;
use crate::util::hash::ref_key;

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("failed to create cache directory '{path}': {source}")]
  Create {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to read cache directory '{path}': {source}")]
  Enumerate {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Outcome of a prune pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneStats {
  pub scanned: usize,
  pub removed: usize,
  pub failed: usize,
  pub removed_paths: Vec<PathBuf>,
}

/// Maps buildpack references to cache slots under a cache root.
#[derive(Debug, Clone)]
pub struct CacheManager {
  root: PathBuf,
}

impl CacheManager {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn hash_slot(&self, reference: &BuildpackRef) -> PathBuf {
    self.root.join(ref_key(reference.as_str()))
  }

  pub fn primary_slot(&self) -> PathBuf {
    self.root.join(PRIMARY_SLOT)
  }

  /// Slot for the buildpack at `index` in `chain`.
  ///
  /// Panics if `index` is out of bounds.
  pub fn slot_for(&self, chain: &ChainConfig, index: usize) -> PathBuf {
    if chain.is_multi() && index + 1 == chain.len() {
      self.primary_slot()
    } else {
      self.hash_slot(&chain.refs()[index])
    }
  }

  /// Cache directory handed to the terminal buildpack's `bin/compile`.
  pub fn compile_slot(&self, chain: &ChainConfig, terminal: &BuildpackRef) -> PathBuf {
    if chain.is_multi() {
      self.primary_slot()
    } else {
      self.hash_slot(terminal)
    }
  }

  /// Create the cache root if it does not exist yet.
  pub fn ensure_root(&self) -> Result<(), CacheError> {
    ensure_dir(&self.root)
  }

  pub fn ensure_slot(&self, slot: &Path) -> Result<(), CacheError> {
    ensure_dir(slot)
  }

  /// Remove every entry of the cache root that no member of `chain` maps to.
  ///
  /// The `primary` slot is always kept. Failing to list the root aborts; a
  /// single entry that cannot be deleted is reported and skipped.
  pub fn prune_unused(&self, chain: &ChainConfig, log: &StepLog) -> Result<PruneStats, CacheError> {
    self.ensure_root()?;

    let mut keep: HashSet<PathBuf> = (0..chain.len()).map(|i| self.slot_for(chain, i)).collect();
    keep.insert(self.primary_slot());

    let entries = fs::read_dir(&self.root).map_err(|source| CacheError::Enumerate {
      path: self.root.clone(),
      source,
    })?;

    let mut stats = PruneStats::default();
    for entry in entries {
      let entry = entry.map_err(|source| CacheError::Enumerate {
        path: self.root.clone(),
        source,
      })?;
      let path = entry.path();
      stats.scanned += 1;

      if keep.contains(&path) {
        continue;
      }

      debug!(path = %path.display(), "removing unused cache entry");
      match remove_path(&path) {
        Ok(()) => {
          stats.removed += 1;
          stats.removed_paths.push(path);
        }
        Err(e) => {
          warn!(path = %path.display(), error = %e, "failed to remove cache entry");
          log.warning(&format!("Unable to remove cache entry {}: {}", path.display(), e));
          stats.failed += 1;
        }
      }
    }

    info!(
      scanned = stats.scanned,
      removed = stats.removed,
      failed = stats.failed,
      "cache prune complete"
    );
    Ok(stats)
  }
}

fn ensure_dir(path: &Path) -> Result<(), CacheError> {
  fs::create_dir_all(path).map_err(|source| CacheError::Create {
    path: path.to_path_buf(),
    source,
  })
}
