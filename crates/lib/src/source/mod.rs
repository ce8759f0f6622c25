//! Buildpack source resolution.
//!
//! Turns one buildpack reference into a local directory exposing the lifecycle
//! entrypoints (`bin/detect`, `bin/supply`, `bin/compile`, `bin/release`).
//!
//! - Absolute URLs whose last path segment ends in `.zip` are downloaded and
//!   extracted.
//! - Other absolute URLs are cloned as git remotes; a `#fragment` selects the
//!   branch or tag. Submodules are checked out recursively.
//! - Anything else names a buildpack pre-installed by the platform.
//!
//! Remote buildpacks land in `<downloads>/<ref key>/`. The resolver never
//! touches the persistent cache.

pub mod archive;
pub mod git;

use std::path::{Path, PathBuf};

use reqwest::Url;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::BuildpackRef;
use crate::log::StepLog;
use crate::util::hash::ref_key;

/// Errors that can occur while resolving a buildpack source.
#[derive(Debug, Error)]
pub enum SourceError {
  /// HTTP download of a zip buildpack failed.
  #[error("failed to download buildpack '{url}': {message}")]
  Download { url: String, message: String },

  /// The downloaded archive could not be extracted.
  #[error("failed to extract buildpack '{url}': {message}")]
  Extract { url: String, message: String },

  /// Cloning a git buildpack failed.
  #[error("failed to clone buildpack '{url}': {source}")]
  Clone {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  /// A submodule records a commit its remote does not serve.
  #[error("submodule '{path}' of '{url}' records commit {commit}, which the remote does not have")]
  SubmoduleCommit { url: String, path: String, commit: String },

  /// The buildpack directory could not be read.
  #[error("failed to read buildpack directory '{path}' for buildpack '{buildpack}'")]
  Unreadable { buildpack: String, path: PathBuf },

  /// Neither the directory nor its single child contains a `bin` directory.
  #[error("malformed buildpack does not contain a /bin dir: {0}")]
  Malformed(String),

  /// I/O error while preparing the destination.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// How a reference is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
  /// Pre-installed by the platform.
  Local(String),
  /// Downloadable zip archive.
  Zip(Url),
  /// Git remote with an optional branch or tag.
  Git { url: Url, rev: Option<String> },
}

impl SourceKind {
  pub fn classify(reference: &BuildpackRef) -> Self {
    let Ok(mut url) = Url::parse(reference.as_str()) else {
      return Self::Local(reference.as_str().to_string());
    };

    if is_zip_path(url.path()) {
      return Self::Zip(url);
    }

    let rev = url.fragment().filter(|f| !f.is_empty()).map(str::to_string);
    url.set_fragment(None);
    Self::Git { url, rev }
  }
}

fn is_zip_path(path: &str) -> bool {
  path
    .rsplit('/')
    .next()
    .is_some_and(|segment| segment.to_ascii_lowercase().ends_with(".zip"))
}

/// Resolves buildpack references into local directories.
#[derive(Debug, Clone)]
pub struct SourceResolver {
  downloads_dir: PathBuf,
  buildpacks_dir: PathBuf,
  skip_cert_verify: bool,
  log: StepLog,
}

impl SourceResolver {
  pub fn new(downloads_dir: impl Into<PathBuf>, buildpacks_dir: impl Into<PathBuf>, log: StepLog) -> Self {
    Self {
      downloads_dir: downloads_dir.into(),
      buildpacks_dir: buildpacks_dir.into(),
      skip_cert_verify: false,
      log,
    }
  }

  /// Accept invalid TLS certificates when downloading zip buildpacks.
  pub fn with_skip_cert_verify(mut self, skip: bool) -> Self {
    self.skip_cert_verify = skip;
    self
  }

  /// Keyed download destination for a remote reference.
  pub fn destination(&self, reference: &BuildpackRef) -> PathBuf {
    self.downloads_dir.join(ref_key(reference.as_str()))
  }

  /// Make the buildpack's files available locally and return their root.
  ///
  /// Remote references are fetched at most once per downloads directory; a
  /// destination that already exists is reused. Local references are not
  /// checked here; a missing directory surfaces in `locate_entrypoints`.
  pub async fn fetch(&self, reference: &BuildpackRef) -> Result<PathBuf, SourceError> {
    match SourceKind::classify(reference) {
      SourceKind::Local(name) => Ok(self.local_path(&name)),
      SourceKind::Zip(url) => {
        let dest = self.destination(reference);
        if dest.exists() {
          debug!(buildpack = %reference, path = %dest.display(), "buildpack already downloaded");
          return Ok(dest);
        }
        let size = archive::download_and_extract(&url, &dest, self.skip_cert_verify).await?;
        self.log.info(&format!("Downloaded buildpack `{}` ({} bytes)", url, size));
        Ok(dest)
      }
      SourceKind::Git { url, rev } => {
        let dest = self.destination(reference);
        if dest.exists() {
          debug!(buildpack = %reference, path = %dest.display(), "buildpack already cloned");
          return Ok(dest);
        }
        git::clone(url.as_str(), rev.as_deref(), &dest).await?;
        self.log.info(&format!("Cloned buildpack `{}`", reference));
        Ok(dest)
      }
    }
  }

  /// Fetch and validate in one step.
  pub async fn resolve(&self, reference: &BuildpackRef) -> Result<PathBuf, SourceError> {
    let root = self.fetch(reference).await?;
    locate_entrypoints(&root, reference)
  }

  /// Pre-installed buildpacks live either under their name or under the
  /// hash key of their name.
  fn local_path(&self, name: &str) -> PathBuf {
    let named = self.buildpacks_dir.join(name);
    if named.exists() {
      return named;
    }
    let keyed = self.buildpacks_dir.join(ref_key(name));
    info!(buildpack = name, path = %keyed.display(), "using hash-keyed system buildpack path");
    keyed
  }
}

/// Find the directory holding the lifecycle entrypoints.
///
/// Accepts `root` itself when it has a `bin` directory, or its only child when
/// that child has one (archives that wrap everything in a top-level folder).
pub fn locate_entrypoints(root: &Path, reference: &BuildpackRef) -> Result<PathBuf, SourceError> {
  if root.join("bin").is_dir() {
    return Ok(root.to_path_buf());
  }

  let entries = std::fs::read_dir(root).map_err(|_| SourceError::Unreadable {
    buildpack: reference.to_string(),
    path: root.to_path_buf(),
  })?;
  let children: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();

  if let [only] = children.as_slice() {
    if only.join("bin").is_dir() {
      debug!(buildpack = %reference, path = %only.display(), "using nested buildpack directory");
      return Ok(only.clone());
    }
  }

  Err(SourceError::Malformed(reference.to_string()))
}
