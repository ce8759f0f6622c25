//! Buildpack chain execution.
//!
//! A run walks a fixed sequence of stages:
//!
//! ```text
//! Init -> Downloading -> CacheClean -> Supply[0..n-2] -> Detect | SkipDetect
//!      -> Compile -> ProcfileRead -> Release -> Done
//! ```
//!
//! Any stage can end the run in `Failed`. Supply buildpacks run strictly in
//! declared order, each one seeing everything its predecessors wrote. Only the
//! terminal buildpack compiles and releases.

pub mod lifecycle;
pub mod procfile;
pub mod types;

use std::ffi::OsStr;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, CacheManager};
use crate::config::{BuildpackRef, ChainConfig};
use crate::consts::STAGING_INFO_FILE;
use crate::error::exit_codes;
use crate::log::StepLog;
use crate::source::{SourceError, SourceResolver, locate_entrypoints};

pub use lifecycle::{Entrypoint, EntrypointError, run_entrypoint};
pub use procfile::read_procfile;
pub use types::{
  ChainOutcome, LifecycleMetadata, ReleaseDescriptor, Stage, StagingContext, StagingInfo, StagingResult,
};

/// Errors that end a chain run.
#[derive(Debug, Error)]
pub enum ChainError {
  #[error(transparent)]
  Source(#[from] SourceError),

  #[error(transparent)]
  Cache(#[from] CacheError),

  #[error("Failed to set up filesystem when generating droplet ({context}): {source}")]
  Setup {
    context: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("Failed to run all supply scripts (buildpack '{buildpack}'): {source}")]
  Supply {
    buildpack: String,
    #[source]
    source: EntrypointError,
  },

  #[error("None of the buildpacks detected a compatible application")]
  DetectNone,

  #[error("None of the buildpacks detected a compatible application ({buildpack}): {source}")]
  DetectMalformed {
    buildpack: String,
    #[source]
    source: SourceError,
  },

  #[error("Failed to compile droplet (buildpack '{buildpack}'): {source}")]
  Compile {
    buildpack: String,
    #[source]
    source: EntrypointError,
  },

  #[error("Failed to read command from Procfile '{path}': {message}")]
  Procfile { path: PathBuf, message: String },

  #[error("Failed to build droplet release (buildpack '{buildpack}'): {source}")]
  Release {
    buildpack: String,
    #[source]
    source: EntrypointError,
  },

  #[error("buildpack's release output invalid (buildpack '{buildpack}'): {source}")]
  ReleaseOutput {
    buildpack: String,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("Failed to write generated metadata '{path}': {source}")]
  Metadata {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("Failed to encode generated metadata: {0}")]
  Encode(#[from] serde_json::Error),
}

impl ChainError {
  /// Process exit code for this failure class.
  pub fn exit_code(&self) -> i32 {
    match self {
      ChainError::Supply { .. } => exit_codes::SUPPLY,
      ChainError::DetectNone | ChainError::DetectMalformed { .. } => exit_codes::DETECT,
      ChainError::Compile { .. } => exit_codes::COMPILE,
      ChainError::Release { .. } | ChainError::ReleaseOutput { .. } => exit_codes::RELEASE,
      _ => exit_codes::GENERIC,
    }
  }
}

/// Something that can run a buildpack chain to completion.
pub trait Runner {
  fn run(&self) -> impl Future<Output = Result<ChainOutcome, ChainError>>;
}

/// Knobs for a chain run.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
  /// Use the terminal buildpack without running any `bin/detect`.
  pub skip_detect: bool,
  pub skip_cert_verify: bool,
  /// Where pre-installed buildpacks live.
  pub buildpacks_dir: PathBuf,
  /// Optional `StagingResult` JSON output.
  pub result_metadata: Option<PathBuf>,
}

impl RunnerOptions {
  pub fn new(buildpacks_dir: impl Into<PathBuf>) -> Self {
    Self {
      skip_detect: true,
      skip_cert_verify: false,
      buildpacks_dir: buildpacks_dir.into(),
      result_metadata: None,
    }
  }
}

/// Selected terminal buildpack.
struct Terminal {
  reference: BuildpackRef,
  dir: PathBuf,
  buildpack_key: String,
  detect_output: String,
}

/// Runs the chain described by a `StagingContext`.
#[derive(Debug)]
pub struct ChainRunner {
  ctx: StagingContext,
  options: RunnerOptions,
  cache: CacheManager,
  resolver: SourceResolver,
  log: StepLog,
  stages: Mutex<Vec<Stage>>,
}

impl ChainRunner {
  pub fn new(ctx: StagingContext, options: RunnerOptions, log: StepLog) -> Self {
    let cache = CacheManager::new(&ctx.cache_root);
    let resolver = SourceResolver::new(&ctx.downloads_root, &options.buildpacks_dir, log.clone())
      .with_skip_cert_verify(options.skip_cert_verify);

    Self {
      ctx,
      options,
      cache,
      resolver,
      log,
      stages: Mutex::new(vec![Stage::Init]),
    }
  }

  /// Stages entered so far, in order.
  pub fn stages(&self) -> Vec<Stage> {
    self.stages.lock().map(|s| s.clone()).unwrap_or_default()
  }

  pub fn current_stage(&self) -> Stage {
    self.stages().last().copied().unwrap_or(Stage::Init)
  }

  fn enter(&self, stage: Stage) {
    debug!(stage = %stage, "entering stage");
    if let Ok(mut stages) = self.stages.lock() {
      stages.push(stage);
    }
  }

  fn chain(&self) -> &ChainConfig {
    &self.ctx.chain
  }

  async fn execute(&self) -> Result<ChainOutcome, ChainError> {
    self.make_directories()?;

    let Some(terminal_ref) = self.chain().terminal().cloned() else {
      info!("empty buildpack chain, nothing to run");
      self.enter(Stage::CacheClean);
      let cache_prune = self.cache.prune_unused(self.chain(), &self.log)?;
      let staging_info = self.save_info("", "")?;
      self.enter(Stage::Done);
      return Ok(ChainOutcome {
        staging_info,
        deps_dir: Some(self.ctx.deps_root.clone()),
        release: ReleaseDescriptor::default(),
        buildpack_key: String::new(),
        detect_output: String::new(),
        cache_prune,
      });
    };

    self.enter(Stage::Downloading);
    let roots = self.download().await?;

    self.enter(Stage::CacheClean);
    let cache_prune = self.cache.prune_unused(self.chain(), &self.log)?;

    self.supply(&roots).await?;

    let terminal = if self.options.skip_detect {
      self.enter(Stage::SkipDetect);
      let root = roots.last().map(PathBuf::as_path).unwrap_or(Path::new(""));
      let dir = locate_entrypoints(root, &terminal_ref).map_err(|source| ChainError::DetectMalformed {
        buildpack: terminal_ref.to_string(),
        source,
      })?;
      Terminal {
        buildpack_key: terminal_ref.to_string(),
        reference: terminal_ref,
        dir,
        detect_output: String::new(),
      }
    } else {
      self.enter(Stage::Detect);
      self.detect(&roots).await?
    };

    self.enter(Stage::Compile);
    self.compile(&terminal).await?;

    self.enter(Stage::ProcfileRead);
    let procfile = read_procfile(&self.ctx.build_dir)?;

    self.enter(Stage::Release);
    let mut release = self.release(&terminal).await?;
    if !procfile.is_empty() {
      release.default_process_types = procfile;
    }

    if release.web().is_none() {
      self.log.warning("No start command specified by buildpack or via Procfile.");
      self.log.warning("App will not start unless a command is provided at runtime.");
    }

    let staging_info = self.save_info(&terminal.detect_output, release.web().unwrap_or(""))?;
    self.save_result(&terminal, &release)?;

    self.enter(Stage::Done);
    Ok(ChainOutcome {
      staging_info,
      deps_dir: Some(self.ctx.deps_root.clone()),
      release,
      buildpack_key: terminal.buildpack_key,
      detect_output: terminal.detect_output,
      cache_prune,
    })
  }

  fn make_directories(&self) -> Result<(), ChainError> {
    let mut dirs = vec![self.ctx.cache_root.clone(), self.ctx.deps_root.clone(), self.ctx.staging_root.clone()];
    if self.chain().is_multi() {
      dirs.push(self.cache.primary_slot());
    }
    for dir in dirs {
      std::fs::create_dir_all(&dir).map_err(|source| ChainError::Setup { context: dir, source })?;
    }
    Ok(())
  }

  /// Fetch every buildpack in order. The first failure aborts.
  async fn download(&self) -> Result<Vec<PathBuf>, ChainError> {
    let mut roots = Vec::with_capacity(self.chain().len());
    for reference in self.chain().refs() {
      roots.push(self.resolver.fetch(reference).await?);
    }
    Ok(roots)
  }

  async fn supply(&self, roots: &[PathBuf]) -> Result<(), ChainError> {
    let width = deps_index_width(self.chain().len());

    for (i, reference) in self.chain().supply_refs().iter().enumerate() {
      self.enter(Stage::Supply(i));
      self.log.begin_step(&format!("Running supply for buildpack {}", reference));

      let dir = locate_entrypoints(&roots[i], reference).map_err(|e| ChainError::Supply {
        buildpack: reference.to_string(),
        source: e.into(),
      })?;

      let index = format!("{:0width$}", i, width = width);
      let deps_subdir = self.ctx.deps_root.join(&index);
      std::fs::create_dir_all(&deps_subdir).map_err(|source| ChainError::Setup {
        context: deps_subdir,
        source,
      })?;

      let slot = self.cache.slot_for(self.chain(), i);
      self.cache.ensure_slot(&slot)?;

      let args = [
        self.ctx.build_dir.as_os_str(),
        slot.as_os_str(),
        OsStr::new(&index),
        self.ctx.deps_root.as_os_str(),
      ];
      run_entrypoint(&dir, Entrypoint::Supply, args, false)
        .await
        .map_err(|source| ChainError::Supply {
          buildpack: reference.to_string(),
          source,
        })?;
    }

    Ok(())
  }

  /// Run `bin/detect` for every buildpack in order; the first success wins.
  async fn detect(&self, roots: &[PathBuf]) -> Result<Terminal, ChainError> {
    for (reference, root) in self.chain().refs().iter().zip(roots) {
      let dir = match locate_entrypoints(root, reference) {
        Ok(dir) => dir,
        Err(e) => {
          warn!(buildpack = %reference, error = %e, "skipping malformed buildpack during detect");
          self.log.warning(&e.to_string());
          continue;
        }
      };

      match run_entrypoint(&dir, Entrypoint::Detect, [self.ctx.build_dir.as_os_str()], true).await {
        Ok(output) => {
          info!(buildpack = %reference, "buildpack detected");
          return Ok(Terminal {
            reference: reference.clone(),
            dir,
            buildpack_key: reference.to_string(),
            detect_output: output.trim_end_matches('\n').to_string(),
          });
        }
        Err(e) => debug!(buildpack = %reference, error = %e, "buildpack did not detect"),
      }
    }

    Err(ChainError::DetectNone)
  }

  async fn compile(&self, terminal: &Terminal) -> Result<(), ChainError> {
    let slot = self.cache.compile_slot(self.chain(), &terminal.reference);
    self.cache.ensure_slot(&slot)?;

    let args = [
      self.ctx.build_dir.as_os_str(),
      slot.as_os_str(),
      OsStr::new(""),
      self.ctx.deps_root.as_os_str(),
    ];
    run_entrypoint(&terminal.dir, Entrypoint::Compile, args, false)
      .await
      .map_err(|source| ChainError::Compile {
        buildpack: terminal.reference.to_string(),
        source,
      })?;
    Ok(())
  }

  async fn release(&self, terminal: &Terminal) -> Result<ReleaseDescriptor, ChainError> {
    let output = run_entrypoint(&terminal.dir, Entrypoint::Release, [self.ctx.build_dir.as_os_str()], true)
      .await
      .map_err(|source| ChainError::Release {
        buildpack: terminal.reference.to_string(),
        source,
      })?;

    if output.trim().is_empty() {
      return Ok(ReleaseDescriptor::default());
    }

    serde_yaml::from_str(&output).map_err(|source| ChainError::ReleaseOutput {
      buildpack: terminal.reference.to_string(),
      source,
    })
  }

  fn save_info(&self, detect_output: &str, start_command: &str) -> Result<PathBuf, ChainError> {
    let info = StagingInfo {
      detected_buildpack: detect_output.to_string(),
      start_command: start_command.to_string(),
    };
    let path = self.ctx.staging_root.join(STAGING_INFO_FILE);
    write_json(&path, &info)?;
    debug!(path = %path.display(), "wrote staging info");
    Ok(path)
  }

  fn save_result(&self, terminal: &Terminal, release: &ReleaseDescriptor) -> Result<(), ChainError> {
    let Some(path) = &self.options.result_metadata else {
      return Ok(());
    };

    let result = StagingResult::new(
      release.default_process_types.clone(),
      LifecycleMetadata {
        buildpack_key: terminal.buildpack_key.clone(),
        detected_buildpack: terminal.detect_output.clone(),
      },
    );
    write_json(path, &result)
  }
}

impl Runner for ChainRunner {
  async fn run(&self) -> Result<ChainOutcome, ChainError> {
    info!(buildpacks = self.chain().len(), skip_detect = self.options.skip_detect, "running buildpack chain");

    let result = self.execute().await;
    if let Err(e) = &result {
      warn!(stage = %self.current_stage(), error = %e, "buildpack chain failed");
      self.enter(Stage::Failed);
    }
    result
  }
}

/// Width of the zero-padded deps index for a chain of `len` buildpacks:
/// the digit count of the largest supply index, at least 1.
pub fn deps_index_width(len: usize) -> usize {
  len.saturating_sub(2).to_string().len()
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), ChainError> {
  let mut json = serde_json::to_string(value)?;
  json.push('\n');

  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).map_err(|source| ChainError::Metadata {
      path: path.to_path_buf(),
      source,
    })?;
  }
  std::fs::write(path, json).map_err(|source| ChainError::Metadata {
    path: path.to_path_buf(),
    source,
  })
}
