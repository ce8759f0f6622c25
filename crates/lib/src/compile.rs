//! End-to-end staging.
//!
//! `compile` loads the chain config from the build directory, moves the app
//! into a scratch workspace, runs the chain, writes the release descriptor and
//! the optional archives, and finally moves the app (with its folded deps)
//! back into place.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::cache::PruneStats;
use crate::chain::{ChainOutcome, ChainRunner, ReleaseDescriptor, Runner, RunnerOptions};
use crate::config::ChainConfig;
use crate::droplet::{ArchiveInfo, archive_cache, assemble_droplet};
use crate::error::StageError;
use crate::log::StepLog;
use crate::platform::paths;
use crate::release::write_start_command;
use crate::staging::StagingArea;
use crate::util::fs::remove_path;

/// Inputs for a staging run.
#[derive(Debug, Clone)]
pub struct StageOptions {
  pub build_dir: PathBuf,
  pub cache_dir: PathBuf,
  /// Parent of the scratch and downloads directories.
  pub temp_root: PathBuf,
  pub buildpacks_dir: PathBuf,
  pub skip_detect: bool,
  pub skip_cert_verify: bool,
  /// Where the release descriptor for `bin/release` is written.
  pub release_output: PathBuf,
  pub droplet: Option<PathBuf>,
  pub build_artifacts_cache: Option<PathBuf>,
  pub result_metadata: Option<PathBuf>,
}

impl StageOptions {
  pub fn new(build_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
    Self {
      build_dir: build_dir.into(),
      cache_dir: cache_dir.into(),
      temp_root: paths::temp_root(),
      buildpacks_dir: paths::buildpacks_dir(),
      skip_detect: true,
      skip_cert_verify: false,
      release_output: paths::release_output(),
      droplet: None,
      build_artifacts_cache: None,
      result_metadata: None,
    }
  }

  fn runner_options(&self) -> RunnerOptions {
    RunnerOptions {
      skip_detect: self.skip_detect,
      skip_cert_verify: self.skip_cert_verify,
      buildpacks_dir: self.buildpacks_dir.clone(),
      result_metadata: self.result_metadata.clone(),
    }
  }
}

/// What a successful staging run produced.
#[derive(Debug, Clone)]
pub struct StageReport {
  pub release: ReleaseDescriptor,
  pub release_output: PathBuf,
  /// Folded deps directory inside the restored build directory.
  pub deps_dir: PathBuf,
  pub buildpack_key: String,
  pub detect_output: String,
  pub cache_prune: PruneStats,
  pub droplet: Option<ArchiveInfo>,
  pub build_artifacts_cache: Option<ArchiveInfo>,
}

/// Stage the app at `options.build_dir` with the chain it declares.
pub async fn compile(options: &StageOptions, log: &StepLog) -> Result<StageReport, StageError> {
  let chain = ChainConfig::load(&options.build_dir)?;
  info!(build_dir = %options.build_dir.display(), buildpacks = chain.len(), "staging app");

  let area = StagingArea::prepare(&options.build_dir, &options.temp_root, log.clone())?;
  let runner = ChainRunner::new(
    area.context(&options.cache_dir, chain),
    options.runner_options(),
    log.clone(),
  );

  stage_with(area, &runner, options, log).await
}

/// Drive `runner` inside an already prepared staging area.
///
/// The area is always released: finalized on success, abandoned on any
/// failure. Outputs are only written once the deps directory is known, and
/// are removed again if a later step fails.
pub async fn stage_with<R: Runner>(
  area: StagingArea,
  runner: &R,
  options: &StageOptions,
  log: &StepLog,
) -> Result<StageReport, StageError> {
  let outcome = match runner.run().await {
    Ok(outcome) => outcome,
    Err(e) => {
      log.error(&format!("Unable to run all buildpacks: {}", e));
      abandon(area, log);
      return Err(e.into());
    }
  };

  let deps = match area.resolve_deps(outcome.deps_dir.as_deref()) {
    Ok(deps) => deps,
    Err(e) => {
      log.error(&format!("Unable to locate deps directory: {}", e));
      abandon(area, log);
      return Err(e.into());
    }
  };

  let mut written = Vec::new();
  let outputs = match write_outputs(&area, &deps, &outcome, options, &mut written) {
    Ok(outputs) => outputs,
    Err(e) => {
      log.error(&format!("Unable to write staging outputs: {}", e));
      discard_outputs(&written);
      abandon(area, log);
      return Err(e);
    }
  };

  let deps_dir = match area.finalize(Some(&deps)) {
    Ok(deps_dir) => deps_dir,
    Err(e) => {
      log.error(&format!("Unable to finish staging: {}", e));
      discard_outputs(&written);
      return Err(e.into());
    }
  };

  Ok(StageReport {
    release: outputs.release,
    release_output: options.release_output.clone(),
    deps_dir,
    buildpack_key: outcome.buildpack_key,
    detect_output: outcome.detect_output,
    cache_prune: outcome.cache_prune,
    droplet: outputs.droplet,
    build_artifacts_cache: outputs.build_artifacts_cache,
  })
}

struct Outputs {
  release: ReleaseDescriptor,
  droplet: Option<ArchiveInfo>,
  build_artifacts_cache: Option<ArchiveInfo>,
}

/// Write the release descriptor and the requested archives, recording each
/// path in `written` as soon as it exists.
fn write_outputs(
  area: &StagingArea,
  deps: &Path,
  outcome: &ChainOutcome,
  options: &StageOptions,
  written: &mut Vec<PathBuf>,
) -> Result<Outputs, StageError> {
  let release = write_start_command(&outcome.staging_info, &options.release_output)?;
  written.push(options.release_output.clone());

  let droplet = match &options.droplet {
    Some(path) => {
      let info = assemble_droplet(area.staging_root(), deps, path)?;
      written.push(info.path.clone());
      Some(info)
    }
    None => None,
  };

  let build_artifacts_cache = match &options.build_artifacts_cache {
    Some(path) => {
      let info = archive_cache(&options.cache_dir, path)?;
      written.push(info.path.clone());
      Some(info)
    }
    None => None,
  };

  Ok(Outputs {
    release,
    droplet,
    build_artifacts_cache,
  })
}

fn discard_outputs(written: &[PathBuf]) {
  for path in written {
    match remove_path(path) {
      Ok(()) => debug!(path = %path.display(), "removed output of failed run"),
      Err(e) => warn!(path = %path.display(), error = %e, "failed to remove output of failed run"),
    }
  }
}

fn abandon(area: StagingArea, log: &StepLog) {
  if let Err(e) = area.abandon() {
    warn!(error = %e, "failed to restore build directory");
    log.error(&format!("Unable to restore build directory: {}", e));
  }
}
