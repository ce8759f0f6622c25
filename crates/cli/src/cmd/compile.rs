//! Implementation of the `multipack compile` command.
//!
//! Stages the app in place: every supply buildpack in the chain runs first,
//! then the terminal buildpack compiles and releases. Buildpack output streams
//! to stdout as it happens.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::debug;

use multipack_lib::compile::{StageOptions, compile};
use multipack_lib::log::StepLog;

use crate::output::{format_bytes, format_duration, print_stat, print_success};

pub struct CompileArgs {
  pub build_dir: PathBuf,
  pub cache_dir: PathBuf,
  pub detect: bool,
  pub release_output: Option<PathBuf>,
  pub droplet: Option<PathBuf>,
  pub build_artifacts_cache: Option<PathBuf>,
  pub result_metadata: Option<PathBuf>,
  pub skip_cert_verify: bool,
}

pub fn cmd_compile(args: CompileArgs) -> Result<()> {
  let start = Instant::now();

  let mut options = StageOptions::new(args.build_dir, args.cache_dir);
  options.skip_detect = !args.detect;
  options.skip_cert_verify = args.skip_cert_verify;
  options.droplet = args.droplet;
  options.build_artifacts_cache = args.build_artifacts_cache;
  options.result_metadata = args.result_metadata;
  if let Some(path) = args.release_output {
    options.release_output = path;
  }
  debug!(?options, "compile options");

  let log = StepLog::stdout();
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt.block_on(compile(&options, &log))?;

  println!();
  print_success("Staging complete!");
  print_stat("Start command", report.release.web().unwrap_or("(none)"));
  print_stat("Release descriptor", &report.release_output.display().to_string());
  if let Some(droplet) = &report.droplet {
    print_stat("Droplet", &format!("{} ({})", droplet.path.display(), format_bytes(droplet.size)));
  }
  if report.cache_prune.scanned > 0 {
    let prune = &report.cache_prune;
    let mut summary = format!("{} of {} removed", prune.removed, prune.scanned);
    if prune.failed > 0 {
      summary.push_str(&format!(", {} failed", prune.failed));
    }
    print_stat("Cache slots", &summary);
  }
  if let Some(cache) = &report.build_artifacts_cache {
    print_stat("Cache archive", &format!("{} ({})", cache.path.display(), format_bytes(cache.size)));
  }
  print_stat("Duration", &format_duration(start.elapsed()));

  Ok(())
}
