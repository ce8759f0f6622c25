mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use multipack_lib::{StageError, exit_codes};

use crate::output::print_error;

/// multipack - runs an ordered chain of buildpacks as one
#[derive(Parser)]
#[command(name = "multipack")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Succeed when the app declares a buildpack chain
  Detect {
    /// App build directory
    build_dir: PathBuf,
  },

  /// Stage the app by running every buildpack in its chain
  Compile {
    /// App build directory
    build_dir: PathBuf,

    /// Persistent cache directory
    cache_dir: PathBuf,

    /// Run bin/detect on each buildpack instead of using the last one
    #[arg(long)]
    detect: bool,

    /// Where to write the release descriptor read by `release`
    #[arg(long)]
    release_output: Option<PathBuf>,

    /// Also package the staged app as a droplet archive
    #[arg(long)]
    droplet: Option<PathBuf>,

    /// Also archive the cache directory
    #[arg(long)]
    build_artifacts_cache: Option<PathBuf>,

    /// Write staging result metadata as JSON
    #[arg(long)]
    result_metadata: Option<PathBuf>,

    /// Accept invalid TLS certificates when downloading buildpacks
    #[arg(long)]
    skip_cert_verify: bool,
  },

  /// Print the release descriptor written by `compile`
  Release {
    /// Release descriptor to print (default: the one `compile` writes)
    file: Option<PathBuf>,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let result: Result<()> = match cli.command {
    Commands::Detect { build_dir } => cmd::cmd_detect(&build_dir),
    Commands::Compile {
      build_dir,
      cache_dir,
      detect,
      release_output,
      droplet,
      build_artifacts_cache,
      result_metadata,
      skip_cert_verify,
    } => cmd::cmd_compile(cmd::CompileArgs {
      build_dir,
      cache_dir,
      detect,
      release_output,
      droplet,
      build_artifacts_cache,
      result_metadata,
      skip_cert_verify,
    }),
    Commands::Release { file } => cmd::cmd_release(file.as_deref()),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      print_error(&format!("{:#}", err));
      ExitCode::from(exit_code(&err))
    }
  }
}

fn exit_code(err: &anyhow::Error) -> u8 {
  let code = err
    .downcast_ref::<StageError>()
    .map(StageError::exit_code)
    .unwrap_or(exit_codes::GENERIC);
  u8::try_from(code).unwrap_or(1)
}
