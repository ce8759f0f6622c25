//! Buildpack lifecycle entrypoints.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::source::SourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entrypoint {
  Detect,
  Supply,
  Compile,
  Release,
}

impl Entrypoint {
  pub fn file_name(self) -> &'static str {
    match self {
      Entrypoint::Detect => "detect",
      Entrypoint::Supply => "supply",
      Entrypoint::Compile => "compile",
      Entrypoint::Release => "release",
    }
  }

  pub fn path_in(self, buildpack_dir: &Path) -> PathBuf {
    buildpack_dir.join("bin").join(self.file_name())
  }
}

impl fmt::Display for Entrypoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.file_name())
  }
}

#[derive(Debug, Error)]
pub enum EntrypointError {
  #[error(transparent)]
  Malformed(#[from] SourceError),

  #[error("failed to run '{path}': {source}")]
  Spawn {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("'{path}' exited with {}", describe_exit(.code))]
  Exit { path: PathBuf, code: Option<i32> },
}

fn describe_exit(code: &Option<i32>) -> String {
  match code {
    Some(code) => format!("status {}", code),
    None => "a signal".to_string(),
  }
}

/// Run one entrypoint of the buildpack at `buildpack_dir`.
///
/// stderr is always passed through. stdout is passed through too unless
/// `capture` is set, in which case it is returned.
pub async fn run_entrypoint<I, S>(
  buildpack_dir: &Path,
  entrypoint: Entrypoint,
  args: I,
  capture: bool,
) -> Result<String, EntrypointError>
where
  I: IntoIterator<Item = S>,
  S: AsRef<OsStr>,
{
  let path = entrypoint.path_in(buildpack_dir);
  let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
  debug!(path = %path.display(), args = ?args, "running buildpack entrypoint");

  let mut command = Command::new(&path);
  command
    .args(&args)
    .stdin(Stdio::null())
    .stderr(Stdio::inherit())
    .stdout(if capture { Stdio::piped() } else { Stdio::inherit() });

  let output = command.output().await.map_err(|source| EntrypointError::Spawn {
    path: path.clone(),
    source,
  })?;

  if !output.status.success() {
    return Err(EntrypointError::Exit {
      path,
      code: output.status.code(),
    });
  }

  Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
