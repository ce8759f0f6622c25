//! Git buildpack cloning.
//!
//! Clones run on a blocking thread: gix's HTTP transport is synchronous.
//! Submodules are cloned recursively and checked out at the commit the
//! superproject records for them.

use std::path::Path;

use gix::refs::transaction::{Change, LogChange, PreviousValue, RefEdit};
use gix::refs::{FullName, Target};
use gix::{ObjectId, Repository};
use tracing::{debug, info, warn};

use super::SourceError;

/// Clone `url` into `dest`, checking out `rev` (a branch or tag) when given.
pub async fn clone(url: &str, rev: Option<&str>, dest: &Path) -> Result<(), SourceError> {
  let url_owned = url.to_string();
  let rev_owned = rev.map(str::to_string);
  let dest_owned = dest.to_path_buf();

  tokio::task::spawn_blocking(move || clone_blocking(&url_owned, rev_owned.as_deref(), &dest_owned))
    .await
    .map_err(|e| clone_error(url, e))?
}

fn clone_blocking(url: &str, rev: Option<&str>, dest: &Path) -> Result<(), SourceError> {
  info!(url, rev = rev.unwrap_or("HEAD"), path = %dest.display(), "cloning buildpack");

  if let Some(parent) = dest.parent() {
    std::fs::create_dir_all(parent)?;
  }

  let mut prepared = gix::prepare_clone(url, dest).map_err(|e| clone_error(url, e))?;
  if let Some(rev) = rev {
    prepared = prepared.with_ref_name(Some(rev)).map_err(|e| clone_error(url, e))?;
  }

  let (mut checkout, _outcome) = prepared
    .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| clone_error(url, e))?;

  let (repo, _outcome) = checkout
    .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| clone_error(url, e))?;

  // A half-initialized clone would be reused by the next fetch.
  if let Err(e) = init_submodules(&repo, url) {
    if let Err(cleanup) = std::fs::remove_dir_all(dest) {
      warn!(path = %dest.display(), error = %cleanup, "failed to remove partial clone");
    }
    return Err(e);
  }

  debug!(url, path = %dest.display(), "clone complete");
  Ok(())
}

/// Clone every submodule recorded in `repo`'s HEAD into its worktree path.
fn init_submodules(repo: &Repository, url: &str) -> Result<(), SourceError> {
  let Some(submodules) = repo.submodules().map_err(|e| clone_error(url, e))? else {
    return Ok(());
  };

  for submodule in submodules {
    let Some(commit) = submodule.head_id().map_err(|e| clone_error(url, e))? else {
      debug!(name = %submodule.name(), "submodule not recorded in HEAD, skipping");
      continue;
    };
    let path = submodule.work_dir().map_err(|e| clone_error(url, e))?;
    let declared = submodule.url().map_err(|e| clone_error(url, e))?.to_bstring().to_string();
    let sub_url = resolve_submodule_url(url, &declared);

    info!(url = %sub_url, commit = %commit, path = %path.display(), "cloning submodule");
    // Checkout may leave an empty placeholder for the gitlink.
    if path.is_dir() {
      std::fs::remove_dir(&path)?;
    }
    clone_at_commit(&sub_url, commit, &path)?;
  }

  Ok(())
}

fn clone_at_commit(url: &str, commit: ObjectId, dest: &Path) -> Result<(), SourceError> {
  let mut prepared = gix::prepare_clone(url, dest).map_err(|e| clone_error(url, e))?;
  let (mut checkout, _outcome) = prepared
    .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| clone_error(url, e))?;

  if !checkout.repo().has_object(commit) {
    return Err(SourceError::SubmoduleCommit {
      url: url.to_string(),
      path: dest.display().to_string(),
      commit: commit.to_string(),
    });
  }
  detach_head(checkout.repo(), url, commit)?;

  let (repo, _outcome) = checkout
    .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| clone_error(url, e))?;

  init_submodules(&repo, url)
}

/// Point HEAD directly at `commit` so the worktree checkout uses it.
fn detach_head(repo: &Repository, url: &str, commit: ObjectId) -> Result<(), SourceError> {
  let name = FullName::try_from("HEAD").map_err(|e| clone_error(url, e))?;
  repo
    .edit_reference(RefEdit {
      change: Change::Update {
        log: LogChange {
          message: format!("checkout: moving to {}", commit).into(),
          ..Default::default()
        },
        expected: PreviousValue::Any,
        new: Target::Object(commit),
      },
      name,
      deref: false,
    })
    .map_err(|e| clone_error(url, e))?;
  Ok(())
}

/// Resolve `./` and `../` submodule URLs against the superproject's remote.
fn resolve_submodule_url(parent: &str, url: &str) -> String {
  if !(url.starts_with("./") || url.starts_with("../")) {
    return url.to_string();
  }

  let mut base = parent.trim_end_matches('/').to_string();
  let mut rest = url;
  loop {
    if let Some(stripped) = rest.strip_prefix("./") {
      rest = stripped;
    } else if let Some(stripped) = rest.strip_prefix("../") {
      if let Some(idx) = base.rfind('/') {
        base.truncate(idx);
      }
      rest = stripped;
    } else {
      break;
    }
  }

  format!("{}/{}", base, rest)
}

fn clone_error(url: &str, e: impl std::error::Error + Send + Sync + 'static) -> SourceError {
  SourceError::Clone {
    url: url.to_string(),
    source: Box::new(e),
  }
}
