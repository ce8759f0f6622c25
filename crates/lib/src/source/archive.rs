//! Zip buildpack download and extraction.

use std::fs::{self, File};
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use reqwest::Url;
use tracing::{debug, info, warn};

use super::SourceError;
use crate::util::fs::remove_path;

/// Download `url` and extract it into `dest`.
///
/// Returns the size of the downloaded archive in bytes. On extraction failure
/// the partially populated `dest` is removed so a later run starts clean.
pub async fn download_and_extract(url: &Url, dest: &Path, skip_cert_verify: bool) -> Result<u64, SourceError> {
  info!(url = %url, "downloading buildpack");

  let client = reqwest::Client::builder()
    .danger_accept_invalid_certs(skip_cert_verify)
    .build()
    .map_err(|e| download_error(url, e.to_string()))?;

  let response = client
    .get(url.clone())
    .send()
    .await
    .map_err(|e| download_error(url, e.to_string()))?;

  if !response.status().is_success() {
    return Err(download_error(url, format!("HTTP {}", response.status())));
  }

  let bytes = response
    .bytes()
    .await
    .map_err(|e| download_error(url, e.to_string()))?;
  let size = bytes.len() as u64;
  debug!(url = %url, size, "download complete");

  let dest_owned = dest.to_path_buf();
  let extracted = tokio::task::spawn_blocking(move || extract(Cursor::new(bytes), &dest_owned))
    .await
    .map_err(|e| SourceError::Extract {
      url: url.to_string(),
      message: e.to_string(),
    })?;

  if let Err(message) = extracted {
    if let Err(e) = remove_path(dest) {
      warn!(path = %dest.display(), error = %e, "failed to remove partial extraction");
    }
    return Err(SourceError::Extract {
      url: url.to_string(),
      message,
    });
  }

  Ok(size)
}

fn download_error(url: &Url, message: String) -> SourceError {
  SourceError::Download {
    url: url.to_string(),
    message,
  }
}

/// Extract every entry of a zip archive under `dest`, keeping the archive's
/// own layout. Entries escaping `dest` are rejected.
pub fn extract<R: Read + Seek>(reader: R, dest: &Path) -> Result<(), String> {
  let mut archive = zip::ZipArchive::new(reader).map_err(|e| format!("failed to open zip: {}", e))?;
  fs::create_dir_all(dest).map_err(|e| e.to_string())?;

  for i in 0..archive.len() {
    let mut entry = archive
      .by_index(i)
      .map_err(|e| format!("failed to read zip entry: {}", e))?;

    let rel = entry
      .enclosed_name()
      .ok_or_else(|| format!("invalid zip entry name: {}", entry.name()))?;
    let out = dest.join(rel);

    if entry.is_dir() {
      fs::create_dir_all(&out).map_err(|e| e.to_string())?;
      continue;
    }

    if let Some(parent) = out.parent() {
      fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    let mut file = File::create(&out).map_err(|e| e.to_string())?;
    std::io::copy(&mut entry, &mut file).map_err(|e| e.to_string())?;

    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      if let Some(mode) = entry.unix_mode() {
        fs::set_permissions(&out, fs::Permissions::from_mode(mode)).map_err(|e| e.to_string())?;
      }
    }
  }

  Ok(())
}
