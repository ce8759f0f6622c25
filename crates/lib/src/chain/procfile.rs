//! App-provided `Procfile`.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use crate::consts::PROCFILE;

use super::ChainError;

/// Read `<build_dir>/Procfile` as a process-type to command mapping.
///
/// A missing Procfile is an empty mapping, as is an empty file.
pub fn read_procfile(build_dir: &Path) -> Result<BTreeMap<String, String>, ChainError> {
  let path = build_dir.join(PROCFILE);

  let content = match std::fs::read_to_string(&path) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
    Err(e) => {
      return Err(ChainError::Procfile {
        path,
        message: e.to_string(),
      });
    }
  };

  if content.trim().is_empty() {
    return Ok(BTreeMap::new());
  }

  serde_yaml::from_str(&content).map_err(|_| ChainError::Procfile {
    path,
    message: "invalid YAML".to_string(),
  })
}
