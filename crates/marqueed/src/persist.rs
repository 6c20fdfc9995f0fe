//! Persisted presentation hint.
//!
//! A JSON file holding the ids of the switches last shown on. Best-effort
//! only: it seeds the initial render after a restart and is overwritten by
//! the first authoritative reconciliation, so losing or corrupting it never
//! affects correctness.

use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("failed to read hint file {0}: {1}")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("failed to write hint file {0}: {1}")]
    Write(PathBuf, #[source] std::io::Error),

    #[error("hint file {0} is not valid JSON: {1}")]
    Parse(PathBuf, #[source] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct HintFile {
    path: PathBuf,
}

impl HintFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the set of ids last shown on. A missing file is an empty set.
    pub fn load(&self) -> Result<BTreeSet<String>, PersistError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(PersistError::Read(self.path.clone(), e)),
        };

        serde_json::from_str(&contents).map_err(|e| PersistError::Parse(self.path.clone(), e))
    }

    /// Save the set of ids currently shown on.
    pub fn save(&self, on_ids: &BTreeSet<String>) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| PersistError::Write(self.path.clone(), e))?;
        }

        let contents = serde_json::to_string(on_ids)
            .map_err(|e| PersistError::Parse(self.path.clone(), e))?;
        std::fs::write(&self.path, contents)
            .map_err(|e| PersistError::Write(self.path.clone(), e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
