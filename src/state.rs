use std::{
    collections::BTreeMap,
    fs, io,
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to read state file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("state file {path} is corrupt: {source}")]
    Corrupt { path: PathBuf, source: serde_json::Error },

    #[error("failed to write state file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// account -> shortcode of the last delivered post
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeenState(BTreeMap<String, String>);

impl SeenState {
    /// Missing file is an empty state; an unreadable or corrupt one is an error.
    pub fn load(path: &Path) -> Result<Self, StateError> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(StateError::Read { path: path.into(), source });
            }
        };

        serde_json::from_slice(&bytes).map_err(|source| StateError::Corrupt {
            path: path.into(),
            source,
        })
    }

    /// Replaces the file atomically (temp file in the same dir, then rename).
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        let write_err = |source: io::Error| StateError::Write { path: path.into(), source };

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(write_err)?;

        let json = serde_json::to_string_pretty(self).map_err(io::Error::from).map_err(write_err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(json.as_bytes()).map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;

        Ok(())
    }

    pub fn get(&self, account: &str) -> Option<&str> {
        self.0.get(account).map(String::as_str)
    }

    pub fn is_seen(&self, account: &str, shortcode: &str) -> bool {
        self.get(account) == Some(shortcode)
    }

    /// Only call after the notification went out.
    pub fn mark_delivered(&mut self, account: &str, shortcode: &str) {
        self.0.insert(account.to_string(), shortcode.to_string());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}
