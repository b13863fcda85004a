use std::{
    collections::BTreeMap,
    fs, io,
    io::Write,
    path::{Path, PathBuf},
};

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};

/// Env var holding base64 of the session file (for hosts where only secrets can be set).
pub const ENV_SESSION_B64: &str = "IG_SESSION_B64";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session file {0} not found")]
    Missing(PathBuf),

    #[error("failed to read session file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("session file {path} is not a cookie object: {source}")]
    Invalid { path: PathBuf, source: serde_json::Error },

    #[error("session file {0} has no sessionid cookie")]
    NoSessionId(PathBuf),
}

/// Instagram login cookies, name -> value.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Session {
    cookies: BTreeMap<String, String>,
}

impl Session {
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SessionError::Missing(path.into()));
            }
            Err(source) => return Err(SessionError::Read { path: path.into(), source }),
        };

        let session: Session = serde_json::from_slice(&bytes).map_err(|source| SessionError::Invalid {
            path: path.into(),
            source,
        })?;

        if session.cookies.get("sessionid").map_or(true, |v| v.is_empty()) {
            return Err(SessionError::NoSessionId(path.into()));
        }

        Ok(session)
    }

    /// `Cookie` header value.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn csrf_token(&self) -> Option<&str> {
        self.cookies.get("csrftoken").map(String::as_str)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Writes the session file from [`ENV_SESSION_B64`] if it is set.
///
/// Returns whether a file was written. Failures are logged only; a missing
/// session is caught later when it is loaded.
pub fn materialize_from_env(path: &Path) -> bool {
    let encoded = match std::env::var(ENV_SESSION_B64) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => return false,
    };

    match write_decoded(encoded.trim(), path) {
        Ok(()) => {
            info!(path = %path.display(), "wrote session file from {ENV_SESSION_B64}");
            true
        }
        Err(e) => {
            error!(error = %e, "failed to decode/write session file");
            false
        }
    }
}

/// Readers never see a half-written file: temp file in the same dir, then rename.
fn write_decoded(encoded: &str, path: &Path) -> anyhow::Result<()> {
    let raw = STANDARD.decode(encoded)?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&raw)?;
    tmp.persist(path)?;
    Ok(())
}
