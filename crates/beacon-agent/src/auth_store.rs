//! Persistence of the current [`AuthState`] across restarts.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use beacon_core::AuthState;

use crate::error::{AgentError, AgentResult};

/// File name of the persisted auth state inside the data directory.
pub const AUTH_STATE_FILE: &str = "auth_state.json";

/// JSON file holding the last known auth state.
#[derive(Debug, Clone)]
pub struct AuthStore {
    path: PathBuf,
}

impl AuthStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        AuthStore { path: path.into() }
    }

    /// Store at the default location inside `data_dir`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(AUTH_STATE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted state.
    ///
    /// A missing file is `None`. So is a file that no longer decodes; it is
    /// logged and left for the next save to overwrite.
    pub fn load(&self) -> AgentResult<Option<AuthState>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "No persisted auth state");
                return Ok(None);
            }
            Err(e) => return Err(AgentError::MalformedAuthState(e.to_string())),
        };

        match AuthState::from_json(&contents) {
            Ok(state) => {
                info!(user_id = ?state.user_id(), "Loaded persisted auth state");
                Ok(Some(state))
            }
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Ignoring unreadable auth state");
                Ok(None)
            }
        }
    }

    /// Writes `state`, replacing the previous file atomically.
    pub fn save(&self, state: &AuthState) -> AgentResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AgentError::MalformedAuthState(e.to_string()))?;
        }

        let json = state.to_json()?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| AgentError::MalformedAuthState(e.to_string()))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| AgentError::MalformedAuthState(e.to_string()))?;

        debug!(path = ?self.path, "Auth state saved");
        Ok(())
    }

    /// Removes the persisted state.
    pub fn clear(&self) -> AgentResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AgentError::MalformedAuthState(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let store = AuthStore::in_dir(dir.path());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = AuthStore::in_dir(&dir.path().join("nested"));
        let state = AuthState::builder()
            .project_id("radar")
            .user_id("sub-1")
            .token("t")
            .expiration(Utc::now() + Duration::hours(1))
            .build();

        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn test_corrupt_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let store = AuthStore::in_dir(dir.path());
        std::fs::write(store.path(), "{ nope").unwrap();

        assert!(store.load().unwrap().is_none());
    }
}
