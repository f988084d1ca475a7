//! Per-installation client token.
//!
//! The protocol layer sends the same client token on every login from one
//! installation.  It is generated once and stored as a hyphenated UUID in a
//! plain text file.

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientToken(Uuid);

impl ClientToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn uuid(self) -> Uuid {
        self.0
    }

    /// Read the token stored at `path`, creating it (and missing parent
    /// directories) on first use.
    pub fn load_or_create(path: &Path) -> Result<Self, SessionError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let uuid = Uuid::parse_str(contents.trim()).map_err(|e| {
                    SessionError::ClientToken(format!("{} is not a valid token: {e}", path.display()))
                })?;
                Ok(Self(uuid))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let token = Self::generate();
                token.store(path)?;
                log::info!("created client token at {}", path.display());
                Ok(token)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn store(self, path: &Path) -> Result<(), SessionError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, format!("{}\n", self.0.hyphenated()))?;
        Ok(())
    }

    /// `$XDG_DATA_HOME/mc-session/client_token`, falling back to
    /// `$HOME/.local/share`, then the working directory.
    pub fn default_path() -> PathBuf {
        let base = std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("mc-session").join("client_token")
    }
}

impl From<ClientToken> for Uuid {
    fn from(token: ClientToken) -> Self {
        token.0
    }
}

impl std::fmt::Display for ClientToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_once_then_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("client_token");

        let first = ClientToken::load_or_create(&path).unwrap();
        assert!(path.exists());
        let second = ClientToken::load_or_create(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn garbage_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client_token");
        fs::write(&path, "not-a-uuid").unwrap();
        assert!(matches!(
            ClientToken::load_or_create(&path),
            Err(SessionError::ClientToken(_))
        ));
    }

    #[test]
    fn stored_token_round_trips_through_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client_token");
        let token = ClientToken::generate();
        token.store(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), token.to_string());
    }
}
