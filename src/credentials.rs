//! Stored login credential

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::project_dirs;
use crate::error::Error;

/// Supplies the current token and learns when the server rejected it
pub trait CredentialStore: Send + Sync {
    fn get_token(&self) -> Option<String>;

    /// Forget the token so the next run asks for a fresh login
    fn invalidate(&self);
}

/// On-disk credential record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub token: String,
    #[serde(default)]
    pub user: Option<String>,
}

/// Credential kept in a JSON file
pub struct FileCredentialStore {
    path: PathBuf,
    current: RwLock<Option<StoredCredential>>,
}

impl FileCredentialStore {
    /// Open the store at `path`. A missing or unreadable file means no token.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<StoredCredential>(&contents) {
                Ok(cred) if !cred.token.is_empty() => Some(cred),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("Ignoring malformed token file {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!("Cannot read token file {}: {}", path.display(), e);
                None
            }
        };
        Self {
            path,
            current: RwLock::new(current),
        }
    }

    /// `<config dir>/token.json`
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("token.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn user(&self) -> Option<String> {
        self.current.read().as_ref().and_then(|c| c.user.clone())
    }

    /// Persist a new credential
    pub fn save(&self, token: &str, user: Option<&str>) -> Result<(), Error> {
        let cred = StoredCredential {
            token: token.to_string(),
            user: user.map(str::to_string),
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&cred).map_err(|e| Error::Credential(e.to_string()))?;
        std::fs::write(&self.path, json)?;
        *self.current.write() = Some(cred);
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get_token(&self) -> Option<String> {
        self.current.read().as_ref().map(|c| c.token.clone())
    }

    fn invalidate(&self) {
        *self.current.write() = None;
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::info!("Removed rejected token {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Cannot remove token file {}: {}", self.path.display(), e),
        }
    }
}
