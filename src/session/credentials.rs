//! Persisted credential file.
//!
//! Holds the renewable login key plus optional Steam Guard material. The
//! file is rewritten through a temporary file and a rename so a crash never
//! leaves a truncated credential behind.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common::error::AuthError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard_code: Option<String>,
}

pub struct CredentialStore {
    path: PathBuf,
    credential: Credential,
}

impl CredentialStore {
    /// Read the credential file. A missing file is an empty credential.
    pub async fn load(path: &Path) -> Result<Self, AuthError> {
        let credential = match tokio::fs::read_to_string(path).await {
            Ok(text) if text.trim().is_empty() => Credential::default(),
            Ok(text) => serde_json::from_str(&text).map_err(|e| AuthError::CredentialFormat {
                path: path.display().to_string(),
                message: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No credential file yet");
                Credential::default()
            }
            Err(source) => {
                return Err(AuthError::CredentialIo {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            credential,
        })
    }

    pub fn login_key(&self) -> Option<&str> {
        self.credential.login_key.as_deref()
    }

    pub fn shared_secret(&self) -> Option<&str> {
        self.credential.shared_secret.as_deref()
    }

    /// Remove the one-shot guard code from the file and return it.
    pub async fn take_guard_code(&mut self) -> Result<Option<String>, AuthError> {
        let code = self.credential.guard_code.take();
        if code.is_some() {
            self.save().await?;
        }
        Ok(code)
    }

    pub async fn persist_login_key(&mut self, login_key: &str) -> Result<(), AuthError> {
        self.credential.login_key = Some(login_key.to_string());
        self.save().await?;
        info!(path = %self.path.display(), "Persisted new login key");
        Ok(())
    }

    pub async fn clear_login_key(&mut self) -> Result<(), AuthError> {
        if self.credential.login_key.take().is_some() {
            self.save().await?;
            info!(path = %self.path.display(), "Cleared rejected login key");
        }
        Ok(())
    }

    async fn save(&self) -> Result<(), AuthError> {
        let io_err = |source| AuthError::CredentialIo {
            path: self.path.display().to_string(),
            source,
        };

        let json = serde_json::to_string_pretty(&self.credential).map_err(|e| {
            AuthError::CredentialFormat {
                path: self.path.display().to_string(),
                message: e.to_string(),
            }
        })?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(&dir.path().join("creds.json")).await.unwrap();
        assert_eq!(store.login_key(), None);
        assert_eq!(store.shared_secret(), None);
    }

    #[tokio::test]
    async fn test_login_key_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.json");

        let mut store = CredentialStore::load(&path).await.unwrap();
        store.persist_login_key("key-1").await.unwrap();

        let reloaded = CredentialStore::load(&path).await.unwrap();
        assert_eq!(reloaded.login_key(), Some("key-1"));
        assert!(!dir.path().join("creds.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_guard_code_taken_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.json");
        std::fs::write(&path, r#"{"login_key":"k","guard_code":"ABCDE"}"#).unwrap();

        let mut store = CredentialStore::load(&path).await.unwrap();
        assert_eq!(store.take_guard_code().await.unwrap().as_deref(), Some("ABCDE"));
        assert_eq!(store.take_guard_code().await.unwrap(), None);

        let mut reloaded = CredentialStore::load(&path).await.unwrap();
        assert_eq!(reloaded.take_guard_code().await.unwrap(), None);
        assert_eq!(reloaded.login_key(), Some("k"));
    }

    #[tokio::test]
    async fn test_clear_login_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.json");
        std::fs::write(&path, r#"{"login_key":"stale","shared_secret":"c2VjcmV0"}"#).unwrap();

        let mut store = CredentialStore::load(&path).await.unwrap();
        store.clear_login_key().await.unwrap();

        let reloaded = CredentialStore::load(&path).await.unwrap();
        assert_eq!(reloaded.login_key(), None);
        assert_eq!(reloaded.shared_secret(), Some("c2VjcmV0"));
    }

    #[tokio::test]
    async fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            CredentialStore::load(&path).await,
            Err(AuthError::CredentialFormat { .. })
        ));
    }
}
