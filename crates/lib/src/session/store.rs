//! Filesystem credential store: one directory per number under the sessions root.

use super::SessionError;
use crate::client::Credentials;
use std::path::PathBuf;

const CREDS_FILE: &str = "creds.json";

/// Persists [`Credentials`] at `<root>/<number>/creds.json`.
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn session_dir(&self, number: &str) -> PathBuf {
        self.root.join(number)
    }

    pub fn exists(&self, number: &str) -> bool {
        self.session_dir(number).is_dir()
    }

    /// Create the session directory if absent and return stored credentials (or fresh ones,
    /// written immediately).
    pub async fn load_or_init(&self, number: &str) -> Result<Credentials, SessionError> {
        let dir = self.session_dir(number);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| SessionError::Io {
                path: dir.clone(),
                source,
            })?;
        let path = dir.join(CREDS_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(s) => serde_json::from_str(&s).map_err(|source| SessionError::Credentials { path, source }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let creds = Credentials::default();
                self.save(number, &creds).await?;
                Ok(creds)
            }
            Err(source) => Err(SessionError::Io { path, source }),
        }
    }

    pub async fn save(&self, number: &str, creds: &Credentials) -> Result<(), SessionError> {
        let dir = self.session_dir(number);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| SessionError::Io {
                path: dir.clone(),
                source,
            })?;
        let path = dir.join(CREDS_FILE);
        let json = serde_json::to_string_pretty(creds).map_err(|source| SessionError::Credentials {
            path: path.clone(),
            source,
        })?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|source| SessionError::Io { path, source })
    }

    /// Numbers whose stored credentials say they completed pairing. Unreadable entries are skipped.
    pub async fn registered_numbers(&self) -> Result<Vec<String>, SessionError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(SessionError::Io {
                    path: self.root.clone(),
                    source,
                })
            }
        };
        let mut numbers = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    return Err(SessionError::Io {
                        path: self.root.clone(),
                        source,
                    })
                }
            };
            let Some(number) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let creds = match tokio::fs::read_to_string(entry.path().join(CREDS_FILE)).await {
                Ok(s) => serde_json::from_str::<Credentials>(&s).ok(),
                Err(_) => None,
            };
            if creds.is_some_and(|c| c.registered) {
                numbers.push(number);
            }
        }
        numbers.sort();
        Ok(numbers)
    }
}
