//! Advisory session persistence.
//!
//! After a successful login the classification is stored under
//! [`SESSION_KEY`] so dashboards can render without re-checking. The record is
//! a cache only: a new login always re-derives the role, and logout removes it.

use async_trait::async_trait;
use pds_types::wallet::WalletAddress;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::role::SessionRecord;

/// Key of the session record kept by a single local client.
pub const SESSION_KEY: &str = "currentUser";

/// Key of the session record owned by one of many remote clients.
pub fn client_session_key(client_id: &str) -> String {
    format!("{SESSION_KEY}-{client_id}")
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid session key {0:?}")]
    InvalidKey(String),
    #[error("Session store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode session record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<SessionRecord>, SessionError>;
    async fn save(&self, key: &str, record: &SessionRecord) -> Result<(), SessionError>;
    async fn invalidate(&self, key: &str) -> Result<(), SessionError>;
}

/// A logged-in wallet and the record persisted for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub address: WalletAddress,
    pub record: SessionRecord,
}

/// Stores each key as `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, SessionError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(SessionError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, key: &str) -> Result<Option<SessionRecord>, SessionError> {
        let path = self.path_for(key)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(SessionError::Io { path, source }),
        };
        match serde_json::from_str(&content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable session record");
                Ok(None)
            }
        }
    }

    async fn save(&self, key: &str, record: &SessionRecord) -> Result<(), SessionError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| SessionError::Io {
                path: self.dir.clone(),
                source,
            })?;
        let content = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|source| SessionError::Io { path, source })
    }

    async fn invalidate(&self, key: &str) -> Result<(), SessionError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SessionError::Io { path, source }),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    records: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, key: &str) -> Result<Option<SessionRecord>, SessionError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, record: &SessionRecord) -> Result<(), SessionError> {
        self.records
            .write()
            .await
            .insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<(), SessionError> {
        self.records.write().await.remove(key);
        Ok(())
    }
}
