//! Token storage backends for persisting sessions.
//!
//! Provides the [`TokenStore`] trait and implementations:
//! - [`FileTokenStore`] - JSON file with 0600 permissions
//! - [`MemoryTokenStore`] - In-memory (testing, embedding)
//!
//! Stores are keyed by account (usually the username) so one file can hold
//! sessions for several accounts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::session::Session;

/// Trait for session storage backends.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the stored session for an account.
    async fn load(&self, account: &str) -> Result<Option<Session>>;

    /// Save the session for an account, replacing any previous one.
    async fn save(&self, account: &str, session: &Session) -> Result<()>;

    /// Remove the stored session for an account.
    async fn remove(&self, account: &str) -> Result<()>;

    /// Name of this storage backend.
    fn name(&self) -> &str {
        "unknown"
    }
}

#[async_trait]
impl<T: TokenStore + ?Sized> TokenStore for std::sync::Arc<T> {
    async fn load(&self, account: &str) -> Result<Option<Session>> {
        (**self).load(account).await
    }
    async fn save(&self, account: &str, session: &Session) -> Result<()> {
        (**self).save(account, session).await
    }
    async fn remove(&self, account: &str) -> Result<()> {
        (**self).remove(account).await
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

/// In-memory session storage.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self, account: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().get(account).cloned())
    }

    async fn save(&self, account: &str, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .insert(account.to_string(), session.clone());
        Ok(())
    }

    async fn remove(&self, account: &str) -> Result<()> {
        self.sessions.write().remove(account);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// File-based session storage using JSON with 0600 permissions.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Create storage at the specified path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, Session>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            ClientError::Storage(format!("{}: {}", self.path.display(), e))
        })?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&content).map_err(ClientError::storage)
    }

    fn write_all(&self, data: &HashMap<String, Session>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ClientError::Storage(format!("{}: {}", parent.display(), e)))?;
        }

        let content = serde_json::to_string_pretty(data).map_err(ClientError::storage)?;
        std::fs::write(&self.path, content)
            .map_err(|e| ClientError::Storage(format!("{}: {}", self.path.display(), e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.path, perms).map_err(|e| {
                ClientError::Storage(format!("chmod {}: {}", self.path.display(), e))
            })?;
        }

        debug!(path = %self.path.display(), "Session saved");
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self, account: &str) -> Result<Option<Session>> {
        let data = self.read_all()?;
        Ok(data.get(account).cloned())
    }

    async fn save(&self, account: &str, session: &Session) -> Result<()> {
        let mut data = self.read_all()?;
        data.insert(account.to_string(), session.clone());
        self.write_all(&data)
    }

    async fn remove(&self, account: &str) -> Result<()> {
        let mut data = self.read_all()?;
        if data.remove(account).is_some() {
            self.write_all(&data)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;
    use chrono::Utc;

    fn sample_session() -> Session {
        Session::issued("access", "refresh", 3600, Utc::now(), Region::China)
            .with_gcid(Some("gcid-42".into()))
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryTokenStore::new();
        assert!(store.load("user").await.unwrap().is_none());

        let session = sample_session();
        store.save("user", &session).await.unwrap();
        assert_eq!(store.load("user").await.unwrap(), Some(session));

        store.remove("user").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("nested").join("tokens.json"));

        let session = sample_session();
        store.save("user", &session).await.unwrap();

        // A second store instance reads what the first one wrote
        let reopened = FileTokenStore::new(store.path().to_path_buf());
        let loaded = reopened.load("user").await.unwrap().unwrap();
        assert_eq!(loaded.access_token, session.access_token);
        assert_eq!(loaded.refresh_token, session.refresh_token);
        assert_eq!(loaded.expires_at, session.expires_at);
        assert_eq!(loaded.gcid, session.gcid);
    }

    #[tokio::test]
    async fn test_file_store_keeps_other_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("tokens.json"));

        store.save("a", &sample_session()).await.unwrap();
        store.save("b", &sample_session()).await.unwrap();
        store.remove("a").await.unwrap();

        assert!(store.load("a").await.unwrap().is_none());
        assert!(store.load("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_store_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, "  \n").unwrap();

        let store = FileTokenStore::new(path);
        assert!(store.load("user").await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("tokens.json"));
        store.save("user", &sample_session()).await.unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
