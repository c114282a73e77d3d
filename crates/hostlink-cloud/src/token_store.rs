//! Refresh token persistence

use crate::error::{CloudError, CloudResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the persisted refresh token inside the data path
pub const REFRESH_TOKEN_FILE: &str = "refresh-token";

/// Storage backend for the refresh token
#[async_trait]
pub trait TokenStorage: Send + Sync {
    async fn store(&self, token: &str) -> CloudResult<()>;

    /// The stored token, `None` if no handshake ever succeeded
    async fn retrieve(&self) -> CloudResult<Option<String>>;

    async fn delete(&self) -> CloudResult<()>;
}

/// Stores the raw refresh token in `{data_path}/refresh-token`
#[derive(Debug, Clone)]
pub struct FileTokenStorage {
    path: PathBuf,
}

impl FileTokenStorage {
    /// Create storage under `data_path`, creating the directory if needed
    pub fn new(data_path: &Path) -> CloudResult<Self> {
        std::fs::create_dir_all(data_path).map_err(|e| {
            CloudError::TokenStore(format!("Failed to create {}: {e}", data_path.display()))
        })?;

        Ok(Self {
            path: data_path.join(REFRESH_TOKEN_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TokenStorage for FileTokenStorage {
    async fn store(&self, token: &str) -> CloudResult<()> {
        // Write atomically using temp file
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, token).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&temp_path, perms).await?;
        }

        tokio::fs::rename(&temp_path, &self.path).await?;

        debug!("Saved refresh token to {:?}", self.path);
        Ok(())
    }

    async fn retrieve(&self) -> CloudResult<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let token = content.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self) -> CloudResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("Deleted refresh token from {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory token storage
#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }

    /// Current token without going through the async trait
    pub fn current(&self) -> Option<String> {
        self.token.lock().clone()
    }
}

#[async_trait]
impl TokenStorage for MemoryTokenStorage {
    async fn store(&self, token: &str) -> CloudResult<()> {
        *self.token.lock() = Some(token.to_string());
        Ok(())
    }

    async fn retrieve(&self) -> CloudResult<Option<String>> {
        Ok(self.token.lock().clone())
    }

    async fn delete(&self) -> CloudResult<()> {
        *self.token.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_storage_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = FileTokenStorage::new(dir.path()).unwrap();

        assert_eq!(storage.retrieve().await.unwrap(), None);

        storage.store("token-1").await.unwrap();
        assert_eq!(storage.retrieve().await.unwrap().as_deref(), Some("token-1"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join(REFRESH_TOKEN_FILE)).unwrap(),
            "token-1"
        );

        storage.store("token-2").await.unwrap();
        assert_eq!(storage.retrieve().await.unwrap().as_deref(), Some("token-2"));

        storage.delete().await.unwrap();
        assert_eq!(storage.retrieve().await.unwrap(), None);
        storage.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_storage_creates_data_path() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let storage = FileTokenStorage::new(&nested).unwrap();

        storage.store("t").await.unwrap();
        assert!(nested.join(REFRESH_TOKEN_FILE).exists());
        assert!(!nested.join("refresh-token.tmp").exists());
    }

    #[tokio::test]
    async fn test_blank_file_is_absent() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(REFRESH_TOKEN_FILE), "  \n").unwrap();
        let storage = FileTokenStorage::new(dir.path()).unwrap();
        assert_eq!(storage.retrieve().await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let storage = FileTokenStorage::new(dir.path()).unwrap();
        storage.store("secret").await.unwrap();

        let mode = std::fs::metadata(storage.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryTokenStorage::with_token("a");
        assert_eq!(storage.retrieve().await.unwrap().as_deref(), Some("a"));
        storage.delete().await.unwrap();
        assert_eq!(storage.current(), None);
    }
}
