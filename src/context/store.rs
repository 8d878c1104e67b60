use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;

/// Key under which the current user is persisted.
pub const USER_KEY: &str = "user";

/// Persistent key/value slot for the cached user (serialized JSON).
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn load(&self) -> Result<Option<String>>;
    async fn save(&self, raw: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// One file per key inside a directory.
pub struct FileUserStore {
    path: PathBuf,
}

impl FileUserStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join(format!("{USER_KEY}.json")),
        }
    }
}

#[async_trait]
impl UserStore for FileUserStore {
    async fn load(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read {}", self.path.display())),
        }
    }

    async fn save(&self, raw: &str) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create {}", dir.display()))?;
        }
        tokio::fs::write(&self.path, raw)
            .await
            .with_context(|| format!("write {}", self.path.display()))
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {}", self.path.display())),
        }
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.slots.lock().map_err(|_| anyhow!("user store poisoned"))
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.slots()?.get(USER_KEY).cloned())
    }

    async fn save(&self, raw: &str) -> Result<()> {
        self.slots()?.insert(USER_KEY.to_string(), raw.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.slots()?.remove(USER_KEY);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileUserStore::new(dir.path().join("cache"));
        assert_eq!(store.load().await.unwrap(), None);

        store.save(r#"{"username":"bob"}"#).await.unwrap();
        assert!(dir.path().join("cache").join("user.json").exists());
        assert_eq!(
            store.load().await.unwrap().as_deref(),
            Some(r#"{"username":"bob"}"#)
        );

        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_store_uses_user_key() {
        let store = MemoryUserStore::new();
        store.save("x").await.unwrap();
        assert_eq!(store.load().await.unwrap().as_deref(), Some("x"));
        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
    }
}
