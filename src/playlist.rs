//! Saved playlists.
//!
//! Playlists belong to a user and hold raw queries; they are resolved only
//! when played, so stored entries never go stale.

use std::{collections::BTreeMap, path::PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{context::UserId, error::Result};

/// A user's playlists by name.
pub type Playlists = BTreeMap<String, Vec<String>>;

/// Key-value storage of playlists.
#[async_trait]
pub trait PlaylistStore: Send + Sync {
    /// Returns the user's playlists, empty if they never saved one.
    async fn get(&self, user: UserId) -> Result<Playlists>;

    /// Replaces the user's playlists.
    async fn set(&self, user: UserId, playlists: Playlists) -> Result<()>;
}

/// Keeps every user's playlists in one JSON document:
/// `{"<user id>": {"<name>": ["<query>", ...]}}`.
pub struct JsonFileStore {
    path: PathBuf,
    // Serialises read-modify-write cycles on the file.
    lock: Mutex<()>,
}

type Document = BTreeMap<String, Playlists>;

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Document> {
        match tokio::fs::read(&self.path).await {
            Ok(contents) if contents.iter().all(u8::is_ascii_whitespace) => Ok(Document::new()),
            Ok(contents) => Ok(serde_json::from_slice(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Document::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl PlaylistStore for JsonFileStore {
    async fn get(&self, user: UserId) -> Result<Playlists> {
        let _guard = self.lock.lock().await;
        let mut document = self.load().await?;
        Ok(document.remove(&user.to_string()).unwrap_or_default())
    }

    async fn set(&self, user: UserId, playlists: Playlists) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.load().await?;
        document.insert(user.to_string(), playlists);

        let json = serde_json::to_vec_pretty(&document)?;
        tokio::fs::write(&self.path, json).await?;
        debug!("saved playlists of {user} to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn missing_file_means_no_playlists() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("playlists.json"));
        assert!(store.get(UserId(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn users_are_kept_apart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playlists.json");
        let store = JsonFileStore::new(&path);

        let mut mine = Playlists::new();
        mine.insert("chill".to_owned(), vec!["lofi".to_owned()]);
        store.set(UserId(1), mine.clone()).await.unwrap();
        store.set(UserId(2), Playlists::new()).await.unwrap();

        assert_eq!(store.get(UserId(1)).await.unwrap(), mine);
        assert!(store.get(UserId(2)).await.unwrap().is_empty());

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["1"]["chill"][0], "lofi");
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playlists.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = JsonFileStore::new(&path).get(UserId(1)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::DataLoss);
    }
}
