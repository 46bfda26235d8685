//! The shared channel registry.
//!
//! Single authoritative store of monitored channels, owned by the core
//! process. The control plane mutates it, the scheduler reads it; all
//! operations go through one async mutex so a poll-cycle read never
//! observes a half-applied mutation. Every mutation is persisted to a JSON
//! file with a write-temp-then-rename, and rolled back in memory if the
//! persist fails — a crash can never leave the file corrupted or the
//! in-memory set ahead of disk.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::utils::fs::write_json_atomic;

/// A monitored live-stream channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    /// Stable external identifier, unique within the registry.
    pub id: String,
    /// Human-readable name as reported by the platform.
    pub display_name: String,
    /// When the channel was added.
    pub added_at: DateTime<Utc>,
}

impl Channel {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            added_at: Utc::now(),
        }
    }
}

/// Errors returned to registry callers.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("channel '{0}' is already registered")]
    AlreadyExists(String),

    #[error("channel '{0}' is not registered")]
    NotFound(String),

    #[error("failed to persist registry: {0}")]
    Persist(#[from] crate::Error),
}

/// In-memory channel set with durable JSON persistence.
pub struct ChannelRegistry {
    path: PathBuf,
    channels: Mutex<Vec<Channel>>,
}

impl ChannelRegistry {
    /// Load the registry from disk. A missing file means an empty set; a
    /// corrupt file is an error (better to stop than to silently forget
    /// every channel).
    pub fn load(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();

        let channels = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no registry file at {}, starting empty", path.display());
                Vec::new()
            }
            Err(e) => return Err(crate::utils::fs::io_error("reading registry", &path, e)),
        };

        Ok(Self {
            path,
            channels: Mutex::new(channels),
        })
    }

    /// Add a channel.
    pub async fn add(&self, channel: Channel) -> Result<(), RegistryError> {
        let mut channels = self.channels.lock().await;

        if channels.iter().any(|c| c.id == channel.id) {
            return Err(RegistryError::AlreadyExists(channel.id));
        }

        channels.push(channel);
        if let Err(e) = self.persist(&channels).await {
            channels.pop();
            return Err(e.into());
        }

        Ok(())
    }

    /// Remove a channel, returning its entry.
    pub async fn remove(&self, id: &str) -> Result<Channel, RegistryError> {
        let mut channels = self.channels.lock().await;

        let Some(index) = channels.iter().position(|c| c.id == id) else {
            return Err(RegistryError::NotFound(id.to_string()));
        };

        let removed = channels.remove(index);
        if let Err(e) = self.persist(&channels).await {
            channels.insert(index, removed);
            return Err(e.into());
        }

        Ok(removed)
    }

    /// Snapshot of all channels in insertion order.
    pub async fn list(&self) -> Vec<Channel> {
        self.channels.lock().await.clone()
    }

    /// Look up a single channel.
    pub async fn get(&self, id: &str) -> Option<Channel> {
        self.channels
            .lock()
            .await
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.channels.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.channels.lock().await.is_empty()
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, channels: &[Channel]) -> crate::Result<()> {
        write_json_atomic(&self.path, &channels).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn registry_in(dir: &tempfile::TempDir) -> ChannelRegistry {
        ChannelRegistry::load(dir.path().join("channels.json")).unwrap()
    }

    #[tokio::test]
    async fn test_add_list_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(&dir);

        registry.add(Channel::new("b", "Bee")).await.unwrap();
        registry.add(Channel::new("a", "Ay")).await.unwrap();

        let ids: Vec<_> = registry.list().await.into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_duplicate_add_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(&dir);

        registry.add(Channel::new("a", "Ay")).await.unwrap();
        let err = registry.add(Channel::new("a", "Again")).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(id) if id == "a"));

        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_unknown_channel() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(&dir);

        let err = registry.remove("ghost").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_remove_returns_entry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(&dir);

        registry.add(Channel::new("a", "Ay")).await.unwrap();
        let removed = registry.remove("a").await.unwrap();
        assert_eq!(removed.display_name, "Ay");
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.json");

        {
            let registry = ChannelRegistry::load(&path).unwrap();
            registry.add(Channel::new("a", "Ay")).await.unwrap();
            registry.add(Channel::new("b", "Bee")).await.unwrap();
            registry.remove("a").await.unwrap();
        }

        let reloaded = ChannelRegistry::load(&path).unwrap();
        let ids: Vec<_> = reloaded.list().await.into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[tokio::test]
    async fn test_corrupt_registry_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(ChannelRegistry::load(&path).is_err());
    }

    #[tokio::test]
    async fn test_concurrent_same_id_adds_exactly_one_wins() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(registry_in(&dir));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.add(Channel::new("same", "Same")).await
            }));
        }

        let mut successes = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => successes += 1,
                Err(RegistryError::AlreadyExists(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(conflicts, 7);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_interleaved_adds_and_removes_never_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(registry_in(&dir));

        let mut handles = Vec::new();
        for round in 0..4 {
            for id in ["x", "y"] {
                let registry = registry.clone();
                handles.push(tokio::spawn(async move {
                    if round % 2 == 0 {
                        let _ = registry.add(Channel::new(id, id)).await;
                    } else {
                        let _ = registry.remove(id).await;
                    }
                }));
            }
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let list = registry.list().await;
        let mut ids: Vec<_> = list.iter().map(|c| c.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), list.len(), "registry contains duplicate ids");
    }
}
