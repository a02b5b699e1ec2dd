//! # Position checkpointing
//!
//! Persistent storage of replication positions so a consumer can resume
//! after a restart.
//!
//! | Store | Use Case |
//! |-------|----------|
//! | `MemoryPositionStore` | Testing, ephemeral consumers |
//! | `FilePositionStore` | Single-node production |
//!
//! [`CheckpointListener`] wires a store into a session: it saves
//! `session.checkpoint_position()` every N delivered mutations and again on
//! disconnect. Positions saved this way always sit on a transaction boundary.
//!
//! ```rust,ignore
//! let store = Arc::new(FilePositionStore::new("/var/lib/sluice/orders.json"));
//! let start = store.load().await?.unwrap_or(Position::Current);
//!
//! session.register_listener(Arc::new(CheckpointListener::new(store.clone(), 500)));
//! session.connect(start).await?;
//! ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::common::{CdcError, Mutation, MutationListener, Position, Result};
use super::SessionHandle;

/// Durable home for the last safe resume position.
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Persist `position`, replacing whatever was stored.
    async fn save(&self, position: &Position) -> Result<()>;

    /// The last saved position, if any.
    async fn load(&self) -> Result<Option<Position>>;
}

/// In-memory store for tests.
#[derive(Debug, Default)]
pub struct MemoryPositionStore {
    position: RwLock<Option<Position>>,
    saves: AtomicU64,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PositionStore for MemoryPositionStore {
    async fn save(&self, position: &Position) -> Result<()> {
        *self.position.write().await = Some(position.clone());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn load(&self) -> Result<Option<Position>> {
        Ok(self.position.read().await.clone())
    }
}

/// JSON file store with atomic replace.
///
/// Writes go to a sibling temp file which is fsynced and renamed over the
/// target, so a crash leaves either the old or the new position.
#[derive(Debug)]
pub struct FilePositionStore {
    path: PathBuf,
    fsync: bool,
}

impl FilePositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fsync: true,
        }
    }

    /// Skip fsync (faster, loses durability on power failure).
    pub fn without_fsync(mut self) -> Self {
        self.fsync = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl PositionStore for FilePositionStore {
    async fn save(&self, position: &Position) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec_pretty(position)?;
        let temp_path = self.temp_path();

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .await?;
        file.write_all(&json).await?;
        if self.fsync {
            file.sync_all().await?;
        }
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        debug!("Saved position {} to {:?}", position, self.path);
        Ok(())
    }

    async fn load(&self) -> Result<Option<Position>> {
        match fs::read(&self.path).await {
            Ok(bytes) => {
                let position = serde_json::from_slice(&bytes).map_err(|e| {
                    CdcError::config(format!(
                        "Corrupt position file {:?}: {}",
                        self.path, e
                    ))
                })?;
                Ok(Some(position))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Listener that persists the session's checkpoint position.
pub struct CheckpointListener {
    store: Arc<dyn PositionStore>,
    every: u64,
    delivered: AtomicU64,
}

impl CheckpointListener {
    /// Save after every `every` delivered mutations (minimum 1) and on disconnect.
    pub fn new(store: Arc<dyn PositionStore>, every: u64) -> Self {
        Self {
            store,
            every: every.max(1),
            delivered: AtomicU64::new(0),
        }
    }

    async fn persist(&self, session: &SessionHandle) -> bool {
        let position = session.checkpoint_position();
        if position.is_current() {
            return true;
        }
        match self.store.save(&position).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to persist checkpoint {}: {}", position, e);
                false
            }
        }
    }

    async fn count(&self, session: &SessionHandle, n: u64) -> bool {
        let before = self.delivered.fetch_add(n, Ordering::Relaxed);
        if (before + n) / self.every > before / self.every {
            self.persist(session).await
        } else {
            true
        }
    }
}

#[async_trait]
impl MutationListener for CheckpointListener {
    async fn on_mutation(&self, session: &SessionHandle, _mutation: &Mutation) -> bool {
        self.count(session, 1).await
    }

    async fn on_mutation_batch(&self, session: &SessionHandle, mutations: &[Mutation]) -> bool {
        self.count(session, mutations.len() as u64).await
    }

    async fn on_disconnect(&self, session: &SessionHandle) {
        self.persist(session).await;
    }
}
