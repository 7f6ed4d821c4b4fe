//! history.rs — append-only logs for analyses, reference articles, feedback and calibration runs.
//!
//! `JsonFileLog` keeps one pretty-printed JSON array per file. Appends are serialized
//! by a per-log async mutex (read all -> push -> write temp -> rename), so concurrent
//! requests never drop each other's records and a crash mid-write leaves the previous
//! file intact. `MemoryLog` backs tests and ephemeral runs.

use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("log {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Append-only ordered collection.
#[async_trait]
pub trait AppendLog<T: Send + 'static>: Send + Sync {
    /// Append one record and return it.
    async fn append(&self, item: T) -> Result<T, StoreError>;

    /// Append many records as a single write.
    async fn append_all(&self, items: Vec<T>) -> Result<usize, StoreError>;

    /// All records in insertion order; empty when nothing was stored yet.
    async fn read_all(&self) -> Result<Vec<T>, StoreError>;

    /// The last `n` records, oldest first.
    async fn last_n(&self, n: usize) -> Result<Vec<T>, StoreError> {
        let mut all = self.read_all().await?;
        let start = all.len().saturating_sub(n);
        Ok(all.split_off(start))
    }
}

/// JSON array file with serialized read-modify-write appends.
#[derive(Debug)]
pub struct JsonFileLog<T> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFileLog<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<T>, StoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    async fn store(&self, all: &[T]) -> Result<(), StoreError> {
        let io_err = |source: io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
        }
        let json = serde_json::to_vec_pretty(all).map_err(|e| io_err(io::Error::other(e)))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl<T> AppendLog<T> for JsonFileLog<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn append(&self, item: T) -> Result<T, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.load().await?;
        all.push(item.clone());
        self.store(&all).await?;
        debug!(path = %self.path.display(), len = all.len(), "appended");
        Ok(item)
    }

    async fn append_all(&self, items: Vec<T>) -> Result<usize, StoreError> {
        if items.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().await;
        let mut all = self.load().await?;
        let n = items.len();
        all.extend(items);
        self.store(&all).await?;
        debug!(path = %self.path.display(), added = n, len = all.len(), "appended batch");
        Ok(n)
    }

    async fn read_all(&self) -> Result<Vec<T>, StoreError> {
        // Readers wait for an in-flight append so they never see a half-applied batch.
        let _guard = self.write_lock.lock().await;
        self.load().await
    }
}

/// In-memory log.
#[derive(Debug)]
pub struct MemoryLog<T> {
    inner: std::sync::Mutex<Vec<T>>,
}

impl<T> Default for MemoryLog<T> {
    fn default() -> Self {
        Self {
            inner: std::sync::Mutex::new(Vec::new()),
        }
    }
}

impl<T> MemoryLog<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Vec<T>) -> Self {
        Self {
            inner: std::sync::Mutex::new(items),
        }
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, Vec<T>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl<T> AppendLog<T> for MemoryLog<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn append(&self, item: T) -> Result<T, StoreError> {
        self.guard().push(item.clone());
        Ok(item)
    }

    async fn append_all(&self, items: Vec<T>) -> Result<usize, StoreError> {
        let n = items.len();
        self.guard().extend(items);
        Ok(n)
    }

    async fn read_all(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.guard().clone())
    }
}
