//! Durable cache layer on the local filesystem
//!
//! Each entry is one file named after the SHA-256 of its key. The file is a
//! frame of a small JSON header (key, creation and expiry instants) and the raw
//! value bytes. Writes go to a temp file first and are renamed into place, so a
//! reader never observes a half-written entry.
//!
//! Expired entries are removed lazily on read and actively by
//! [`FileCacheLayer::purge_expired`], which a background sweep can run on an
//! interval.

use crate::cache::codec::{decode_framed, encode_framed};
use crate::cache::errors::{CacheError, CacheResult};
use crate::cache::traits::{CacheLayer, CachedValue};
use crate::config::FileLayerConfig;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const ENTRY_EXTENSION: &str = "cache";
const TEMP_SUFFIX: &str = "partial";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEntryHeader {
    key: String,
    /// Epoch milliseconds
    created_at: i64,
    /// Epoch milliseconds
    expires_at: i64,
}

impl FileEntryHeader {
    fn remaining(&self, now_ms: i64) -> Option<Duration> {
        let remaining = self.expires_at - now_ms;
        (remaining > 0).then(|| Duration::from_millis(remaining as u64))
    }
}

/// Filesystem cache layer
pub struct FileCacheLayer {
    directory: PathBuf,
    shutdown_tx: broadcast::Sender<()>,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for FileCacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCacheLayer")
            .field("directory", &self.directory)
            .field("sweep_running", &self.sweep_handle.lock().is_some())
            .finish()
    }
}

impl FileCacheLayer {
    /// Open (creating if needed) a cache directory
    pub async fn new(directory: impl Into<PathBuf>) -> CacheResult<Self> {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory).await.map_err(|e| {
            CacheError::StorageError(format!(
                "Failed to create cache directory {}: {e}",
                directory.display()
            ))
        })?;

        debug!(directory = %directory.display(), "File cache layer created");

        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            directory,
            shutdown_tx,
            sweep_handle: Mutex::new(None),
        })
    }

    /// Open the configured directory and start the sweep when an interval is set
    pub async fn from_config(config: &FileLayerConfig) -> CacheResult<Self> {
        let layer = Self::new(&config.directory).await?;
        if let Some(interval) = config.sweep_interval() {
            layer.start_sweep(interval);
        }
        Ok(layer)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.directory.join(format!("{digest}.{ENTRY_EXTENSION}"))
    }

    /// Delete every expired or unreadable entry; returns the number removed
    pub async fn purge_expired(&self) -> CacheResult<usize> {
        purge_directory(&self.directory).await
    }

    /// Run [`Self::purge_expired`] every `interval` until [`CacheLayer::shutdown`]
    pub fn start_sweep(&self, interval: Duration) {
        let mut handle = self.sweep_handle.lock();
        if handle.is_some() {
            return;
        }

        let directory = self.directory.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = purge_directory(&directory).await {
                            warn!(error = %e, "File cache sweep failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("File cache sweep received shutdown signal");
                        break;
                    }
                }
            }
        }));

        info!(
            directory = %self.directory.display(),
            interval_ms = interval.as_millis() as u64,
            "File cache sweep started"
        );
    }

    pub fn is_sweep_running(&self) -> bool {
        self.sweep_handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for FileCacheLayer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Read just the frame header of an entry file
async fn read_header(path: &Path) -> CacheResult<Option<FileEntryHeader>> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let file_len = file.metadata().await?.len();
    let header_len = u64::from(file.read_u32().await?);
    if header_len > file_len.saturating_sub(4) {
        return Err(CacheError::SerializationError(format!(
            "entry header declares {header_len} bytes, file holds {file_len}"
        )));
    }
    let mut header = vec![0u8; header_len as usize];
    file.read_exact(&mut header).await?;
    Ok(Some(serde_json::from_slice(&header)?))
}

async fn remove_if_present(path: &Path) -> CacheResult<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn is_entry_file(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(ENTRY_EXTENSION)
}

async fn purge_directory(directory: &Path) -> CacheResult<usize> {
    let now_ms = Utc::now().timestamp_millis();
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(directory).await?;

    while let Some(dir_entry) = entries.next_entry().await? {
        let path = dir_entry.path();
        if !is_entry_file(&path) {
            continue;
        }

        let expired = match read_header(&path).await {
            Ok(Some(header)) => header.remaining(now_ms).is_none(),
            Ok(None) => false,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Removing unreadable cache entry");
                true
            }
        };

        if expired && remove_if_present(&path).await? {
            removed += 1;
        }
    }

    if removed > 0 {
        debug!(directory = %directory.display(), removed = removed, "Purged expired file cache entries");
    }
    Ok(removed)
}

#[async_trait]
impl CacheLayer for FileCacheLayer {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<CachedValue>> {
        let path = self.entry_path(key);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => Bytes::from(data),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(key = key, "Cache MISS (file)");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let (header, body) = decode_framed::<FileEntryHeader>(&data)?;
        if header.key != key {
            debug!(key = key, "Cache MISS (file, digest collision)");
            return Ok(None);
        }

        match header.remaining(Utc::now().timestamp_millis()) {
            Some(remaining) => {
                debug!(key = key, "Cache HIT (file)");
                Ok(Some(CachedValue::new(body, Some(remaining))))
            }
            None => {
                remove_if_present(&path).await?;
                debug!(key = key, "Cache MISS (file, expired)");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<()> {
        let path = self.entry_path(key);
        let now = Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let header = FileEntryHeader {
            key: key.to_string(),
            created_at: now,
            expires_at: now.saturating_add(ttl_ms),
        };
        let frame = encode_framed(&header, &value)?;

        let temp_path = path.with_extension(format!(
            "{ENTRY_EXTENSION}.{}.{TEMP_SUFFIX}",
            uuid::Uuid::new_v4().simple()
        ));
        tokio::fs::write(&temp_path, &frame).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!(
            key = key,
            size = value.len(),
            ttl_ms = ttl.as_millis() as u64,
            "Cache SET (file)"
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let removed = remove_if_present(&self.entry_path(key)).await?;
        debug!(key = key, removed = removed, "Cache DEL (file)");
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let now_ms = Utc::now().timestamp_millis();
        Ok(read_header(&self.entry_path(key))
            .await?
            .is_some_and(|header| header.key == key && header.remaining(now_ms).is_some()))
    }

    async fn clear(&self) -> CacheResult<()> {
        let mut entries = tokio::fs::read_dir(&self.directory).await?;
        while let Some(dir_entry) = entries.next_entry().await? {
            let path = dir_entry.path();
            if is_entry_file(&path) {
                remove_if_present(&path).await?;
            }
        }
        debug!(directory = %self.directory.display(), "Cache CLEAR (file)");
        Ok(())
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(tokio::fs::metadata(&self.directory)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false))
    }

    /// Stop the background sweep and wait for it to exit
    async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let handle = self.sweep_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "File cache sweep ended abnormally");
            }
            info!(directory = %self.directory.display(), "File cache sweep stopped");
        }
    }
}
