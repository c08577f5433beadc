//! On-disk artifact storage
//!
//! Each request identity owns two published files under the storage root:
//! `{identity}.rsc` (transformed content) and `{identity}.rsm` (metadata
//! sidecar). Every execution downloads and transforms into its own staging
//! files, `{identity}.{execution}.rst` and `{identity}.{execution}.out.rst`,
//! and publishes by rename. Executions racing on one identity never write to,
//! or clean up, each other's files.

use crate::constants::artifacts::{CONTENT_EXTENSION, METADATA_EXTENSION, TEMP_EXTENSION};
use crate::identity::RequestIdentity;
use crate::resource::{ByteStream, FetchError, ResolutionError, ResourceMetaData};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Why an upstream body could not be persisted
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PersistError {
    /// The upstream stream broke or timed out
    #[error(transparent)]
    Stream(FetchError),
    /// The local filesystem rejected the write
    #[error(transparent)]
    Store(ResolutionError),
}

impl From<PersistError> for ResolutionError {
    fn from(error: PersistError) -> Self {
        match error {
            PersistError::Stream(e) => Self::ResourceStreaming(e.to_string()),
            PersistError::Store(e) => e,
        }
    }
}

/// Working files owned by a single execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingPaths {
    /// Raw upstream body
    pub download: PathBuf,
    /// Transform output, renamed to the content path once complete
    pub output: PathBuf,
}

/// Outcome of a stale artifact sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub temp_files_removed: usize,
    pub artifacts_removed: usize,
    pub bytes_reclaimed: u64,
    pub errors: usize,
}

#[derive(Debug, Clone)]
pub struct ResourceStorage {
    root: PathBuf,
}

impl ResourceStorage {
    /// Open (and create if needed) the storage root
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, ResolutionError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            ResolutionError::ResourceProcessing(format!(
                "failed to create storage root {}: {e}",
                root.display()
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fresh staging paths, unique to one execution
    pub fn staging_paths(&self, identity: &RequestIdentity) -> StagingPaths {
        let execution = uuid::Uuid::new_v4().simple();
        let stem = format!("{}.{execution}", identity.as_str());
        StagingPaths {
            download: self.root.join(format!("{stem}.{TEMP_EXTENSION}")),
            output: self.root.join(format!("{stem}.out.{TEMP_EXTENSION}")),
        }
    }

    pub fn content_path(&self, identity: &RequestIdentity) -> PathBuf {
        self.artifact_path(identity, CONTENT_EXTENSION)
    }

    pub fn metadata_path(&self, identity: &RequestIdentity) -> PathBuf {
        self.artifact_path(identity, METADATA_EXTENSION)
    }

    fn artifact_path(&self, identity: &RequestIdentity, extension: &str) -> PathBuf {
        self.root.join(format!("{}.{extension}", identity.as_str()))
    }

    /// Drain `body` into `path`, returning the bytes written.
    ///
    /// The partial file is removed on either kind of failure.
    pub async fn persist_stream(&self, path: &Path, mut body: ByteStream) -> Result<u64, PersistError> {
        let result = async {
            let mut file = tokio::fs::File::create(path)
                .await
                .map_err(|e| PersistError::Store(store_error(path, e)))?;

            let mut written = 0u64;
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(PersistError::Stream)?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| PersistError::Store(store_error(path, e)))?;
                written += chunk.len() as u64;
            }

            file.flush()
                .await
                .map_err(|e| PersistError::Store(store_error(path, e)))?;
            Ok::<u64, PersistError>(written)
        }
        .await;

        match result {
            Ok(written) => {
                debug!(path = %path.display(), bytes = written, "Persisted upstream body");
                Ok(written)
            }
            Err(e) => {
                remove_if_present(path).await;
                Err(e)
            }
        }
    }

    /// Read a finished transform output and publish it as `{identity}.rsc`
    pub async fn commit_content(
        &self,
        identity: &RequestIdentity,
        staged: &Path,
    ) -> Result<Bytes, ResolutionError> {
        let content = tokio::fs::read(staged)
            .await
            .map(Bytes::from)
            .map_err(|e| processing_error(staged, e))?;
        let path = self.content_path(identity);
        tokio::fs::rename(staged, &path)
            .await
            .map_err(|e| processing_error(&path, e))?;
        Ok(content)
    }

    /// Atomically replace `{identity}.rsm`
    pub async fn write_metadata(
        &self,
        identity: &RequestIdentity,
        metadata: &ResourceMetaData,
    ) -> Result<(), ResolutionError> {
        let path = self.metadata_path(identity);
        let json = serde_json::to_vec(metadata).map_err(|e| {
            ResolutionError::ResourceProcessing(format!("failed to serialize metadata: {e}"))
        })?;

        let partial = path.with_extension(format!("{METADATA_EXTENSION}.{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&partial, &json)
            .await
            .map_err(|e| processing_error(&partial, e))?;
        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(processing_error(&path, e));
        }
        Ok(())
    }

    pub async fn read_metadata(
        &self,
        identity: &RequestIdentity,
    ) -> Result<ResourceMetaData, ResolutionError> {
        let path = self.metadata_path(identity);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| processing_error(&path, e))?;
        serde_json::from_slice(&data).map_err(|e| {
            ResolutionError::ResourceProcessing(format!(
                "corrupt metadata sidecar {}: {e}",
                path.display()
            ))
        })
    }

    pub async fn read_content(&self, identity: &RequestIdentity) -> Result<Bytes, ResolutionError> {
        let path = self.content_path(identity);
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| processing_error(&path, e))
    }

    /// Restore content and sidecar, e.g. when a cache hit is served
    pub async fn write_artifacts(
        &self,
        identity: &RequestIdentity,
        content: &Bytes,
        metadata: &ResourceMetaData,
    ) -> Result<(), ResolutionError> {
        let staging = self.staging_paths(identity);
        if let Err(e) = tokio::fs::write(&staging.output, content).await {
            remove_if_present(&staging.output).await;
            return Err(processing_error(&staging.output, e));
        }
        if let Err(e) = self.commit_content(identity, &staging.output).await {
            remove_if_present(&staging.output).await;
            return Err(e);
        }
        self.write_metadata(identity, metadata).await
    }

    pub async fn has_artifacts(&self, identity: &RequestIdentity) -> bool {
        let content = tokio::fs::try_exists(self.content_path(identity)).await;
        let metadata = tokio::fs::try_exists(self.metadata_path(identity)).await;
        matches!((content, metadata), (Ok(true), Ok(true)))
    }

    /// Best-effort removal of one execution's working files
    pub async fn remove_staging(&self, staging: &StagingPaths) {
        remove_if_present(&staging.download).await;
        remove_if_present(&staging.output).await;
    }

    /// Best-effort removal of the published files of `identity`
    pub async fn remove_artifacts(&self, identity: &RequestIdentity) {
        for path in [self.content_path(identity), self.metadata_path(identity)] {
            remove_if_present(&path).await;
        }
    }

    /// Reap orphaned temp files and artifacts older than `max_age`
    pub async fn cleanup_stale(&self, max_age: Duration) -> Result<CleanupReport, ResolutionError> {
        let mut report = CleanupReport::default();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| processing_error(&self.root, e))?;
        let now = SystemTime::now();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| processing_error(&self.root, e))?
        {
            let path = entry.path();
            let Some(extension) = path.extension().and_then(|ext| ext.to_str()) else {
                continue;
            };
            let is_temp = extension == TEMP_EXTENSION;
            if !is_temp && extension != CONTENT_EXTENSION && extension != METADATA_EXTENSION {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to stat artifact");
                    report.errors += 1;
                    continue;
                }
            };

            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    report.bytes_reclaimed += metadata.len();
                    if is_temp {
                        report.temp_files_removed += 1;
                    } else {
                        report.artifacts_removed += 1;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove stale artifact");
                    report.errors += 1;
                }
            }
        }

        info!(
            temp_files_removed = report.temp_files_removed,
            artifacts_removed = report.artifacts_removed,
            bytes_reclaimed = report.bytes_reclaimed,
            errors = report.errors,
            "Stale artifact cleanup completed"
        );
        Ok(report)
    }
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove artifact"),
    }
}

fn store_error(path: &Path, error: std::io::Error) -> ResolutionError {
    ResolutionError::UnableToStoreFetchedResource(format!("{}: {error}", path.display()))
}

fn processing_error(path: &Path, error: std::io::Error) -> ResolutionError {
    ResolutionError::ResourceProcessing(format!("{}: {error}", path.display()))
}
