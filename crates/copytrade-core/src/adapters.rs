//! Concrete, boring adapters for the `StateStore` and `AlertSink` seams —
//! a local file for durable state, `tracing` for operator notifications.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::traits::{AlertSink, Severity, StateStore};
use crate::{Error, Result};

/// `StateStore` backed by one file per key under a directory, written via
/// write-to-temp + `sync_all` + rename so a crash mid-write never leaves a
/// half-written file behind (§6: atomic persistence requirement).
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe = key.replace(['/', '\\'], "_");
        self.dir.join(format!("{safe}.json"))
    }

    fn tmp_path_for(&self, key: &str) -> PathBuf {
        let safe = key.replace(['/', '\\'], "_");
        self.dir.join(format!("{safe}.json.tmp"))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::StateCorruption(format!("failed to read {}: {e}", path.display()))),
        }
    }

    async fn store(&self, key: &str, bytes: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::StateCorruption(format!("failed to create state dir: {e}")))?;

        let tmp_path = self.tmp_path_for(key);
        let final_path = self.path_for(key);

        let file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| Error::StateCorruption(format!("failed to create {}: {e}", tmp_path.display())))?;

        write_and_sync(file, bytes).await?;

        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| Error::StateCorruption(format!("failed to rename into {}: {e}", final_path.display())))?;

        Ok(())
    }
}

async fn write_and_sync(mut file: tokio::fs::File, bytes: &[u8]) -> Result<()> {
    use tokio::io::AsyncWriteExt;
    file.write_all(bytes)
        .await
        .map_err(|e| Error::StateCorruption(format!("failed to write state bytes: {e}")))?;
    file.sync_all()
        .await
        .map_err(|e| Error::StateCorruption(format!("failed to fsync state file: {e}")))?;
    Ok(())
}

impl std::fmt::Debug for FileStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStateStore").field("dir", &self.dir).finish()
    }
}

/// `AlertSink` that logs at a severity-derived `tracing` level. Suitable as a
/// default when no external paging integration is configured.
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn notify(&self, severity: Severity, event: &str, context: &str) {
        match severity {
            Severity::Low => info!(event, context, "alert"),
            Severity::Medium => warn!(event, context, "alert"),
            Severity::High => error!(event, context, "alert"),
        }
    }
}
