// Cross-process provisioning lock
//
// `initialization.lock` is created with create_new; whoever creates it owns the provision run.
// The guard removes the file on drop, so every exit path (errors, panics unwinding, cancelled
// futures) releases it. A lock older than the staleness window is treated as abandoned.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::error::InitError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct InitLock {
    path: PathBuf,
}

impl InitLock {
    pub async fn acquire(path: &Path, stale_after: Duration) -> Result<Self, InitError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        match Self::try_create(path).await {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if !Self::is_stale(path, stale_after).await {
                    let holder = Self::read_info(path)
                        .await
                        .map(|i| format!("held by pid {} since {}", i.pid, i.acquired_at))
                        .unwrap_or_else(|| "held by another process".to_string());
                    return Err(InitError::Locked(format!("{:?} is {}", path, holder)));
                }
                warn!(
                    "[PHASE: lock] [STEP: acquire] Reclaiming stale lock {:?} (older than {:?})",
                    path, stale_after
                );
                match tokio::fs::remove_file(path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                // Another process may win the race after removal; that is a normal Locked.
                Self::try_create(path).await.map_err(|e| {
                    if e.kind() == ErrorKind::AlreadyExists {
                        InitError::Locked(format!("{:?} was re-acquired by another process", path))
                    } else {
                        e.into()
                    }
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn try_create(path: &Path) -> std::io::Result<Self> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        // The guard exists from here on so a failed write still removes the file.
        let lock = InitLock {
            path: path.to_path_buf(),
        };
        let info = LockInfo {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let body = serde_json::to_vec(&info).map_err(std::io::Error::other)?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        info!("[PHASE: lock] [STEP: acquire] Acquired {:?}", path);
        Ok(lock)
    }

    async fn is_stale(path: &Path, stale_after: Duration) -> bool {
        match tokio::fs::metadata(path).await {
            Ok(meta) => meta
                .modified()
                .ok()
                .and_then(|m| m.elapsed().ok())
                .map(|age| age > stale_after)
                .unwrap_or(false),
            // Vanished between create_new and here: treat as reclaimable.
            Err(_) => true,
        }
    }

    async fn read_info(path: &Path) -> Option<LockInfo> {
        let bytes = tokio::fs::read(path).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InitLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!("[PHASE: lock] [STEP: release] Released {:?}", self.path),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                "[PHASE: lock] [STEP: release] Failed to remove {:?}: {}",
                self.path, e
            ),
        }
    }
}
