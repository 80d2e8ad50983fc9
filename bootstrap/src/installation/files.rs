//! File helpers for the marker, config store and env file.
//!
//! - Async I/O only (tokio)
//! - Writes are all-or-nothing: temp sibling + fsync + rename
//! - Backups are verified by sha256 before the caller is allowed to delete the source
//! - Transient errors (locked files, AV scanners) are retried with backoff

use anyhow::{Context, Result};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::time::{timeout, Duration};

use crate::utils::path_resolver::temp_sibling;

const FILE_OP_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 3;

/// Write `bytes` to `path` so that readers observe either the old or the new content.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let started = Instant::now();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create_dir_all failed: {:?}", parent))?;
    }

    let tmp = temp_sibling(path, &uuid::Uuid::new_v4().simple().to_string());
    let result = async {
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .with_context(|| format!("create failed: {:?}", tmp))?;
        file.write_all(bytes).await.context("write failed")?;
        file.sync_all().await.context("fsync failed")?;
        drop(file);
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("rename {:?} -> {:?} failed", tmp, path))?;
        Ok::<(), anyhow::Error>(())
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result?;

    debug!(
        "[PHASE: files] [STEP: write_atomic] wrote {:?} (bytes={}, duration_ms={})",
        path,
        bytes.len(),
        started.elapsed().as_millis()
    );
    Ok(())
}

pub async fn sha256_file(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("read failed: {:?}", path))?;
    Ok(sha256_hex(&bytes))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn is_transient_fs_error(e: &anyhow::Error) -> bool {
    let msg = format!("{:#}", e).to_ascii_lowercase();
    msg.contains("used by another process")
        || msg.contains("in use")
        || msg.contains("resource busy")
        || msg.contains("temporarily")
        || msg.contains("timed out")
}

/// Backup path for `path`: `<name>.backup-<utc timestamp>`.
pub fn backup_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    path.with_file_name(format!("{}.backup-{}", name, stamp))
}

/// Copy `src` next to itself as a timestamped backup and verify the copy's sha256.
///
/// Returns the backup path. Callers may only remove or overwrite `src` after this succeeds.
pub async fn backup_file(src: &Path) -> Result<PathBuf> {
    let started = Instant::now();
    let expected = sha256_file(src).await?;
    let dst = backup_path_for(src);

    let mut last_err: Option<anyhow::Error> = None;
    for attempt in 1..=MAX_ATTEMPTS {
        match timeout(FILE_OP_TIMEOUT, tokio::fs::copy(src, &dst)).await {
            Ok(Ok(_)) => {
                let actual = sha256_file(&dst).await?;
                if actual != expected {
                    let _ = tokio::fs::remove_file(&dst).await;
                    anyhow::bail!(
                        "backup verification failed for {:?} (sha256 mismatch)",
                        src
                    );
                }
                restrict_permissions(src, &dst).await;
                debug!(
                    "[PHASE: files] [STEP: backup] {:?} -> {:?} (attempt={}, duration_ms={})",
                    src,
                    dst,
                    attempt,
                    started.elapsed().as_millis()
                );
                return Ok(dst);
            }
            Ok(Err(e)) => {
                let err = anyhow::Error::new(e).context("backup copy failed");
                let transient = is_transient_fs_error(&err);
                warn!(
                    "[PHASE: files] [STEP: backup] copy failed (attempt={}, transient={}, src={:?}, err={:#})",
                    attempt, transient, src, err
                );
                last_err = Some(err);
                if !transient {
                    break;
                }
            }
            Err(_) => {
                warn!(
                    "[PHASE: files] [STEP: backup] copy timed out (attempt={}, src={:?})",
                    attempt, src
                );
                last_err = Some(anyhow::anyhow!("backup copy timed out"));
            }
        }

        let backoff_ms = 100_u64.saturating_mul(1_u64 << (attempt - 1));
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("backup copy failed")))
}

/// Backups hold credentials: keep the source's permissions on unix.
async fn restrict_permissions(src: &Path, dst: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = tokio::fs::metadata(src).await {
            let mode = meta.permissions().mode();
            let _ = tokio::fs::set_permissions(dst, std::fs::Permissions::from_mode(mode)).await;
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (src, dst);
    }
}
