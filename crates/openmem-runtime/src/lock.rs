use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

const LOCK_FILE_NAME: &str = ".lock";

/// How long a lock holder may go without refreshing before it is presumed
/// dead and the lock reclaimable
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    refreshed_at: DateTime<Utc>,
}

/// Exclusive file lock on the database directory.
///
/// The external-worker path holds this lock while it owns processing; the
/// in-process path refuses to run while a live lock belongs to someone
/// else. A lock whose holder stopped refreshing past the liveness timeout
/// is stale and silently reclaimed.
pub struct StorageLock {
    path: PathBuf,
}

impl StorageLock {
    /// Acquire the lock, failing if a live holder exists
    pub fn acquire(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE_NAME);

        if let Some(info) = read_lock(&path)
            && info.pid != std::process::id()
            && is_live(&info)
        {
            return Err(Error::InvalidOperation(format!(
                "database directory is locked by pid {}",
                info.pid
            )));
        }

        let lock = Self { path };
        lock.refresh()?;
        Ok(lock)
    }

    /// Whether another process currently holds a live lock on the directory
    pub fn held_elsewhere(dir: &Path) -> bool {
        let path = dir.join(LOCK_FILE_NAME);
        match read_lock(&path) {
            Some(info) => info.pid != std::process::id() && is_live(&info),
            None => false,
        }
    }

    /// Heartbeat: re-stamp the lock so liveness probes see a live holder
    pub fn refresh(&self) -> Result<()> {
        let info = LockInfo {
            pid: std::process::id(),
            refreshed_at: Utc::now(),
        };
        let content =
            serde_json::to_string(&info).map_err(|err| Error::Config(err.to_string()))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl Drop for StorageLock {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "failed to release storage lock");
        }
    }
}

fn read_lock(path: &Path) -> Option<LockInfo> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn is_live(info: &LockInfo) -> bool {
    let age = Utc::now().signed_duration_since(info.refreshed_at);
    age.to_std().map(|age| age < LIVENESS_TIMEOUT).unwrap_or(true)
}
