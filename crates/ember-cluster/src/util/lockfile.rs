//! File-based lock with exclusive-create semantics.
//!
//! Serializes concurrent read-modify-write edits to a shared file (e.g. an
//! operator's merged credential bundle). The lock is acquired by creating
//! the lock file exclusively, polling until the current holder removes it.

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;
use tracing::error;

use crate::ClusterError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct Lock {
    name: PathBuf,
}

impl Lock {
    pub fn new(name: impl Into<PathBuf>) -> Self {
        let name = name.into();
        if let Some(parent) = name.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!(path = %name.display(), error = %e, "cannot create lockfile directory");
            }
        }
        Self { name }
    }

    /// Acquire the lock, polling until it is free or the deadline passes.
    pub async fn lock(&self, timeout: Duration) -> Result<LockGuard<'_>, ClusterError> {
        let deadline = Instant::now() + timeout;
        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.name)
            {
                Ok(_) => return Ok(LockGuard { lock: self }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
            if Instant::now() + POLL_INTERVAL > deadline {
                return Err(ClusterError::Store(format!(
                    "timed out waiting for lock {:?}",
                    self.name
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn unlock(&self) {
        let _ = std::fs::remove_file(&self.name);
    }
}

/// Releases the lock on drop.
pub struct LockGuard<'a> {
    lock: &'a Lock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_excludes_second_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.lock");

        let lock = Lock::new(&path);
        let guard = lock.lock(Duration::from_secs(1)).await.unwrap();

        let second = Lock::new(&path);
        assert!(second.lock(Duration::from_millis(250)).await.is_err());

        drop(guard);
        let _reacquired = second.lock(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.lock");
        {
            let lock = Lock::new(&path);
            let _guard = lock.lock(Duration::from_secs(1)).await.unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
