// Per-file advisory locking for the file provider: exclusive lockfile creation,
// bounded retry with back-off on contention, an auto-release timer as a safety
// net for crashed holders, and an unconditional unlink on the primary release
// path (`Drop`).

use crate::error::{Result, StoreError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct LockConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub auto_release_after: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            max_retries: 20,
            retry_delay: Duration::from_millis(50),
            auto_release_after: Duration::from_secs(10),
        }
    }
}

/// A held lock on `<target>.lock`. Dropping it unlinks the lockfile
/// unconditionally; this is the primary release path. The auto-release timer
/// spawned at acquisition time is a safety net only, for a holder that crashes
/// before `Drop` runs.
pub struct FileLock {
    lock_path: PathBuf,
    auto_release: JoinHandle<()>,
}

impl FileLock {
    /// Acquire the lock at `<target>.lock`, retrying with a short back-off on
    /// contention up to `config.max_retries` times.
    pub async fn acquire(target: &Path, config: &LockConfig) -> Result<Self> {
        let lock_path = lock_path_for(target);

        let mut attempt = 0;
        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut file) => {
                    use std::io::Write;
                    let _ = write!(file, "{}", std::process::id());
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    attempt += 1;
                    if attempt > config.max_retries {
                        return Err(StoreError::connection(format!(
                            "failed to acquire lock at {} after {} attempts",
                            lock_path.display(),
                            attempt
                        )));
                    }
                    sleep(config.retry_delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let release_path = lock_path.clone();
        let auto_release_after = config.auto_release_after;
        let auto_release = tokio::spawn(async move {
            sleep(auto_release_after).await;
            let _ = std::fs::remove_file(&release_path);
        });

        Ok(Self {
            lock_path,
            auto_release,
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.auto_release.abort();
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

fn lock_path_for(target: &Path) -> PathBuf {
    let mut lock_path = target.as_os_str().to_owned();
    lock_path.push(".lock");
    PathBuf::from(lock_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn acquire_and_release() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("collection.json");
        let config = LockConfig::default();

        let lock = FileLock::acquire(&target, &config).await.unwrap();
        assert!(lock_path_for(&target).exists());
        drop(lock);
        assert!(!lock_path_for(&target).exists());
    }

    #[tokio::test]
    async fn contention_retries_then_succeeds() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("collection.json");
        let config = LockConfig {
            max_retries: 5,
            retry_delay: Duration::from_millis(10),
            auto_release_after: Duration::from_secs(10),
        };

        let held = FileLock::acquire(&target, &config).await.unwrap();
        let target2 = target.clone();
        let release_after = tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            drop(held);
        });

        let second = FileLock::acquire(&target, &config).await;
        release_after.await.unwrap();
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn drop_cancels_stale_auto_release_timer() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("collection.json");
        let config = LockConfig {
            max_retries: 5,
            retry_delay: Duration::from_millis(5),
            auto_release_after: Duration::from_millis(200),
        };

        let first = FileLock::acquire(&target, &config).await.unwrap();
        drop(first);

        let second = FileLock::acquire(&target, &config).await.unwrap();
        // If the first lock's auto-release timer weren't cancelled on drop, it
        // would fire here and unlink the second holder's lockfile out from
        // under it.
        sleep(Duration::from_millis(250)).await;
        assert!(lock_path_for(&target).exists());
        drop(second);
    }
}
