//! Cross-process claim files.
//!
//! A claim is a `<name>.lock` file created with `create_new`, so at most one
//! holder exists across every process sharing the directory. The file is
//! removed when the [`FileClaim`] guard drops. A claim whose file is older
//! than [`STALE_AFTER`] was left behind by a crashed holder and is broken.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::Result;

/// Age after which an abandoned claim file is broken.
pub const STALE_AFTER: Duration = Duration::from_secs(30);

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_DELAY: Duration = Duration::from_millis(20);

/// Exclusive claim on a path, released on drop.
#[derive(Debug)]
pub struct FileClaim {
    path: PathBuf,
}

impl FileClaim {
    /// Claim `target` by creating `target` with a `.lock` extension.
    ///
    /// Waits for a live holder to release; gives up with
    /// [`std::io::ErrorKind::TimedOut`] after ten seconds.
    pub async fn acquire(target: &Path) -> Result<Self> {
        let path = target.with_extension("lock");
        let deadline = Instant::now() + ACQUIRE_TIMEOUT;
        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    let _ = file
                        .write_all(std::process::id().to_string().as_bytes())
                        .await;
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(&path).await {
                        warn!(path = %path.display(), "Breaking stale claim");
                        let _ = tokio::fs::remove_file(&path).await;
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(std::io::Error::new(
                            ErrorKind::TimedOut,
                            format!("timed out waiting for claim {}", path.display()),
                        )
                        .into());
                    }
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileClaim {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn is_stale(path: &Path) -> bool {
    let Ok(metadata) = tokio::fs::metadata(path).await else {
        return false;
    };
    metadata
        .modified()
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map(|age| age > STALE_AFTER)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_claim_is_exclusive_and_released_on_drop() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("s1.json");

        let claim = FileClaim::acquire(&target).await.unwrap();
        assert!(claim.path().exists());
        assert_eq!(claim.path(), temp.path().join("s1.lock"));

        let second = tokio::time::timeout(
            Duration::from_millis(200),
            FileClaim::acquire(&target),
        )
        .await;
        assert!(second.is_err(), "second claim must wait for the first");

        let path = claim.path().to_path_buf();
        drop(claim);
        assert!(!path.exists());
        assert!(FileClaim::acquire(&target).await.is_ok());
    }

    #[tokio::test]
    async fn test_claims_serialize_holders() {
        let temp = TempDir::new().unwrap();
        let target = Arc::new(temp.path().join("shared.json"));
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let (target, inside, peak) = (target.clone(), inside.clone(), peak.clone());
            handles.push(tokio::spawn(async move {
                let _claim = FileClaim::acquire(&target).await.unwrap();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fresh_claim_is_not_stale() {
        let temp = TempDir::new().unwrap();
        let lock = temp.path().join("x.lock");
        std::fs::write(&lock, "123").unwrap();
        assert!(!is_stale(&lock).await);
        assert!(!is_stale(&temp.path().join("missing.lock")).await);
    }
}
