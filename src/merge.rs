// Launch merge coordination across parallel runner processes
//
// Each process drops a lock file while its launch is open. The last process
// to finish waits for sibling locks to disappear and asks the service to
// merge all launches sharing the launch name.

use crate::client::{ItemHandle, ReportingClient};
use crate::config::ReporterOptions;
use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const LOCK_SUFFIX: &str = ".tmp";
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(500);
const LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Directory holding the in-progress lock files for one machine.
#[derive(Debug, Clone)]
pub struct MergeLockDir {
    dir: PathBuf,
}

impl MergeLockDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Lock files live in the process working directory by default, so
    /// sibling runner processes started from the same place see each other.
    pub fn in_cwd() -> Self {
        Self::new(".")
    }

    fn lock_prefix(launch: &str) -> String {
        format!("rplaunch-{launch}-")
    }

    fn lock_path(&self, launch: &str, handle: &ItemHandle) -> PathBuf {
        self.dir
            .join(format!("{}{}{LOCK_SUFFIX}", Self::lock_prefix(launch), handle))
    }

    /// Mark this launch as in progress.
    pub fn create(&self, launch: &str, handle: &ItemHandle) -> Result<()> {
        let path = self.lock_path(launch, handle);
        std::fs::write(&path, "")
            .with_context(|| format!("Failed to create merge lock file: {}", path.display()))?;
        Ok(())
    }

    /// Remove this launch's lock. Missing files are fine; another cleanup
    /// path may have run first.
    pub fn remove(&self, launch: &str, handle: &ItemHandle) -> Result<()> {
        let path = self.lock_path(launch, handle);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove merge lock file: {}", path.display()))?;
        }
        Ok(())
    }

    /// Count launches still in progress for this launch name.
    pub fn in_progress(&self, launch: &str) -> usize {
        let prefix = Self::lock_prefix(launch);
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return 0;
        };
        entries
            .flatten()
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.starts_with(&prefix) && name.ends_with(LOCK_SUFFIX)
            })
            .count()
    }

    /// Wait until no sibling launch holds a lock for this launch name.
    pub async fn wait_for_siblings(&self, launch: &str) -> Result<()> {
        let deadline = Instant::now() + LOCK_WAIT_TIMEOUT;
        while self.in_progress(launch) > 0 {
            if Instant::now() >= deadline {
                bail!("Timed out waiting for launches in progress: {launch}");
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
        Ok(())
    }

    #[allow(dead_code)]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Merge all finished launches sharing the configured launch name.
///
/// Must only run after this process's own launch is closed and its lock
/// removed, otherwise the wait below never terminates.
pub async fn merge_parallel_launches<C: ReportingClient>(
    client: &C,
    options: &ReporterOptions,
    locks: &MergeLockDir,
) -> Result<()> {
    locks.wait_for_siblings(&options.launch).await?;
    client
        .merge_launches(&options.launch)
        .await
        .context("Merge launches request failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_create_and_remove() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let locks = MergeLockDir::new(dir.path());
        let handle = ItemHandle::from("tmp-1");

        locks.create("nightly", &handle).unwrap();
        assert_eq!(locks.in_progress("nightly"), 1);

        locks.remove("nightly", &handle).unwrap();
        assert_eq!(locks.in_progress("nightly"), 0);

        // Removing twice is harmless.
        locks.remove("nightly", &handle).unwrap();
    }

    #[test]
    fn test_in_progress_counts_only_matching_launch() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let locks = MergeLockDir::new(dir.path());

        locks.create("nightly", &ItemHandle::from("tmp-1")).unwrap();
        locks.create("nightly", &ItemHandle::from("tmp-2")).unwrap();
        locks.create("smoke", &ItemHandle::from("tmp-3")).unwrap();

        assert_eq!(locks.in_progress("nightly"), 2);
        assert_eq!(locks.in_progress("smoke"), 1);
        assert_eq!(locks.in_progress("other"), 0);
    }

    #[tokio::test]
    async fn test_wait_for_siblings_returns_when_clear() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let locks = MergeLockDir::new(dir.path());

        locks.wait_for_siblings("nightly").await.unwrap();
    }
}
