//! # Temp Resource Tracker
//!
//! Every intermediate file a Job creates is allocated here. A tracker owns one
//! job directory (`job-<millis>-<random>` under the configured temp root) and the
//! list of paths allocated inside it.
//!
//! Paths leave the tracker exactly once: through `release_since` (rolling back a
//! single attempt), `release` (end of the Job), or `Drop` when the tracker is
//! abandoned on an unexpected exit path.

use crate::session::JobId;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// One allocated intermediate path
#[derive(Debug, Clone)]
pub struct TempFileEntry {
    pub path: PathBuf,
    pub job: JobId,
    pub created_at: SystemTime,
}

/// Arena of temp paths owned by a single Job
#[derive(Debug)]
pub struct TempTracker {
    job: JobId,
    dir: PathBuf,
    entries: Vec<TempFileEntry>,
    sequence: u32,
    released: bool,
}

/// Position in the allocation list, used to roll back one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempMark(usize);

const JOB_DIR_PREFIX: &str = "job-";

impl TempTracker {
    /// Create the job directory under `root`
    pub fn create(root: &Path, job: JobId) -> std::io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}{}-{}-", JOB_DIR_PREFIX, millis, job))
            .tempdir_in(root)?
            .into_path();

        debug!(job = %job, dir = %dir.display(), "Allocated job directory");

        Ok(Self {
            job,
            dir,
            entries: Vec::new(),
            sequence: 0,
            released: false,
        })
    }

    pub fn job(&self) -> JobId {
        self.job
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Allocate a fresh path `<seq>-<stem>.<ext>` inside the job directory
    pub fn allocate(&mut self, stem: &str, extension: &str) -> PathBuf {
        self.sequence += 1;
        let name = format!("{:03}-{}.{}", self.sequence, sanitize(stem), extension);
        self.register(self.dir.join(name))
    }

    /// Allocate a path with an exact file name (frame sequences need a fixed pattern)
    pub fn allocate_named(&mut self, file_name: &str) -> PathBuf {
        self.register(self.dir.join(sanitize(file_name)))
    }

    fn register(&mut self, path: PathBuf) -> PathBuf {
        self.entries.push(TempFileEntry {
            path: path.clone(),
            job: self.job,
            created_at: SystemTime::now(),
        });
        path
    }

    pub fn mark(&self) -> TempMark {
        TempMark(self.entries.len())
    }

    /// Paths currently owned by the tracker
    pub fn live_paths(&self) -> Vec<PathBuf> {
        self.entries.iter().map(|e| e.path.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every path allocated after `mark`, returning them
    pub async fn release_since(&mut self, mark: TempMark) -> Vec<PathBuf> {
        if mark.0 >= self.entries.len() {
            return Vec::new();
        }
        let drained: Vec<TempFileEntry> = self.entries.drain(mark.0..).collect();
        let mut cleaned = Vec::with_capacity(drained.len());
        for entry in drained.into_iter().rev() {
            remove_path(&entry.path).await;
            let age = entry.created_at.elapsed().unwrap_or_default();
            debug!(job = %entry.job, "Removed {} after {:.1}s", entry.path.display(), age.as_secs_f64());
            cleaned.push(entry.path);
        }
        cleaned.reverse();
        cleaned
    }

    /// Remove everything the Job allocated plus the job directory
    pub async fn release(mut self) -> Vec<PathBuf> {
        let cleaned = self.release_since(TempMark(0)).await;
        if let Err(e) = tokio::fs::remove_dir_all(&self.dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(job = %self.job, "Failed to remove job directory {}: {}", self.dir.display(), e);
            }
        }
        self.released = true;
        debug!(job = %self.job, count = cleaned.len(), "Released temp paths");
        cleaned
    }
}

impl Drop for TempTracker {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        for entry in self.entries.drain(..) {
            if entry.path.exists() {
                let _ = std::fs::remove_file(&entry.path);
            }
        }
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

async fn remove_path(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove temp file {}: {}", path.display(), e),
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect()
}

/// Remove job directories under `root` older than `max_age`.
///
/// Leftovers only exist when a previous process died mid-job.
pub fn sweep_stale(root: &Path, max_age: Duration) -> usize {
    if !root.exists() {
        return 0;
    }
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
    {
        let name = entry.file_name().to_string_lossy();
        if !name.starts_with(JOB_DIR_PREFIX) {
            continue;
        }
        let age = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age >= max_age && std::fs::remove_dir_all(entry.path()).is_ok() {
            removed += 1;
        }
    }

    if removed > 0 {
        info!("🧹 Removed {} stale job directories from {}", removed, root.display());
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_release_removes_every_path_once() {
        let root = TempDir::new().unwrap();
        let mut tracker = TempTracker::create(root.path(), JobId(1)).unwrap();

        let a = tracker.allocate("source", "mp4");
        let b = tracker.allocate("palette", "png");
        tokio::fs::write(&a, b"a").await.unwrap();
        tokio::fs::write(&b, b"b").await.unwrap();
        let dir = tracker.dir().to_path_buf();

        let cleaned = tracker.release().await;
        assert_eq!(cleaned, vec![a.clone(), b.clone()]);
        assert!(!a.exists());
        assert!(!b.exists());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_release_since_rolls_back_one_attempt() {
        let root = TempDir::new().unwrap();
        let mut tracker = TempTracker::create(root.path(), JobId(2)).unwrap();

        let source = tracker.allocate("source", "gif");
        tokio::fs::write(&source, b"gif").await.unwrap();
        let mark = tracker.mark();
        let out = tracker.allocate("out", "gif");
        tokio::fs::write(&out, b"out").await.unwrap();

        let cleaned = tracker.release_since(mark).await;
        assert_eq!(cleaned, vec![out.clone()]);
        assert!(!out.exists());
        assert!(source.exists());
        assert_eq!(tracker.live_paths(), vec![source.clone()]);

        // Releasing an empty range is a no-op
        assert!(tracker.release_since(tracker.mark()).await.is_empty());
        tracker.release().await;
        assert!(!source.exists());
    }

    #[test]
    fn test_drop_cleans_unreleased_paths() {
        let root = TempDir::new().unwrap();
        let path;
        let dir;
        {
            let mut tracker = TempTracker::create(root.path(), JobId(3)).unwrap();
            path = tracker.allocate("left", "png");
            std::fs::write(&path, b"x").unwrap();
            dir = tracker.dir().to_path_buf();
        }
        assert!(!path.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn test_concurrent_jobs_never_share_directories() {
        let root = TempDir::new().unwrap();
        let first = TempTracker::create(root.path(), JobId(7)).unwrap();
        let second = TempTracker::create(root.path(), JobId(7)).unwrap();
        assert_ne!(first.dir(), second.dir());
    }

    #[test]
    fn test_allocated_names_are_sanitized_and_sequenced() {
        let root = TempDir::new().unwrap();
        let mut tracker = TempTracker::create(root.path(), JobId(4)).unwrap();
        let first = tracker.allocate("my clip", "mp4");
        let second = tracker.allocate("../escape", "mp4");
        assert!(first.file_name().unwrap().to_string_lossy().starts_with("001-my_clip"));
        assert_eq!(second.parent(), Some(tracker.dir()));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_sweep_only_touches_stale_job_dirs() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("job-1-old")).unwrap();
        std::fs::create_dir(root.path().join("keep-me")).unwrap();

        assert_eq!(sweep_stale(root.path(), Duration::from_secs(3600)), 0);
        assert_eq!(sweep_stale(root.path(), Duration::ZERO), 1);
        assert!(!root.path().join("job-1-old").exists());
        assert!(root.path().join("keep-me").exists());
    }
}
