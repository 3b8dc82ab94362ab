//! Per-run ownership of temporary files, owned inputs and child processes.
//!
//! A [`ResourceRegistry`] owns one temporary working directory. Everything a run creates or
//! adopts is registered under a [`ResourceKey`] and released exactly once: explicitly through
//! [`ResourceRegistry::release`], or in reverse registration order by
//! [`ResourceRegistry::release_all`] (which `Drop` also calls). The working directory is
//! removed last.

use std::{
    path::{Path, PathBuf},
    process::{Child, ChildStdin, ChildStdout, ExitStatus, Output},
    time::Duration,
};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::foundation::error::{ExplicateError, ExplicateResult};

/// Bounded retry for deleting files the OS may still hold briefly after close.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

/// Delete `path`, retrying with linear backoff. Returns `true` when the file is gone.
pub fn remove_file_with_retry(path: &Path, policy: RetryPolicy) -> bool {
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        match std::fs::remove_file(path) {
            Ok(()) => return true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return true,
            Err(e) if attempt < attempts => {
                debug!(path = %path.display(), attempt, error = %e, "delete failed, retrying");
                std::thread::sleep(policy.backoff * attempt);
            }
            Err(e) => {
                warn!(path = %path.display(), attempts, error = %e, "giving up on deleting file");
            }
        }
    }
    false
}

/// Handle to one registered resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKey(u64);

#[derive(Debug)]
enum Resource {
    /// File allocated inside the working directory.
    Scratch(PathBuf),
    /// File created elsewhere whose ownership was handed to this run.
    Adopted(PathBuf),
}

impl Resource {
    fn path(&self) -> &Path {
        match self {
            Self::Scratch(p) | Self::Adopted(p) => p,
        }
    }
}

pub struct ResourceRegistry {
    workdir: Option<TempDir>,
    workdir_path: PathBuf,
    entries: Vec<(ResourceKey, Resource)>,
    next_key: u64,
    retry: RetryPolicy,
    released: usize,
}

impl ResourceRegistry {
    /// Create a fresh working directory under `temp_root` (system temp dir when `None`).
    pub fn new(temp_root: Option<&Path>, retry: RetryPolicy) -> ExplicateResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("explicate-run-");
        let dir = match temp_root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|e| {
                    ExplicateError::alignment(format!(
                        "failed to create temp root '{}': {e}",
                        root.display()
                    ))
                })?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| ExplicateError::alignment(format!("failed to create working dir: {e}")))?;

        debug!(workdir = %dir.path().display(), "created run working directory");
        Ok(Self {
            workdir_path: dir.path().to_path_buf(),
            workdir: Some(dir),
            entries: Vec::new(),
            next_key: 0,
            retry,
            released: 0,
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir_path
    }

    /// Reserve a unique path inside the working directory. The file itself is not created.
    pub fn scratch_path(&mut self, stem: &str, extension: &str) -> (ResourceKey, PathBuf) {
        let n = self.next_key;
        let path = self.workdir_path.join(format!("{stem}-{n:04}.{extension}"));
        let key = self.push(Resource::Scratch(path.clone()));
        (key, path)
    }

    /// Take ownership of a file created outside the working directory.
    pub fn adopt(&mut self, path: impl Into<PathBuf>) -> ResourceKey {
        self.push(Resource::Adopted(path.into()))
    }

    fn push(&mut self, resource: Resource) -> ResourceKey {
        let key = ResourceKey(self.next_key);
        self.next_key += 1;
        self.entries.push((key, resource));
        key
    }

    /// Release one resource. Returns `false` when `key` was already released.
    pub fn release(&mut self, key: ResourceKey) -> bool {
        let Some(pos) = self.entries.iter().position(|(k, _)| *k == key) else {
            return false;
        };
        let (_, resource) = self.entries.remove(pos);
        self.dispose(resource);
        true
    }

    /// Stop tracking `key` without deleting its file (ownership moves to the caller).
    pub fn forget(&mut self, key: ResourceKey) -> Option<PathBuf> {
        let pos = self.entries.iter().position(|(k, _)| *k == key)?;
        let (_, resource) = self.entries.remove(pos);
        Some(resource.path().to_path_buf())
    }

    /// Number of resources still registered.
    pub fn live(&self) -> usize {
        self.entries.len()
    }

    /// Number of resources released so far.
    pub fn released(&self) -> usize {
        self.released
    }

    /// Release everything in reverse registration order, then remove the working directory.
    pub fn release_all(&mut self) {
        while let Some((_, resource)) = self.entries.pop() {
            self.dispose(resource);
        }
        if let Some(dir) = self.workdir.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!(workdir = %path.display(), "removed run working directory"),
                Err(e) => warn!(
                    workdir = %path.display(),
                    error = %e,
                    "could not remove run working directory"
                ),
            }
        }
    }

    fn dispose(&mut self, resource: Resource) {
        self.released += 1;
        match resource {
            Resource::Scratch(path) => {
                if let Err(e) = std::fs::remove_file(&path)
                    && e.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(path = %path.display(), error = %e, "failed to delete scratch file");
                }
            }
            Resource::Adopted(path) => {
                remove_file_with_retry(&path, self.retry);
            }
        }
    }
}

impl Drop for ResourceRegistry {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Child process that is killed and reaped if dropped before being waited on.
pub struct ChildGuard {
    child: Option<Child>,
    label: &'static str,
}

impl ChildGuard {
    pub fn new(child: Child, label: &'static str) -> Self {
        Self {
            child: Some(child),
            label,
        }
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.as_mut()?.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.as_mut()?.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<std::process::ChildStderr> {
        self.child.as_mut()?.stderr.take()
    }

    pub fn wait(mut self) -> ExplicateResult<ExitStatus> {
        let mut child = self.child.take().ok_or_else(|| {
            ExplicateError::media(format!("{} process already reaped", self.label))
        })?;
        child.wait().map_err(|e| {
            ExplicateError::media(format!("failed to wait for {}: {e}", self.label))
        })
    }

    pub fn wait_with_output(mut self) -> ExplicateResult<Output> {
        let child = self.child.take().ok_or_else(|| {
            ExplicateError::media(format!("{} process already reaped", self.label))
        })?;
        child.wait_with_output().map_err(|e| {
            ExplicateError::media(format!("failed to wait for {}: {e}", self.label))
        })
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            debug!(process = self.label, "killing unfinished child process");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Best-effort removal of files or directories the caller no longer needs.
pub fn cleanup_paths<'a>(paths: impl IntoIterator<Item = &'a Path>) {
    for path in paths {
        let result = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else if path.exists() {
            std::fs::remove_file(path)
        } else {
            Ok(())
        };
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to delete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn release_all_removes_files_then_workdir() {
        let root = tempfile::tempdir().unwrap();
        let outside = root.path().join("voice.wav");
        std::fs::write(&outside, b"x").unwrap();

        let mut reg = ResourceRegistry::new(Some(root.path()), fast_retry()).unwrap();
        let workdir = reg.workdir().to_path_buf();
        let (_, scratch) = reg.scratch_path("clip", "mp4");
        std::fs::write(&scratch, b"x").unwrap();
        reg.adopt(&outside);
        assert_eq!(reg.live(), 2);

        reg.release_all();
        assert_eq!(reg.live(), 0);
        assert_eq!(reg.released(), 2);
        assert!(!outside.exists());
        assert!(!scratch.exists());
        assert!(!workdir.exists());
    }

    #[test]
    fn release_is_exactly_once() {
        let mut reg = ResourceRegistry::new(None, fast_retry()).unwrap();
        let (key, path) = reg.scratch_path("audio", "f32le");
        std::fs::write(&path, b"x").unwrap();
        assert!(reg.release(key));
        assert!(!reg.release(key));
        assert!(!path.exists());
        reg.release_all();
        assert_eq!(reg.released(), 1);
    }

    #[test]
    fn drop_releases_everything() {
        let root = tempfile::tempdir().unwrap();
        let adopted = root.path().join("seg.wav");
        std::fs::write(&adopted, b"x").unwrap();
        let workdir = {
            let mut reg = ResourceRegistry::new(Some(root.path()), fast_retry()).unwrap();
            reg.adopt(&adopted);
            reg.workdir().to_path_buf()
        };
        assert!(!adopted.exists());
        assert!(!workdir.exists());
    }

    #[test]
    fn forget_hands_the_file_to_the_caller() {
        let mut reg = ResourceRegistry::new(None, fast_retry()).unwrap();
        let (key, path) = reg.scratch_path("final", "mp4");
        std::fs::write(&path, b"x").unwrap();
        let kept = reg.forget(key).unwrap();
        let moved = std::env::temp_dir().join(format!("explicate-forget-{}.mp4", std::process::id()));
        std::fs::rename(&kept, &moved).unwrap();
        reg.release_all();
        assert!(moved.exists());
        std::fs::remove_file(moved).unwrap();
    }

    #[test]
    fn retry_treats_missing_file_as_deleted() {
        assert!(remove_file_with_retry(
            Path::new("/nonexistent/explicate/file.wav"),
            fast_retry()
        ));
    }

    #[test]
    fn retry_gives_up_on_undeletable_path() {
        // A directory cannot be removed with remove_file.
        let dir = tempfile::tempdir().unwrap();
        assert!(!remove_file_with_retry(dir.path(), fast_retry()));
        assert!(dir.path().exists());
    }

    #[test]
    fn cleanup_paths_handles_files_dirs_and_missing() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("a.mp4");
        let dir = root.path().join("media");
        std::fs::write(&file, b"x").unwrap();
        std::fs::create_dir_all(dir.join("videos")).unwrap();
        let missing = root.path().join("missing.wav");
        cleanup_paths([file.as_path(), dir.as_path(), missing.as_path()]);
        assert!(!file.exists());
        assert!(!dir.exists());
    }
}
