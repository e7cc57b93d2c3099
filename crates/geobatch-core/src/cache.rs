//! File-keyed cache with injected clock and file-stat dependencies.
//!
//! An entry stays valid while the source file's modification time is
//! unchanged and, if a maximum age is set, while it is younger than that age.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use crate::error::Result;

/// Source of file modification times
pub trait FileStat: Send + Sync {
    fn modified(&self, path: &Path) -> Result<SystemTime>;
}

/// Monotonic time source
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// `FileStat` backed by the real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStat;

impl FileStat for FsStat {
    fn modified(&self, path: &Path) -> Result<SystemTime> {
        Ok(std::fs::metadata(path)?.modified()?)
    }
}

/// `Clock` backed by `Instant::now`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug)]
struct Entry<T> {
    modified: SystemTime,
    stored_at: Instant,
    value: Arc<T>,
}

/// Cache of values derived from files
pub struct FileCache<T, S = FsStat, C = SystemClock> {
    entries: Mutex<HashMap<PathBuf, Entry<T>>>,
    stat: S,
    clock: C,
    max_age: Option<Duration>,
}

impl<T> FileCache<T, FsStat, SystemClock> {
    /// Cache using the real filesystem and clock
    pub fn new() -> Self {
        Self::with_sources(FsStat, SystemClock)
    }
}

impl<T> Default for FileCache<T, FsStat, SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S: FileStat, C: Clock> FileCache<T, S, C> {
    pub fn with_sources(stat: S, clock: C) -> Self {
        Self { entries: Mutex::new(HashMap::new()), stat, clock, max_age: None }
    }

    /// Expire entries older than `max_age` even if the file is unchanged
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Return the cached value for `path`, or run `load` and cache its result
    ///
    /// Loader errors are returned and nothing is cached.
    pub fn get_or_load<F>(&self, path: &Path, load: F) -> Result<Arc<T>>
    where
        F: FnOnce(&Path) -> Result<T>,
    {
        let modified = self.stat.modified(path)?;
        let now = self.clock.now();

        if let Some(value) = self.lookup(path, modified, now) {
            tracing::debug!(path = %path.display(), "File cache hit");
            return Ok(value);
        }

        tracing::debug!(path = %path.display(), "File cache miss");
        let value = Arc::new(load(path)?);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            path.to_path_buf(),
            Entry { modified, stored_at: now, value: Arc::clone(&value) },
        );
        Ok(value)
    }

    fn lookup(&self, path: &Path, modified: SystemTime, now: Instant) -> Option<Arc<T>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(path)?;
        if entry.modified != modified {
            return None;
        }
        if let Some(max_age) = self.max_age {
            if now.saturating_duration_since(entry.stored_at) > max_age {
                return None;
            }
        }
        Some(Arc::clone(&entry.value))
    }

    /// Drop the entry for one path
    pub fn invalidate(&self, path: &Path) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(path);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
