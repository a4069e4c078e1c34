use std::collections::HashSet;
use std::fs::{File, OpenOptions, remove_file};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use nix::fcntl::{Flock, FlockArg};
use walkdir::WalkDir;

use crate::config::DebugInfoConfig;

pub(super) const LOCK_FILE: &str = ".trim.lock";

/// Computes the eviction weight of a cache file.
///
/// This is the size in KiB multiplied by the age in whole minutes, or the size alone if the
/// file is less than a minute old or its modification time lies in the future.
pub fn eviction_weight(size: u64, mtime: SystemTime, now: SystemTime) -> f64 {
    let kib = size as f64 / 1024.0;
    let age_minutes = now
        .duration_since(mtime)
        .map(|age| age.as_secs() / 60)
        .unwrap_or(0);
    if age_minutes > 0 {
        kib * age_minutes as f64
    } else {
        kib
    }
}

/// The file that should be evicted next.
#[derive(Debug, Clone, PartialEq)]
pub struct EvictionCandidate {
    pub path: PathBuf,
    pub size: u64,
    pub weight: f64,
}

/// The result of measuring the cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheUsage {
    /// Sum of the sizes of all regular files.
    pub total_bytes: u64,
    /// Number of regular files.
    pub files: usize,
    /// The file with the highest weight, if any file has a positive weight.
    pub worst: Option<EvictionCandidate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrimStats {
    pub evicted_files: usize,
    pub evicted_bytes: u64,
    pub failed_files: usize,
    pub remaining_bytes: u64,
}

/// The shared debug-info cache, bounded by a size budget.
#[derive(Debug, Clone)]
pub struct DebugInfoCache {
    root: PathBuf,
    max_size: u64,
}

impl DebugInfoCache {
    pub fn new(root: impl Into<PathBuf>, max_size: u64) -> Self {
        Self {
            root: root.into(),
            max_size,
        }
    }

    /// Creates the cache from configuration, or `None` if trimming is disabled.
    pub fn from_config(config: &DebugInfoConfig) -> Option<Self> {
        let max_size = config.cache_budget()?;
        Some(Self::new(&config.cache_dir, max_size))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Measures the cache and finds the next file to evict.
    ///
    /// Directories are recursed into, symlinks and special files are ignored. Paths in
    /// `excluded` are counted but never selected. Entries that cannot be read are skipped.
    pub fn measure(&self, now: SystemTime, excluded: &HashSet<PathBuf>) -> CacheUsage {
        let lock_path = self.root.join(LOCK_FILE);
        let mut usage = CacheUsage::default();

        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!("Skipping unreadable cache entry: {}", err);
                    continue;
                }
            };
            if !entry.file_type().is_file() || entry.path() == lock_path {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    tracing::warn!("Skipping cache file `{}`: {}", entry.path().display(), err);
                    continue;
                }
            };

            let size = metadata.len();
            usage.total_bytes += size;
            usage.files += 1;

            if excluded.contains(entry.path()) {
                continue;
            }
            let mtime = metadata.modified().unwrap_or(now);
            let weight = eviction_weight(size, mtime, now);
            let worst_weight = usage.worst.as_ref().map_or(0.0, |worst| worst.weight);
            if weight > worst_weight {
                usage.worst = Some(EvictionCandidate {
                    path: entry.into_path(),
                    size,
                    weight,
                });
            }
        }

        usage
    }

    /// Evicts files until the cache is below its size budget.
    ///
    /// A missing cache directory is not an error, there is simply nothing to trim.
    pub fn trim(&self) -> Result<TrimStats> {
        self.trim_with(|path| remove_file(path))
    }

    /// Trims the cache, deleting files with `remove`.
    pub(super) fn trim_with(
        &self,
        mut remove: impl FnMut(&Path) -> io::Result<()>,
    ) -> Result<TrimStats> {
        if !self.root.is_dir() {
            tracing::debug!("No debug-info cache at `{}`", self.root.display());
            return Ok(TrimStats::default());
        }
        let _lock = self.lock()?;

        let mut stats = TrimStats::default();
        let mut excluded = HashSet::new();
        loop {
            let usage = self.measure(SystemTime::now(), &excluded);
            stats.remaining_bytes = usage.total_bytes;
            if usage.total_bytes < self.max_size {
                break;
            }
            let Some(worst) = usage.worst else {
                tracing::warn!(
                    "`{}` is {} bytes (over {} bytes), but nothing is left to delete",
                    self.root.display(),
                    usage.total_bytes,
                    self.max_size,
                );
                break;
            };

            tracing::debug!(
                "`{}` is {} bytes (over {} bytes), deleting `{}`",
                self.root.display(),
                usage.total_bytes,
                self.max_size,
                worst.path.display(),
            );
            match catch_not_found(|| remove(&worst.path)) {
                Ok(Some(())) => {
                    stats.evicted_files += 1;
                    stats.evicted_bytes += worst.size;
                }
                // Somebody else removed it in the meantime.
                Ok(None) => {}
                Err(err) => {
                    let error: &dyn std::error::Error = &err;
                    tracing::error!(error, "Can't unlink `{}`", worst.path.display());
                    stats.failed_files += 1;
                    excluded.insert(worst.path);
                }
            }
        }

        tracing::info!(
            "Trimmed `{}`: removed {} files totaling {} bytes, {} bytes remaining",
            self.root.display(),
            stats.evicted_files,
            stats.evicted_bytes,
            stats.remaining_bytes,
        );
        metric!(counter("debuginfo_cache.evicted_files") += stats.evicted_files as i64);
        metric!(counter("debuginfo_cache.evicted_bytes") += stats.evicted_bytes as i64);
        metric!(gauge("debuginfo_cache.size.bytes") = stats.remaining_bytes);

        Ok(stats)
    }

    fn lock(&self) -> Result<Flock<File>> {
        let path = self.root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open `{}`", path.display()))?;
        Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| io::Error::from(errno))
            .with_context(|| format!("failed to lock `{}`", path.display()))
    }
}

fn catch_not_found<F, R>(f: F) -> io::Result<Option<R>>
where
    F: FnOnce() -> io::Result<R>,
{
    match f() {
        Ok(x) => Ok(Some(x)),
        Err(e) => match e.kind() {
            io::ErrorKind::NotFound => Ok(None),
            _ => Err(e),
        },
    }
}
