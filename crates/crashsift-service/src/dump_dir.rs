//! Access to dump directories.
//!
//! A dump directory is created by the core-dump hook for every crash. Each piece of information
//! about the crash is stored as a separate file named after the field, next to the `coredump`
//! itself. While a [`DumpDir`] is open it holds an exclusive advisory lock on the directory, so
//! it should be dropped as soon as the fields of interest are read, and in particular before
//! running long external tools.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Well-known field names.
pub mod fields {
    /// Absolute path of the crashed executable.
    pub const EXECUTABLE: &str = "executable";
    /// Numeric id of the user owning the crashed process.
    pub const UID: &str = "uid";
    /// Package the executable belongs to, in `name-version-release` form.
    pub const PACKAGE: &str = "package";
    /// The generated backtrace.
    pub const BACKTRACE: &str = "backtrace";
    /// Star rating of the backtrace, a single decimal digit.
    pub const RATING: &str = "rating";
    /// Memory map of the crashed process.
    pub const MEMORYMAP: &str = "memorymap";
    /// The core file written by the kernel.
    pub const COREDUMP: &str = "coredump";
}

const LOCK_FILE: &str = ".lock";

#[derive(Debug, Error)]
pub enum DumpDirError {
    #[error("`{0}` is not a dump directory")]
    NotADirectory(PathBuf),
    #[error("invalid field name `{0}`")]
    InvalidField(String),
    #[error("field `{0}` does not exist")]
    MissingField(String),
    #[error("failed to lock `{path}`")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to access `{path}`")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// An open and locked dump directory.
pub struct DumpDir {
    path: PathBuf,
    _lock: Flock<File>,
}

impl fmt::Debug for DumpDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DumpDir").field("path", &self.path).finish()
    }
}

impl DumpDir {
    /// Opens the dump directory at `path`, blocking until its lock can be taken.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DumpDirError> {
        let path = path.as_ref().to_path_buf();
        if !path.is_dir() {
            return Err(DumpDirError::NotADirectory(path));
        }

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|source| DumpDirError::Lock {
                path: lock_path.clone(),
                source,
            })?;
        let lock = Flock::lock(lock_file, FlockArg::LockExclusive).map_err(|(_, errno)| {
            DumpDirError::Lock {
                path: lock_path,
                source: errno.into(),
            }
        })?;

        tracing::trace!("Opened dump directory `{}`", path.display());
        Ok(Self { path, _lock: lock })
    }

    /// Releases the lock.
    pub fn close(self) {
        tracing::trace!("Closing dump directory `{}`", self.path.display());
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the core file inside `dump_dir`.
    ///
    /// External tools read the core directly, this does not require the directory to be open.
    pub fn coredump_path(dump_dir: &Path) -> PathBuf {
        dump_dir.join(fields::COREDUMP)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.field_path(name).is_ok_and(|path| path.is_file())
    }

    pub fn load_text(&self, name: &str) -> Result<String, DumpDirError> {
        let path = self.field_path(name)?;
        fs::read_to_string(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => DumpDirError::MissingField(name.to_owned()),
            _ => DumpDirError::Io { path, source },
        })
    }

    /// Replaces the field `name` atomically.
    pub fn save_text(&self, name: &str, text: &str) -> Result<(), DumpDirError> {
        let path = self.field_path(name)?;
        let io_error = |source| DumpDirError::Io {
            path: path.clone(),
            source,
        };

        let mut file = NamedTempFile::new_in(&self.path).map_err(io_error)?;
        file.write_all(text.as_bytes()).map_err(io_error)?;
        file.persist(&path).map_err(|e| io_error(e.error))?;
        Ok(())
    }

    fn field_path(&self, name: &str) -> Result<PathBuf, DumpDirError> {
        if name.is_empty() || name.contains('/') || name.starts_with('.') {
            return Err(DumpDirError::InvalidField(name.to_owned()));
        }
        Ok(self.path.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing() {
        let tempdir = tempfile::tempdir().unwrap();
        let err = DumpDir::open(tempdir.path().join("nope")).unwrap_err();
        assert!(matches!(err, DumpDirError::NotADirectory(_)));
    }

    #[test]
    fn test_save_and_load() {
        let tempdir = tempfile::tempdir().unwrap();
        let dd = DumpDir::open(tempdir.path()).unwrap();

        assert!(!dd.exists(fields::RATING));
        dd.save_text(fields::RATING, "3").unwrap();
        assert!(dd.exists(fields::RATING));
        assert_eq!(dd.load_text(fields::RATING).unwrap(), "3");

        dd.save_text(fields::RATING, "4").unwrap();
        assert_eq!(dd.load_text(fields::RATING).unwrap(), "4");
        dd.close();

        // the data survives reopening
        let dd = DumpDir::open(tempdir.path()).unwrap();
        assert_eq!(dd.load_text(fields::RATING).unwrap(), "4");
    }

    #[test]
    fn test_missing_field() {
        let tempdir = tempfile::tempdir().unwrap();
        let dd = DumpDir::open(tempdir.path()).unwrap();
        let err = dd.load_text(fields::PACKAGE).unwrap_err();
        assert!(matches!(err, DumpDirError::MissingField(f) if f == "package"));
    }

    #[test]
    fn test_invalid_field_names() {
        let tempdir = tempfile::tempdir().unwrap();
        let dd = DumpDir::open(tempdir.path()).unwrap();
        for name in ["", "../etc/passwd", ".lock"] {
            assert!(matches!(
                dd.save_text(name, "x"),
                Err(DumpDirError::InvalidField(_))
            ));
            assert!(!dd.exists(name));
        }
    }

    #[test]
    fn test_lock_file_is_not_a_field() {
        let tempdir = tempfile::tempdir().unwrap();
        let _dd = DumpDir::open(tempdir.path()).unwrap();
        assert!(tempdir.path().join(LOCK_FILE).exists());
    }
}
