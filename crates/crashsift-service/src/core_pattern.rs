//! Routing kernel core dumps into the crash hook.
//!
//! The kernel consults a single core-pattern file to decide what happens with a core dump.
//! When the pattern starts with `|`, the core is piped into the named program instead of being
//! written to disk. [`install`] points that pattern at our hook and hands back whatever was
//! configured before, so that [`restore`] can put it back on shutdown.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::CorePatternConfig;

/// Restored instead of our own pattern if that was left behind by a previous run.
const DEFAULT_PATTERN: &str = "core";

#[derive(Debug, Error)]
pub enum CorePatternError {
    #[error("failed to read core pattern from `{path}`")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write core pattern to `{path}`")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The core pattern that was active before [`install`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriorCorePattern(String);

impl PriorCorePattern {
    /// Recreates the token from a previously saved [`as_str`](Self::as_str).
    pub fn from_saved(saved: impl Into<String>) -> Self {
        Self(saved.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PriorCorePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The pattern piping cores into the configured hook.
pub fn hook_pattern(config: &CorePatternConfig) -> String {
    format!(
        "|{} {} %p %s %u",
        config.hook.display(),
        config.dump_location.display()
    )
}

/// Points the core pattern at our hook, returning the previous pattern.
///
/// Another piped handler is replaced with a warning. If the current pattern is our own, a
/// previous run did not shut down cleanly and [`restore`] will fall back to plain `core`.
pub fn install(config: &CorePatternConfig) -> Result<PriorCorePattern, CorePatternError> {
    let ours = hook_pattern(config);
    let mut prior = read_first_line(&config.path)?;

    if prior.starts_with('|') {
        if prior == ours {
            tracing::warn!(
                "`{}` already contains `{}`, did the analyzer crash recently?",
                config.path.display(),
                ours
            );
            prior = DEFAULT_PATTERN.to_owned();
        } else {
            tracing::warn!(
                "`{}` was already set to run a crash analyzer (`{}`), it will be replaced",
                config.path.display(),
                prior
            );
        }
    }

    write_pattern(&config.path, &ours)?;
    tracing::info!("Installed core pattern `{}`", ours);
    Ok(PriorCorePattern(prior))
}

/// Writes the pattern that was active before [`install`] back.
pub fn restore(config: &CorePatternConfig, prior: PriorCorePattern) -> Result<(), CorePatternError> {
    write_pattern(&config.path, prior.as_str())?;
    tracing::info!("Restored core pattern `{}`", prior);
    Ok(())
}

/// A missing file reads as an empty pattern.
fn read_first_line(path: &Path) -> Result<String, CorePatternError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content.lines().next().unwrap_or_default().to_owned()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(source) => Err(CorePatternError::Read {
            path: path.to_owned(),
            source,
        }),
    }
}

fn write_pattern(path: &Path, pattern: &str) -> Result<(), CorePatternError> {
    fs::write(path, format!("{pattern}\n")).map_err(|source| CorePatternError::Write {
        path: path.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> CorePatternConfig {
        CorePatternConfig {
            path: dir.join("core_pattern"),
            hook: PathBuf::from("/usr/libexec/abrt-hook-ccpp"),
            dump_location: PathBuf::from("/var/spool/abrt"),
        }
    }

    #[test]
    fn test_hook_pattern() {
        let tempdir = tempfile::tempdir().unwrap();
        assert_eq!(
            hook_pattern(&config(tempdir.path())),
            "|/usr/libexec/abrt-hook-ccpp /var/spool/abrt %p %s %u"
        );
    }

    #[test]
    fn test_install_and_restore() {
        let tempdir = tempfile::tempdir().unwrap();
        let config = config(tempdir.path());
        fs::write(&config.path, "core.%p\n").unwrap();

        let prior = install(&config).unwrap();
        assert_eq!(prior.as_str(), "core.%p");
        assert_eq!(
            fs::read_to_string(&config.path).unwrap(),
            "|/usr/libexec/abrt-hook-ccpp /var/spool/abrt %p %s %u\n"
        );

        restore(&config, prior).unwrap();
        assert_eq!(fs::read_to_string(&config.path).unwrap(), "core.%p\n");
    }

    #[test]
    fn test_install_over_own_pattern() {
        let tempdir = tempfile::tempdir().unwrap();
        let config = config(tempdir.path());
        fs::write(&config.path, format!("{}\n", hook_pattern(&config))).unwrap();

        let prior = install(&config).unwrap();
        assert_eq!(prior.as_str(), "core");
    }

    #[test]
    fn test_install_over_foreign_handler() {
        let tempdir = tempfile::tempdir().unwrap();
        let config = config(tempdir.path());
        fs::write(&config.path, "|/usr/lib/systemd/systemd-coredump %P %u %g\n").unwrap();

        let prior = install(&config).unwrap();
        assert_eq!(prior.as_str(), "|/usr/lib/systemd/systemd-coredump %P %u %g");
        assert!(
            fs::read_to_string(&config.path)
                .unwrap()
                .starts_with("|/usr/libexec/abrt-hook-ccpp ")
        );
    }

    #[test]
    fn test_saved_token() {
        let tempdir = tempfile::tempdir().unwrap();
        let config = config(tempdir.path());

        let prior = install(&config).unwrap();
        assert_eq!(prior.as_str(), "");

        let saved = prior.as_str().to_owned();
        restore(&config, PriorCorePattern::from_saved(saved)).unwrap();
        assert_eq!(fs::read_to_string(&config.path).unwrap(), "\n");
    }

    #[test]
    fn test_unwritable() {
        let tempdir = tempfile::tempdir().unwrap();
        let mut config = config(tempdir.path());
        config.path = tempdir.path().join("missing/core_pattern");

        let err = restore(&config, PriorCorePattern::from_saved("core")).unwrap_err();
        assert!(matches!(err, CorePatternError::Write { .. }));
    }
}
