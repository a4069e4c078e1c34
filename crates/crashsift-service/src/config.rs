use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for crashsift.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: std::env::var("STATSD_SERVER").ok(),
            prefix: "crashsift".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Debug-info installation and the shared debug-info cache.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DebugInfoConfig {
    /// Whether missing debug-info should be installed before generating a backtrace.
    pub install: bool,

    /// Whether a memory map artifact is written alongside the backtrace.
    pub memory_map: bool,

    /// Size budget of the debug-info cache in megabytes.
    ///
    /// A value of zero or below disables trimming.
    pub cache_size_mb: i64,

    /// Free-text descriptor of where debug-info comes from.
    ///
    /// This is not interpreted, only carried through the settings map.
    pub source: String,

    /// Directory the installer unpacks debug-info into.
    pub cache_dir: PathBuf,

    /// Debug-info directory of the system, searched before the cache.
    pub system_dir: PathBuf,

    /// Directory under which the installer gets its scratch space.
    pub scratch_dir: PathBuf,

    /// Users allowed to trigger debug-info installation.
    ///
    /// `None` allows every user.
    pub authorized_uids: Option<Vec<u32>>,

    /// The settings map last passed to [`apply_settings`](Self::apply_settings).
    #[serde(skip)]
    pub plugin_settings: BTreeMap<String, String>,
}

impl Default for DebugInfoConfig {
    fn default() -> Self {
        Self {
            install: true,
            memory_map: false,
            cache_size_mb: 4000,
            source: String::new(),
            cache_dir: PathBuf::from("/var/cache/abrt-di"),
            system_dir: PathBuf::from("/usr/lib/debug"),
            scratch_dir: PathBuf::from("/var/run/abrt"),
            authorized_uids: None,
            plugin_settings: BTreeMap::new(),
        }
    }
}

impl DebugInfoConfig {
    /// The cache budget in bytes, or `None` if trimming is disabled.
    pub fn cache_budget(&self) -> Option<u64> {
        u64::try_from(self.cache_size_mb)
            .ok()
            .filter(|mb| *mb > 0)
            .map(|mb| mb.saturating_mul(1024 * 1024))
    }

    /// Applies analyzer settings in the classic `key = value` plugin format.
    ///
    /// Unknown keys are ignored. `InstallDebuginfo` is an old spelling which is only looked at
    /// when `InstallDebugInfo` is absent.
    pub fn apply_settings(&mut self, settings: &BTreeMap<String, String>) {
        self.plugin_settings = settings.clone();
        if let Some(value) = settings.get("MemoryMap") {
            self.memory_map = value == "yes";
        }
        if let Some(value) = settings.get("DebugInfo") {
            self.source = value.clone();
        }
        if let Some(value) = settings.get("DebugInfoCacheMB") {
            self.cache_size_mb = parse_leading_int(value);
        }
        let install = settings
            .get("InstallDebugInfo")
            .or_else(|| settings.get("InstallDebuginfo"));
        if let Some(value) = install {
            self.install = value == "yes";
        }
    }

    /// Returns the settings in the classic plugin format.
    ///
    /// This is the last applied settings map with the four known keys set to their effective
    /// values. Unknown keys are passed through unchanged.
    pub fn settings(&self) -> BTreeMap<String, String> {
        let yes_no = |b: bool| if b { "yes" } else { "no" }.to_owned();
        let mut settings = self.plugin_settings.clone();
        settings.insert("MemoryMap".to_owned(), yes_no(self.memory_map));
        settings.insert("DebugInfo".to_owned(), self.source.clone());
        settings.insert("DebugInfoCacheMB".to_owned(), self.cache_size_mb.to_string());
        settings.insert("InstallDebugInfo".to_owned(), yes_no(self.install));
        settings
    }
}

/// Parses the leading decimal integer of `value`, yielding `0` if there is none.
fn parse_leading_int(value: &str) -> i64 {
    let value = value.trim_start();
    let (sign, digits) = match value.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, value.strip_prefix('+').unwrap_or(value)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().map(|n| sign * n).unwrap_or(0)
}

/// Names of the external tools that are run during analysis.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    /// The debugger producing the backtrace.
    pub gdb: PathBuf,
    /// The module lister producing `base+size build-id@pc` lines.
    pub unstrip: PathBuf,
    /// The helper installing missing debug-info into the cache.
    pub debuginfo_install: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            gdb: PathBuf::from("gdb"),
            unstrip: PathBuf::from("eu-unstrip"),
            debuginfo_install: PathBuf::from("abrt-debuginfo-install"),
        }
    }
}

/// Where core dumps are routed by the kernel.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CorePatternConfig {
    /// The kernel interface file.
    pub path: PathBuf,
    /// The hook binary the kernel pipes cores into.
    pub hook: PathBuf,
    /// The directory under which the hook creates dump directories.
    pub dump_location: PathBuf,
}

impl Default for CorePatternConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/proc/sys/kernel/core_pattern"),
            hook: PathBuf::from("/usr/libexec/abrt-hook-ccpp"),
            dump_location: PathBuf::from("/var/spool/abrt"),
        }
    }
}

/// The crashsift configuration, usually loaded from a YAML file.
///
/// Every section falls back to its defaults, so an empty section or a missing key is fine.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// Debug-info installation and caching.
    pub debug_info: DebugInfoConfig,

    /// External tools.
    pub tools: ToolsConfig,

    /// Core dump routing.
    pub core_pattern: CorePatternConfig,
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
