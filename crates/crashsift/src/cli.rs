//! Exposes the command line application.
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use crashsift_native::normalize::normalize;
use crashsift_native::rating::rate_backtrace;
use crashsift_native::{CCppAnalyzer, ReportOutcome};
use crashsift_service::caching::DebugInfoCache;
use crashsift_service::config::Config;
use crashsift_service::core_pattern::{self, PriorCorePattern};
use crashsift_service::metrics;

use crate::logging;

/// Analyzes crashes of native C/C++ programs.
///
/// Crash dump directories are turned into rated backtraces and fingerprints, using the
/// debugger and debug-info tools installed on the system.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long = "config", short = 'c', global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Overrides an analyzer setting, e.g. `InstallDebugInfo=no`.
    ///
    /// Accepts `MemoryMap`, `DebugInfo`, `DebugInfoCacheMB` and `InstallDebugInfo`.
    #[arg(
        long = "setting",
        global = true,
        value_name = "KEY=VALUE",
        value_parser = parse_setting
    )]
    pub settings: Vec<(String, String)>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate the backtrace and rating of a crash.
    Report {
        /// The crash dump directory.
        dump_dir: PathBuf,

        /// Regenerate the backtrace even if the crash already has one.
        #[arg(long)]
        force: bool,
    },

    /// Print the fingerprint of a crash.
    Uuid {
        /// The crash dump directory.
        dump_dir: PathBuf,

        #[command(flatten)]
        kind: UuidKind,
    },

    /// Print the star rating of a backtrace.
    Rate {
        /// The backtrace file, or `-` to read from stdin.
        file: PathBuf,
    },

    /// Print the canonical form of a backtrace, as used for fingerprinting.
    Normalize {
        /// The backtrace file, or `-` to read from stdin.
        file: PathBuf,
    },

    /// Trim the debug-info cache to its configured size.
    TrimCache,

    /// Manage the kernel core pattern.
    #[command(subcommand)]
    Hook(HookCommand),

    /// Print the effective analyzer settings.
    Settings,
}

#[derive(Debug, Args)]
#[group(multiple = false)]
struct UuidKind {
    /// Fingerprint the loaded modules, identifying this very crash.
    #[arg(long)]
    local: bool,

    /// Fingerprint the normalized backtrace, identifying duplicates of the crash (default).
    #[arg(long)]
    global: bool,
}

#[derive(Debug, Subcommand)]
enum HookCommand {
    /// Route core dumps into the crash hook and print the previous pattern.
    Install,

    /// Put back a pattern printed by `hook install`.
    Restore {
        /// The previous core pattern.
        prior: String,
    },
}

fn parse_setting(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected `KEY=VALUE`, got `{s}`"))?;
    Ok((key.trim().to_owned(), value.trim().to_owned()))
}

/// Reads a backtrace from a file, or from stdin for `-`.
fn read_input(path: &Path) -> Result<String> {
    let mut bytes = Vec::new();
    if path == Path::new("-") {
        std::io::stdin()
            .read_to_end(&mut bytes)
            .context("failed to read backtrace from stdin")?;
    } else {
        bytes = std::fs::read(path)
            .with_context(|| format!("failed to read backtrace from `{}`", path.display()))?;
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Loads the configuration and applies the `--setting` overrides.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::get(cli.config.as_deref()).context("failed loading config")?;
    let settings: BTreeMap<_, _> = cli.settings.iter().cloned().collect();
    config.debug_info.apply_settings(&settings);
    Ok(config)
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: The application is single-threaded at this point.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )?;
    }

    run(cli.command, &config)
}

fn run(command: Command, config: &Config) -> Result<()> {
    match command {
        Command::Report { dump_dir, force } => {
            let analyzer = CCppAnalyzer::from_config(config);
            let outcome = analyzer
                .create_report(&dump_dir, force)
                .with_context(|| format!("failed to report `{}`", dump_dir.display()))?;
            match outcome {
                ReportOutcome::Skipped => println!("skipped"),
                ReportOutcome::Created { rating } => println!("{rating}"),
            }
        }
        Command::Uuid { dump_dir, kind } => {
            let analyzer = CCppAnalyzer::from_config(config);
            let uuid = if kind.local {
                analyzer.local_uuid(&dump_dir)?
            } else {
                analyzer.global_uuid(&dump_dir)?
            };
            println!("{uuid}");
        }
        Command::Rate { file } => {
            let backtrace = read_input(&file)?;
            println!("{}", rate_backtrace(&backtrace));
        }
        Command::Normalize { file } => {
            println!("{}", normalize(&read_input(&file)?));
        }
        Command::TrimCache => match DebugInfoCache::from_config(&config.debug_info) {
            Some(cache) => {
                let stats = cache.trim()?;
                println!(
                    "evicted {} files ({} bytes), {} bytes remaining",
                    stats.evicted_files, stats.evicted_bytes, stats.remaining_bytes
                );
            }
            None => tracing::info!("Debug-info cache has no size limit, nothing to trim"),
        },
        Command::Hook(HookCommand::Install) => {
            let prior = core_pattern::install(&config.core_pattern)?;
            println!("{prior}");
        }
        Command::Hook(HookCommand::Restore { prior }) => {
            core_pattern::restore(&config.core_pattern, PriorCorePattern::from_saved(prior))?;
        }
        Command::Settings => {
            for (key, value) in config.debug_info.settings() {
                println!("{key} = {value}");
            }
        }
    }
    Ok(())
}
