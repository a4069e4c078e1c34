use std::path::Path;
use std::time::SystemTime;

use crashsift_service::caching::DebugInfoCache;
use crashsift_service::config::{Config, DebugInfoConfig, ToolsConfig};
use crashsift_service::dump_dir::{DumpDir, DumpDirError, fields};
use crashsift_service::exec::{CommandRunner, ExecError, PrivilegedExecutor, RunAs, ToolCommand};
use crashsift_service::metric;
use thiserror::Error;

use crate::authorize::{self, DebugInfoAuthorizer};
use crate::fingerprint;
use crate::rating::{Rating, rate_backtrace};
use crate::tools;

/// Written to the `memorymap` field when memory maps are enabled.
pub const MEMORY_MAP_PLACEHOLDER: &str =
    "memory map of the crashed C/C++ application, not implemented yet";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    DumpDir(#[from] DumpDirError),
    #[error("invalid uid `{0}`")]
    InvalidUid(String),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The dump directory already had a backtrace.
    Skipped,
    Created { rating: Rating },
}

/// Analyzes crashes of native C/C++ programs from their core dumps.
pub struct CCppAnalyzer<R = PrivilegedExecutor> {
    debug_info: DebugInfoConfig,
    tools: ToolsConfig,
    runner: R,
    authorizer: Box<dyn DebugInfoAuthorizer + Send + Sync>,
}

impl CCppAnalyzer {
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.debug_info.clone(),
            config.tools.clone(),
            PrivilegedExecutor::new(),
        )
    }
}

impl<R: CommandRunner> CCppAnalyzer<R> {
    /// Creates an analyzer running tools through `runner`.
    ///
    /// Debug-info installation is authorized according to `debug_info.authorized_uids`.
    pub fn new(debug_info: DebugInfoConfig, tools: ToolsConfig, runner: R) -> Self {
        let authorizer = authorize::from_config(&debug_info);
        Self {
            debug_info,
            tools,
            runner,
            authorizer,
        }
    }

    pub fn with_authorizer(
        mut self,
        authorizer: impl DebugInfoAuthorizer + Send + Sync + 'static,
    ) -> Self {
        self.authorizer = Box::new(authorizer);
        self
    }

    /// Generates the backtrace and rating of the crash in `dump_dir`.
    ///
    /// Unless `force` is set, a dump directory that already has a backtrace is left alone.
    /// Missing debug-info is installed first if enabled and the crash owner is authorized.
    /// Failures to trim the cache, to run the installer or to run the debugger are logged
    /// and do not fail the report, but an owner without a passwd entry does.
    pub fn create_report(&self, dump_dir: &Path, force: bool) -> Result<ReportOutcome, ReportError> {
        tracing::info!("Starting report creation for `{}`", dump_dir.display());

        let dd = DumpDir::open(dump_dir)?;
        if !force && dd.exists(fields::BACKTRACE) {
            tracing::debug!("`{}` already has a backtrace", dump_dir.display());
            metric!(counter("reports.skipped") += 1);
            return Ok(ReportOutcome::Skipped);
        }
        let package = dd.load_text(fields::PACKAGE)?;
        let executable = dd.load_text(fields::EXECUTABLE)?;
        let uid = parse_uid(&dd.load_text(fields::UID)?)?;
        // the analysis tools below take long, do not block the hook meanwhile
        dd.close();
        tracing::debug!(%package, %executable, uid, "Loaded crash");

        let notices = if self.debug_info.install && self.authorizer.may_install(uid) {
            self.install_debug_info(dump_dir)
        } else {
            tracing::debug!("Skipping debuginfo installation");
            String::new()
        };

        tracing::info!("Getting backtrace");
        let command = tools::gdb_command(&self.tools, &self.debug_info, &executable, dump_dir);
        let backtrace = self.run_tool(&command, RunAs::User(uid))?;
        let rating = rate_backtrace(&backtrace);

        let dd = DumpDir::open(dump_dir)?;
        dd.save_text(fields::BACKTRACE, &format!("{notices}{backtrace}"))?;
        if self.debug_info.memory_map {
            dd.save_text(fields::MEMORYMAP, MEMORY_MAP_PLACEHOLDER)?;
        }
        dd.save_text(fields::RATING, &rating.to_string())?;
        dd.close();

        tracing::info!("Created report for `{}` rated {}", dump_dir.display(), rating);
        metric!(counter("reports.created") += 1);
        metric!(histogram("reports.rating") = u64::from(rating.stars()));
        Ok(ReportOutcome::Created { rating })
    }

    /// The fingerprint of the crash on this machine, derived from the loaded modules.
    pub fn local_uuid(&self, dump_dir: &Path) -> Result<String, ReportError> {
        tracing::info!("Getting local universal unique identification");
        let dd = DumpDir::open(dump_dir)?;
        let executable = dd.load_text(fields::EXECUTABLE)?;
        let package = dd.load_text(fields::PACKAGE)?;
        let uid = parse_uid(&dd.load_text(fields::UID)?)?;
        dd.close();

        let command = tools::unstrip_command(&self.tools, dump_dir);
        let module_list = self.run_tool(&command, RunAs::User(uid))?;
        Ok(fingerprint::local_fingerprint(
            &package,
            &executable,
            &module_list,
        ))
    }

    /// The fingerprint of the crash across machines, derived from the stored backtrace.
    pub fn global_uuid(&self, dump_dir: &Path) -> Result<String, ReportError> {
        tracing::info!("Getting global universal unique identification");
        let dd = DumpDir::open(dump_dir)?;
        let backtrace = dd.load_text(fields::BACKTRACE)?;
        let executable = dd.load_text(fields::EXECUTABLE)?;
        let package = dd.load_text(fields::PACKAGE)?;
        dd.close();

        Ok(fingerprint::global_fingerprint(
            &package,
            &executable,
            &backtrace,
        ))
    }

    /// Trims the cache and runs the installer, returning its notices.
    fn install_debug_info(&self, dump_dir: &Path) -> String {
        if let Some(cache) = DebugInfoCache::from_config(&self.debug_info) {
            if let Err(e) = cache.trim() {
                let dynerr: &dyn std::error::Error = e.as_ref();
                tracing::error!(error = dynerr, "Failed to trim the debug-info cache");
            }
        }

        tracing::info!("Searching for debug-info packages");
        let scratch_dir =
            tools::installer_scratch_dir(&self.debug_info, std::process::id(), SystemTime::now());
        let command =
            tools::installer_command(&self.tools, &self.debug_info, dump_dir, &scratch_dir);

        match self.runner.run(&command, RunAs::Current) {
            Ok(output) => {
                if !output.status.success() {
                    tracing::warn!("`{}` exited with {}", command.name(), output.status);
                }
                let parsed = tools::parse_installer_output(&output.stdout_lossy());
                for line in &parsed.progress {
                    tracing::info!("{}", line);
                }
                parsed.notices
            }
            Err(e) => {
                let dynerr: &dyn std::error::Error = &e;
                tracing::error!(error = dynerr, "Failed to install debug-info");
                String::new()
            }
        }
    }

    /// Runs an analysis tool, treating a tool that cannot be run as having printed nothing.
    fn run_tool(&self, command: &ToolCommand, run_as: RunAs) -> Result<String, ReportError> {
        match self.runner.run(command, run_as) {
            Ok(output) => {
                if !output.status.success() {
                    tracing::debug!("`{}` exited with {}", command.name(), output.status);
                }
                Ok(output.stdout_lossy())
            }
            Err(e @ (ExecError::Spawn { .. } | ExecError::Capture { .. })) => {
                let dynerr: &dyn std::error::Error = &e;
                tracing::warn!(error = dynerr, "Failed to run `{}`", command.name());
                Ok(String::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn parse_uid(uid: &str) -> Result<u32, ReportError> {
    uid.trim()
        .parse()
        .map_err(|_| ReportError::InvalidUid(uid.to_owned()))
}
