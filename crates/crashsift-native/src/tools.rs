//! Invocations of the external analysis tools.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crashsift_service::config::{DebugInfoConfig, ToolsConfig};
use crashsift_service::dump_dir::DumpDir;
use crashsift_service::exec::ToolCommand;

/// The debugger printing a full backtrace of all threads in the core dump.
///
/// Debug-info is looked up in the system directory first and then in the cache the installer
/// populates.
pub fn gdb_command(
    tools: &ToolsConfig,
    debug_info: &DebugInfoConfig,
    executable: &str,
    dump_dir: &Path,
) -> ToolCommand {
    let debug_file_directory = format!(
        "set debug-file-directory {}:{}",
        debug_info.system_dir.display(),
        debug_info.cache_dir.join("usr/lib/debug").display()
    );
    ToolCommand::new(&tools.gdb)
        .arg("-batch")
        .arg("-ex")
        .arg(debug_file_directory)
        .arg("-ex")
        .arg(format!("file {executable}"))
        .arg("-ex")
        .arg(format!(
            "core-file {}",
            DumpDir::coredump_path(dump_dir).display()
        ))
        .arg("-ex")
        .arg("thread apply all backtrace full")
        .env("TERM", "dumb")
}

/// The module lister printing `base+size build-id@pc ...` lines for the core dump.
pub fn unstrip_command(tools: &ToolsConfig, dump_dir: &Path) -> ToolCommand {
    ToolCommand::new(&tools.unstrip)
        .arg(format!(
            "--core={}",
            DumpDir::coredump_path(dump_dir).display()
        ))
        .arg("-n")
}

/// A scratch directory for one installer run, unique per process and second.
pub fn installer_scratch_dir(debug_info: &DebugInfoConfig, pid: u32, now: SystemTime) -> PathBuf {
    let secs = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    debug_info.scratch_dir.join(format!("tmp-{pid}-{secs}"))
}

/// The helper installing the debug-info needed for the core dump into the cache.
pub fn installer_command(
    tools: &ToolsConfig,
    debug_info: &DebugInfoConfig,
    dump_dir: &Path,
    scratch_dir: &Path,
) -> ToolCommand {
    ToolCommand::new(&tools.debuginfo_install)
        .arg(DumpDir::coredump_path(dump_dir).display().to_string())
        .arg(scratch_dir.display().to_string())
        .arg(debug_info.cache_dir.display().to_string())
}

/// What the installer reported.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstallerOutput {
    /// `Debuginfo absent: ...` lines to prepend to the backtrace.
    pub notices: String,
    /// Every non-blank line, for progress logging.
    pub progress: Vec<String>,
}

/// Parses the standard output of the installer.
///
/// A line `MISSING:<rest>` turns into the notice `Debuginfo absent: <rest>`.
pub fn parse_installer_output(output: &str) -> InstallerOutput {
    let mut parsed = InstallerOutput::default();
    for line in output.lines() {
        if let Some(missing) = line.strip_prefix("MISSING:") {
            parsed.notices.push_str("Debuginfo absent: ");
            parsed.notices.push_str(missing);
            parsed.notices.push('\n');
        }
        if !line.trim_start_matches([' ', '\t']).is_empty() {
            parsed.progress.push(line.to_owned());
        }
    }
    parsed
}
