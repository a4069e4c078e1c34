//! Running external tools on behalf of a crash's owner.
//!
//! Analysis shells out to debuggers and symbol tools which read the core dump and the crashed
//! binary. Those must not run with the privileges of the analyzer itself, so every tool is
//! started through a [`CommandRunner`] which switches to the owner's identity, detaches the tool
//! into its own session and captures its standard output.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::Instant;

use nix::unistd::{Gid, Uid, User, geteuid, setgid, setgroups, setsid, setuid};
use thiserror::Error;

/// An error running an external tool.
#[derive(Debug, Error)]
pub enum ExecError {
    /// There is no passwd entry for the requested user.
    #[error("cannot get GID for UID {0}")]
    UnknownUser(u32),
    /// Looking up the passwd entry failed.
    #[error("failed to look up UID {uid}")]
    UserLookup {
        uid: u32,
        #[source]
        source: nix::Error,
    },
    /// The tool could not be started, including a failure to switch identity.
    #[error("failed to execute `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    /// Reading the output or waiting for the tool failed.
    #[error("failed to collect the result of `{program}`")]
    Capture {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Whose identity an external tool runs with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunAs {
    /// Keep the identity of the current process.
    Current,
    /// Switch to the given user and its primary group.
    User(u32),
}

/// A fully specified invocation of an external tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn envs(&self) -> &[(String, String)] {
        &self.envs
    }

    /// The file name of the program, used to tag metrics.
    pub fn name(&self) -> String {
        self.program
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// The result of a tool that ran to completion.
///
/// A non-zero exit status is not an error: analysis tools routinely fail on partial input and
/// whatever they printed until then is still useful.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
}

impl ExecOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Runs external tools and captures their standard output.
pub trait CommandRunner {
    fn run(&self, command: &ToolCommand, run_as: RunAs) -> Result<ExecOutput, ExecError>;
}

/// The [`CommandRunner`] spawning real processes.
///
/// The child gets `/dev/null` (or `/` if that cannot be opened) as standard input, a pipe as
/// standard output and inherits standard error. It is put into a new session, and when running
/// as another user its supplementary groups are reduced to the user's primary group before the
/// group and user ids are switched.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrivilegedExecutor;

impl PrivilegedExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for PrivilegedExecutor {
    fn run(&self, command: &ToolCommand, run_as: RunAs) -> Result<ExecOutput, ExecError> {
        let identity = match run_as {
            RunAs::Current => None,
            RunAs::User(uid) => identity_switch(uid)?,
        };

        let program = command.program().display().to_string();
        let name = command.name();
        let spawn_error = |source| {
            metric!(counter("tools.spawn_failed") += 1, "tool" => name.as_str());
            ExecError::Spawn {
                program: program.clone(),
                source,
            }
        };

        let stdin = null_stdin().map_err(spawn_error)?;

        let mut cmd = Command::new(command.program());
        cmd.args(command.args())
            .envs(command.envs().iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        // SAFETY: The closure runs between `fork` and `exec`. It only issues the raw
        // `setgroups`, `setgid`, `setuid` and `setsid` syscalls on values captured by copy,
        // without allocating or taking locks.
        unsafe {
            cmd.pre_exec(move || {
                if let Some((uid, gid)) = identity {
                    setgroups(&[gid])?;
                    setgid(gid)?;
                    setuid(uid)?;
                }
                setsid()?;
                Ok(())
            });
        }

        tracing::debug!("Executing: {}", command);
        let start = Instant::now();
        let mut child = cmd.spawn().map_err(spawn_error)?;

        let mut stdout = Vec::new();
        let captured = match child.stdout.take() {
            Some(mut pipe) => pipe.read_to_end(&mut stdout).map(drop),
            None => Ok(()),
        };
        // The pipe is closed at this point, so the child cannot block on a full pipe and
        // this always reaps it, whatever happened while reading.
        let status = child.wait();

        metric!(timer("tools.run") = start.elapsed(), "tool" => name.as_str());

        let capture_error = |source| ExecError::Capture {
            program: program.clone(),
            source,
        };
        captured.map_err(capture_error)?;
        let status = status.map_err(capture_error)?;

        tracing::debug!(
            "`{}` exited with {} after producing {} bytes",
            name,
            status,
            stdout.len()
        );
        Ok(ExecOutput { status, stdout })
    }
}

/// Resolves `uid` and decides whether the child needs to switch identity.
///
/// Without root privileges a process can only "switch" to itself, in which case nothing has to
/// be done. Every other combination is attempted in the child and fails the spawn if the kernel
/// refuses it.
fn identity_switch(uid: u32) -> Result<Option<(Uid, Gid)>, ExecError> {
    let target = Uid::from_raw(uid);
    let user = User::from_uid(target)
        .map_err(|source| ExecError::UserLookup { uid, source })?
        .ok_or(ExecError::UnknownUser(uid))?;

    let euid = geteuid();
    if !euid.is_root() && euid == target {
        return Ok(None);
    }
    Ok(Some((target, user.gid)))
}

fn null_stdin() -> io::Result<File> {
    File::open("/dev/null").or_else(|_| File::open("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> ToolCommand {
        ToolCommand::new("sh").arg("-c").arg(script)
    }

    #[test]
    fn test_captures_stdout_only() {
        let output = PrivilegedExecutor
            .run(&sh("echo hello; echo oops >&2"), RunAs::Current)
            .unwrap();
        assert!(output.status.success());
        assert_eq!(output.stdout_lossy(), "hello\n");
    }

    #[test]
    fn test_run_as_self() {
        let uid = geteuid().as_raw();
        let output = PrivilegedExecutor
            .run(&sh("id -u"), RunAs::User(uid))
            .unwrap();
        assert_eq!(output.stdout_lossy().trim(), uid.to_string());
    }

    #[test]
    fn test_stdin_is_detached() {
        // `cat` would block forever if it inherited the test runner's stdin.
        let output = PrivilegedExecutor
            .run(&sh("cat; echo done"), RunAs::Current)
            .unwrap();
        assert_eq!(output.stdout_lossy(), "done\n");
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_new_session() {
        let script = r#"read -r pid comm state ppid pgrp sid rest < /proc/$$/stat; [ "$pid" = "$sid" ] && echo leader"#;
        let output = PrivilegedExecutor.run(&sh(script), RunAs::Current).unwrap();
        assert_eq!(output.stdout_lossy(), "leader\n");
    }

    #[test]
    fn test_environment() {
        let command = sh("echo $TERM").env("TERM", "dumb");
        let output = PrivilegedExecutor.run(&command, RunAs::Current).unwrap();
        assert_eq!(output.stdout_lossy(), "dumb\n");
    }

    #[test]
    fn test_failing_tool_keeps_output() {
        let output = PrivilegedExecutor
            .run(&sh("echo partial; exit 3"), RunAs::Current)
            .unwrap();
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout_lossy(), "partial\n");
    }

    #[test]
    fn test_unknown_user() {
        let uid = u32::MAX - 7;
        let err = PrivilegedExecutor
            .run(&sh("true"), RunAs::User(uid))
            .unwrap_err();
        assert!(matches!(err, ExecError::UnknownUser(u) if u == uid));
    }

    #[test]
    fn test_missing_program() {
        let command = ToolCommand::new("/nonexistent/crashsift-tool").arg("--help");
        let err = PrivilegedExecutor
            .run(&command, RunAs::Current)
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[test]
    fn test_display() {
        let command = ToolCommand::new("/usr/bin/eu-unstrip")
            .arg("--core=/tmp/dd/coredump")
            .arg("-n");
        assert_eq!(command.to_string(), "/usr/bin/eu-unstrip --core=/tmp/dd/coredump -n");
        assert_eq!(command.name(), "eu-unstrip");
    }
}
