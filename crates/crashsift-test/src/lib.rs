//! Helpers for testing crash analysis.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`] or [`dump_dir`], make sure that the handle to the temp directory
//!    is held for the entire lifetime of the test. Assign it to a variable in the test function
//!    (e.g. `let dump = test::dump_dir(&[...])`).
//!
//!  - External tools are never run for real. Use a [`RecordingRunner`] with canned outputs and
//!    inspect the recorded invocations afterwards.

use std::collections::BTreeMap;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};

use crashsift_service::exec::{CommandRunner, ExecError, ExecOutput, RunAs, ToolCommand};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the crashsift crates and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("crashsift_service=trace,crashsift_native=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped, unless
/// [`keep`](TempDir::keep) is called. Use it as a guard to automatically clean up after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Creates a dump directory holding the given fields.
///
/// An empty `coredump` is added unless one is given.
pub fn dump_dir(fields: &[(&str, &str)]) -> TempDir {
    let dir = tempdir();
    for (name, contents) in fields {
        std::fs::write(dir.path().join(name), contents).unwrap();
    }
    let coredump = dir.path().join("coredump");
    if !coredump.exists() {
        std::fs::write(coredump, b"").unwrap();
    }
    dir
}

/// Returns the absolute path to the given fixture.
///
/// Fixtures are located in the `tests/fixtures` directory, located from the workspace root.
///
/// # Panics
///
/// Panics if the fixture path does not exist on the file system.
pub fn fixture(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();

    let mut full_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    full_path.pop(); // to /crates/
    full_path.pop(); // to /
    full_path.push("./tests/fixtures/");
    full_path.push(path);

    assert!(full_path.exists(), "'{}' does not exist", path.display());

    full_path
}

/// Returns the contents of a fixture as text.
///
/// # Panics
///
/// Panics if the fixture does not exist or is not valid UTF-8.
pub fn read_fixture(path: impl AsRef<Path>) -> String {
    std::fs::read_to_string(fixture(path)).unwrap()
}

#[derive(Clone, Debug)]
enum Canned {
    Output { code: i32, stdout: Vec<u8> },
    SpawnError,
}

#[derive(Debug, Default)]
struct Recording {
    canned: BTreeMap<String, Canned>,
    unknown_uids: Vec<u32>,
    calls: Vec<(ToolCommand, RunAs)>,
}

/// A [`CommandRunner`] answering with canned outputs and recording every invocation.
///
/// Outputs are looked up by the file name of the program. Programs without a canned output
/// fail to spawn, like a tool that is not installed. Clones share their state, so a clone can
/// be handed to the code under test while the original is used for inspection.
#[derive(Clone, Debug, Default)]
pub struct RecordingRunner {
    inner: Arc<Mutex<Recording>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `program` print `stdout` and exit successfully.
    pub fn with_output(self, program: &str, stdout: impl Into<Vec<u8>>) -> Self {
        self.with_exit_code(program, 0, stdout)
    }

    /// Lets `program` print `stdout` and exit with `code`.
    pub fn with_exit_code(self, program: &str, code: i32, stdout: impl Into<Vec<u8>>) -> Self {
        let canned = Canned::Output {
            code,
            stdout: stdout.into(),
        };
        self.inner
            .lock()
            .unwrap()
            .canned
            .insert(program.to_owned(), canned);
        self
    }

    /// Lets `program` fail to spawn.
    pub fn with_spawn_error(self, program: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .canned
            .insert(program.to_owned(), Canned::SpawnError);
        self
    }

    /// Pretends that `uid` has no passwd entry.
    pub fn with_unknown_uid(self, uid: u32) -> Self {
        self.inner.lock().unwrap().unknown_uids.push(uid);
        self
    }

    /// All invocations so far, in order.
    pub fn calls(&self) -> Vec<(ToolCommand, RunAs)> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// The invocations of `program` so far, in order.
    pub fn calls_to(&self, program: &str) -> Vec<(ToolCommand, RunAs)> {
        self.calls()
            .into_iter()
            .filter(|(command, _)| command.name() == program)
            .collect()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, command: &ToolCommand, run_as: RunAs) -> Result<ExecOutput, ExecError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push((command.clone(), run_as));

        if let RunAs::User(uid) = run_as {
            if inner.unknown_uids.contains(&uid) {
                return Err(ExecError::UnknownUser(uid));
            }
        }

        match inner.canned.get(&command.name()) {
            Some(Canned::Output { code, stdout }) => Ok(ExecOutput {
                status: ExitStatus::from_raw(code << 8),
                stdout: stdout.clone(),
            }),
            Some(Canned::SpawnError) | None => Err(ExecError::Spawn {
                program: command.program().display().to_string(),
                source: io::Error::from(io::ErrorKind::NotFound),
            }),
        }
    }
}
