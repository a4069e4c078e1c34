use std::fs::File;

use crashsift_native::authorize::DenyAll;
use crashsift_native::rating::Rating;
use crashsift_native::{MEMORY_MAP_PLACEHOLDER, ReportError, ReportOutcome};
use crashsift_service::dump_dir::{DumpDirError, fields};
use crashsift_service::exec::{ExecError, RunAs};

use crate::{
    EXECUTABLE, RecordingRunner, UID, analyzer, debug_info_config, read_field, read_fixture,
    setup, sleep_dump_dir, tempdir,
};

const INSTALLER_OUTPUT: &str = "\
Searching for debug-info packages
MISSING:5c3b7fb32c0b3a3a5c2ba3ff95ecc7d2d2a1ae4e
Done
";

fn sleep_runner() -> RecordingRunner {
    RecordingRunner::new()
        .with_output("gdb", read_fixture("backtraces/sleep.txt"))
        .with_output("abrt-debuginfo-install", INSTALLER_OUTPUT)
}

#[test]
fn test_create_report() {
    setup();
    let scratch = tempdir();
    let dump = sleep_dump_dir();
    let runner = sleep_runner();

    let outcome = analyzer(debug_info_config(scratch.path()), &runner)
        .create_report(dump.path(), false)
        .unwrap();
    assert_eq!(outcome, ReportOutcome::Created { rating: Rating::MAX });

    let backtrace = read_field(&dump, fields::BACKTRACE);
    let expected = format!(
        "Debuginfo absent: 5c3b7fb32c0b3a3a5c2ba3ff95ecc7d2d2a1ae4e\n{}",
        read_fixture("backtraces/sleep.txt")
    );
    assert_eq!(backtrace, expected);
    assert_eq!(read_field(&dump, fields::RATING), "4");
    assert!(!dump.path().join(fields::MEMORYMAP).exists());
}

#[test]
fn test_tool_invocations() {
    setup();
    let scratch = tempdir();
    let dump = sleep_dump_dir();
    let runner = sleep_runner();

    analyzer(debug_info_config(scratch.path()), &runner)
        .create_report(dump.path(), false)
        .unwrap();

    let calls = runner.calls();
    assert_eq!(calls.len(), 2);

    // the installer writes to the shared cache and keeps our identity
    let (installer, run_as) = &calls[0];
    assert_eq!(installer.name(), "abrt-debuginfo-install");
    assert_eq!(*run_as, RunAs::Current);
    let coredump = dump.path().join("coredump").display().to_string();
    assert_eq!(installer.args()[0], coredump);
    assert!(
        installer.args()[1].starts_with(&scratch.path().join("scratch/tmp-").display().to_string())
    );
    assert_eq!(
        installer.args()[2],
        scratch.path().join("cache").display().to_string()
    );

    // the debugger runs as the owner of the crash
    let (gdb, run_as) = &calls[1];
    assert_eq!(gdb.name(), "gdb");
    assert_eq!(*run_as, RunAs::User(UID));
    assert!(gdb.args().contains(&format!("file {EXECUTABLE}")));
    assert!(gdb.args().contains(&format!("core-file {coredump}")));
}

#[test]
fn test_existing_backtrace() {
    setup();
    let scratch = tempdir();
    let dump = sleep_dump_dir();
    std::fs::write(dump.path().join(fields::BACKTRACE), "previous").unwrap();
    let runner = sleep_runner();
    let analyzer = analyzer(debug_info_config(scratch.path()), &runner);

    let outcome = analyzer.create_report(dump.path(), false).unwrap();
    assert_eq!(outcome, ReportOutcome::Skipped);
    assert!(runner.calls().is_empty());
    assert_eq!(read_field(&dump, fields::BACKTRACE), "previous");

    let outcome = analyzer.create_report(dump.path(), true).unwrap();
    assert_eq!(outcome, ReportOutcome::Created { rating: Rating::MAX });
    assert_ne!(read_field(&dump, fields::BACKTRACE), "previous");
}

#[test]
fn test_installation_disabled() {
    setup();
    let scratch = tempdir();
    let dump = sleep_dump_dir();
    let runner = sleep_runner();
    let mut config = debug_info_config(scratch.path());
    config.install = false;

    analyzer(config, &runner)
        .create_report(dump.path(), false)
        .unwrap();

    assert!(runner.calls_to("abrt-debuginfo-install").is_empty());
    assert_eq!(runner.calls_to("gdb").len(), 1);
    assert_eq!(
        read_field(&dump, fields::BACKTRACE),
        read_fixture("backtraces/sleep.txt")
    );
}

#[test]
fn test_installation_not_authorized() {
    setup();
    let scratch = tempdir();
    let dump = sleep_dump_dir();
    let runner = sleep_runner();

    analyzer(debug_info_config(scratch.path()), &runner)
        .with_authorizer(DenyAll)
        .create_report(dump.path(), false)
        .unwrap();

    assert!(runner.calls_to("abrt-debuginfo-install").is_empty());

    let dump = sleep_dump_dir();
    let mut config = debug_info_config(scratch.path());
    config.authorized_uids = Some(vec![0]);
    analyzer(config, &runner)
        .create_report(dump.path(), false)
        .unwrap();

    assert!(runner.calls_to("abrt-debuginfo-install").is_empty());
}

#[test]
fn test_memory_map() {
    setup();
    let scratch = tempdir();
    let dump = sleep_dump_dir();
    let runner = sleep_runner();
    let mut config = debug_info_config(scratch.path());
    config.memory_map = true;

    analyzer(config, &runner)
        .create_report(dump.path(), false)
        .unwrap();

    assert_eq!(read_field(&dump, fields::MEMORYMAP), MEMORY_MAP_PLACEHOLDER);
}

#[test]
fn test_debugger_missing() {
    setup();
    let scratch = tempdir();
    let dump = sleep_dump_dir();
    let runner = RecordingRunner::new()
        .with_spawn_error("gdb")
        .with_output("abrt-debuginfo-install", INSTALLER_OUTPUT);

    let outcome = analyzer(debug_info_config(scratch.path()), &runner)
        .create_report(dump.path(), false)
        .unwrap();

    assert_eq!(outcome, ReportOutcome::Created { rating: Rating::default() });
    assert_eq!(
        read_field(&dump, fields::BACKTRACE),
        "Debuginfo absent: 5c3b7fb32c0b3a3a5c2ba3ff95ecc7d2d2a1ae4e\n"
    );
    assert_eq!(read_field(&dump, fields::RATING), "0");
}

#[test]
fn test_installer_missing() {
    setup();
    let scratch = tempdir();
    let dump = sleep_dump_dir();
    let runner =
        RecordingRunner::new().with_output("gdb", read_fixture("backtraces/no-symbols.txt"));

    let outcome = analyzer(debug_info_config(scratch.path()), &runner)
        .create_report(dump.path(), false)
        .unwrap();

    assert_eq!(outcome, ReportOutcome::Created { rating: Rating::default() });
    assert_eq!(
        read_field(&dump, fields::BACKTRACE),
        read_fixture("backtraces/no-symbols.txt")
    );
}

#[test]
fn test_failing_debugger_output_is_kept() {
    setup();
    let scratch = tempdir();
    let dump = sleep_dump_dir();
    let runner = RecordingRunner::new().with_exit_code(
        "gdb",
        1,
        "#0  0x1 in main () at sleep.c:147\n",
    );
    let mut config = debug_info_config(scratch.path());
    config.install = false;

    let outcome = analyzer(config, &runner)
        .create_report(dump.path(), false)
        .unwrap();

    assert_eq!(outcome, ReportOutcome::Created { rating: Rating::MAX });
}

#[test]
fn test_unknown_user() {
    setup();
    let scratch = tempdir();
    let dump = sleep_dump_dir();
    let runner = sleep_runner().with_unknown_uid(UID);

    let err = analyzer(debug_info_config(scratch.path()), &runner)
        .create_report(dump.path(), false)
        .unwrap_err();

    assert!(matches!(
        err,
        ReportError::Exec(ExecError::UnknownUser(uid)) if uid == UID
    ));
    assert!(!dump.path().join(fields::BACKTRACE).exists());
    assert!(!dump.path().join(fields::RATING).exists());
}

#[test]
fn test_missing_fields() {
    setup();
    let scratch = tempdir();
    let dump = crate::dump_dir(&[(fields::PACKAGE, "coreutils-7.2-4.fc11")]);
    let runner = sleep_runner();

    let err = analyzer(debug_info_config(scratch.path()), &runner)
        .create_report(dump.path(), false)
        .unwrap_err();

    assert!(matches!(
        err,
        ReportError::DumpDir(DumpDirError::MissingField(_))
    ));
    assert!(runner.calls().is_empty());
}

#[test]
fn test_cache_trimmed_before_install() {
    setup();
    let scratch = tempdir();
    let config = debug_info_config(scratch.path());
    std::fs::create_dir_all(config.cache_dir.join("usr/lib/debug")).unwrap();
    let stale = config.cache_dir.join("usr/lib/debug/stale.debug");
    File::create(&stale)
        .unwrap()
        .set_len(2 * 1024 * 1024)
        .unwrap();

    let dump = sleep_dump_dir();
    let runner = sleep_runner();
    analyzer(config, &runner)
        .create_report(dump.path(), false)
        .unwrap();

    assert!(!stale.exists());
}

#[test]
fn test_cache_not_trimmed_without_budget() {
    setup();
    let scratch = tempdir();
    let mut config = debug_info_config(scratch.path());
    config.cache_size_mb = 0;
    std::fs::create_dir_all(&config.cache_dir).unwrap();
    let kept = config.cache_dir.join("kept.debug");
    File::create(&kept)
        .unwrap()
        .set_len(2 * 1024 * 1024)
        .unwrap();

    let dump = sleep_dump_dir();
    let runner = sleep_runner();
    analyzer(config, &runner)
        .create_report(dump.path(), false)
        .unwrap();

    assert!(kept.exists());
}
