use crashsift_native::fingerprint::{global_fingerprint, local_fingerprint};
use crashsift_service::dump_dir::fields;
use crashsift_service::exec::RunAs;

use crate::{
    EXECUTABLE, PACKAGE, RecordingRunner, UID, analyzer, debug_info_config, dump_dir,
    read_fixture, setup, sleep_dump_dir, tempdir,
};

fn dump_with_backtrace(backtrace: &str) -> crate::TempDir {
    dump_dir(&[
        (fields::PACKAGE, PACKAGE),
        (fields::EXECUTABLE, EXECUTABLE),
        (fields::UID, "1000"),
        (fields::BACKTRACE, backtrace),
    ])
}

#[test]
fn test_local_uuid() {
    setup();
    let scratch = tempdir();
    let dump = sleep_dump_dir();
    let runner = RecordingRunner::new().with_output("eu-unstrip", read_fixture("unstrip/sleep.txt"));

    let uuid = analyzer(debug_info_config(scratch.path()), &runner)
        .local_uuid(dump.path())
        .unwrap();

    assert_eq!(uuid, "42d0c8e9ad96f704ae1f2d3ee9a7f3437ddd1fcb");
    assert_eq!(
        uuid,
        local_fingerprint(PACKAGE, EXECUTABLE, &read_fixture("unstrip/sleep.txt"))
    );

    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    let (command, run_as) = &calls[0];
    assert_eq!(run_as, &RunAs::User(UID));
    assert_eq!(
        command.args(),
        [
            format!("--core={}", dump.path().join("coredump").display()),
            "-n".to_owned(),
        ]
    );

    // nothing is written to the dump directory
    assert!(!dump.path().join(fields::BACKTRACE).exists());
}

#[test]
fn test_global_uuid() {
    setup();
    let scratch = tempdir();
    let runner = RecordingRunner::new();
    let analyzer = analyzer(debug_info_config(scratch.path()), &runner);

    let first = dump_with_backtrace(&read_fixture("backtraces/sleep.txt"));
    let uuid = analyzer.global_uuid(first.path()).unwrap();
    assert_eq!(uuid, "cba4d6b54b4f34cf38eb46d71a6e7654e9cfa8a6");

    // another run of the same crash
    let rerun = dump_with_backtrace(&read_fixture("backtraces/sleep-rerun.txt"));
    assert_eq!(analyzer.global_uuid(rerun.path()).unwrap(), uuid);

    // the global fingerprint never runs tools
    assert!(runner.calls().is_empty());
}

#[test]
fn test_global_uuid_ignores_notices() {
    setup();
    let scratch = tempdir();
    let runner = RecordingRunner::new();
    let analyzer = analyzer(debug_info_config(scratch.path()), &runner);

    let backtrace = read_fixture("backtraces/sleep.txt");
    let with_notices = format!("Debuginfo absent: 5c3b7fb32c0b3a3a5c2ba3ff95ecc7d2d2a1ae4e\n{backtrace}");
    let dump = dump_with_backtrace(&with_notices);

    assert_eq!(
        analyzer.global_uuid(dump.path()).unwrap(),
        global_fingerprint(PACKAGE, EXECUTABLE, &backtrace)
    );
}

#[test]
fn test_global_uuid_requires_backtrace() {
    setup();
    let scratch = tempdir();
    let dump = sleep_dump_dir();
    let runner = RecordingRunner::new();

    assert!(
        analyzer(debug_info_config(scratch.path()), &runner)
            .global_uuid(dump.path())
            .is_err()
    );
}

#[test]
fn test_report_then_global_uuid() {
    setup();
    let scratch = tempdir();
    let dump = sleep_dump_dir();
    let runner = RecordingRunner::new()
        .with_output("gdb", read_fixture("backtraces/sleep.txt"))
        .with_output("abrt-debuginfo-install", "MISSING:ab3c8286aac6c043fd1bb1cc2a0b88ec29517d3e\n");
    let analyzer = analyzer(debug_info_config(scratch.path()), &runner);

    analyzer.create_report(dump.path(), false).unwrap();
    assert_eq!(
        analyzer.global_uuid(dump.path()).unwrap(),
        "cba4d6b54b4f34cf38eb46d71a6e7654e9cfa8a6"
    );
}
