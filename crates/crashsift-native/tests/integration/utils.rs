use std::path::Path;

use crashsift_native::CCppAnalyzer;
use crashsift_service::config::{DebugInfoConfig, ToolsConfig};
use crashsift_service::dump_dir::fields;

pub use crashsift_test::{
    RecordingRunner, TempDir, dump_dir, fixture, read_fixture, setup, tempdir,
};

pub const PACKAGE: &str = "coreutils-7.2-4.fc11";
pub const EXECUTABLE: &str = "/bin/sleep";
pub const UID: u32 = 1000;

/// A dump directory of a crashed `sleep`, without a backtrace.
pub fn sleep_dump_dir() -> TempDir {
    dump_dir(&[
        (fields::PACKAGE, PACKAGE),
        (fields::EXECUTABLE, EXECUTABLE),
        (fields::UID, "1000"),
    ])
}

/// Debug-info configuration confined to `root`.
///
/// Installation is enabled and the cache budget is 1 MB.
pub fn debug_info_config(root: &Path) -> DebugInfoConfig {
    DebugInfoConfig {
        install: true,
        cache_size_mb: 1,
        cache_dir: root.join("cache"),
        scratch_dir: root.join("scratch"),
        ..Default::default()
    }
}

pub fn analyzer(
    debug_info: DebugInfoConfig,
    runner: &RecordingRunner,
) -> CCppAnalyzer<RecordingRunner> {
    CCppAnalyzer::new(debug_info, ToolsConfig::default(), runner.clone())
}

pub fn read_field(dump_dir: &TempDir, name: &str) -> String {
    std::fs::read_to_string(dump_dir.path().join(name)).unwrap()
}
