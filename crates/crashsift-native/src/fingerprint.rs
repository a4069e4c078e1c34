//! Crash fingerprints.
//!
//! Two fingerprints identify a crash. The local one is derived from the build ids of the loaded
//! modules and only matches crashes of the very same binaries, which makes it suitable for
//! deduplicating crashes on one machine. The global one is derived from the normalized
//! backtrace and matches the same crash across machines as long as the package is the same.

use sha1::{Digest, Sha1};

use crate::normalize::{self, buildid};

/// Lowercase hex SHA-1 of `input`.
pub fn hash_hex(input: &[u8]) -> String {
    hex::encode(Sha1::digest(input))
}

fn fingerprint(package: &str, executable: &str, payload: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(package);
    hasher.update(executable);
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

/// Fingerprint from the `eu-unstrip -n` output of the core dump.
pub fn local_fingerprint(package: &str, executable: &str, module_list: &str) -> String {
    fingerprint(package, executable, &buildid::normalize(module_list))
}

/// Fingerprint from the raw debugger backtrace.
pub fn global_fingerprint(package: &str, executable: &str, backtrace: &str) -> String {
    let normalized = normalize::normalize(backtrace).to_string();
    fingerprint(package, executable, &normalized)
}
