//! # The debug-info cache
//!
//! Debug-info installed for crashes is unpacked into a cache directory shared by all report
//! generations on the machine. Nothing ever expires from it on its own, so before installing
//! more debug-info the cache is trimmed to a configured size budget.
//!
//! ## Eviction
//!
//! Every regular file below the cache root is weighted by `size_in_KiB * age_in_minutes`, where
//! the age is derived from the modification time. Files younger than a minute, or with a
//! modification time in the future, are weighted by their size alone. While the cache is at or
//! above budget, the file with the highest weight is removed and the cache is measured again
//! from scratch. Large files that were not touched for a long time thus go first.
//!
//! Files which cannot be removed are logged and excluded from further selection for the rest
//! of the trimming pass. The whole pass runs under an exclusive advisory lock on
//! `<root>/.trim.lock` so that two concurrent report generations do not both pick the same
//! victim.
//!
//! ### Metrics
//!
//! - `debuginfo_cache.evicted_files`: Files removed by a trimming pass.
//! - `debuginfo_cache.evicted_bytes`: Bytes removed by a trimming pass.
//! - `debuginfo_cache.size.bytes`: Size of the cache after trimming.

mod cleanup;

pub use cleanup::{CacheUsage, DebugInfoCache, EvictionCandidate, TrimStats, eviction_weight};
