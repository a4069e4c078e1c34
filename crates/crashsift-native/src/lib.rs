//! Analysis of native C/C++ crashes.
//!
//! Given a dump directory with a core dump, [`CCppAnalyzer`] produces a backtrace through the
//! debugger, rates its quality and derives the fingerprints used to deduplicate crashes.

pub mod authorize;
pub mod fingerprint;
pub mod normalize;
pub mod rating;
mod report;
pub mod tools;

pub use report::{CCppAnalyzer, MEMORY_MAP_PLACEHOLDER, ReportError, ReportOutcome};
