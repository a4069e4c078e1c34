//! Infrastructure shared by the crashsift analyzers.
//!
//! This crate holds everything that is not specific to a particular crash type: loading the
//! configuration and metrics, access to dump directories, running external tools under
//! the identity of the crashed process' owner, bounding the shared debug-info cache, and
//! registering the core-dump hook with the kernel.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod core_pattern;
pub mod dump_dir;
pub mod exec;
