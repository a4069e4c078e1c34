//! Crash analysis for native C/C++ programs.
//!
//! Crashsift turns the dump directories written by the crash hook into reports: it runs the
//! debugger over the core dump, optionally installing missing debug-info first, rates how usable
//! the resulting backtrace is and computes fingerprints for deduplication.

#![warn(
    missing_docs,
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod cli;
mod logging;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
