//! Reducing crash artifacts to the parts that identify a crash.
//!
//! Two runs of the same crash produce different addresses, argument values and thread ids. To
//! recognize them as the same problem, the debugger backtrace is reduced to the function names
//! and source locations of its innermost frames. Each frame header such as
//!
//! ```text
//! #3  0x0000000000401779 in main (argc=2, argv=0x7fff8999e598) at sleep.c:147
//! ```
//!
//! becomes a [`CanonicalFrame`] `#inmain()atsleep.c147`: whitespace, numbers before the
//! source location, string literals and argument lists are dropped. Only frames `#0` through
//! `#7` which carry a source location are considered, and duplicates collapse.
//!
//! See [`buildid`] for the equivalent reduction of the module list of a core dump.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

pub mod buildid;
mod scanner;

use scanner::Scanner;

/// A frame header with all run-specific detail removed.
///
/// Frames compare by their canonical text only.
#[derive(Clone, Debug)]
pub struct CanonicalFrame {
    text: String,
    line_at: usize,
}

impl CanonicalFrame {
    fn new(signature: &str, line: &str) -> Self {
        Self {
            text: format!("{signature}{line}"),
            line_at: signature.len(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Everything up to the line number: frame marker, function, arguments and file name.
    pub fn signature(&self) -> &str {
        &self.text[..self.line_at]
    }

    /// The line number and whatever followed it on the header line.
    pub fn line(&self) -> &str {
        &self.text[self.line_at..]
    }
}

impl PartialEq for CanonicalFrame {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for CanonicalFrame {}

impl PartialOrd for CanonicalFrame {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CanonicalFrame {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.text.cmp(&other.text)
    }
}

impl Hash for CanonicalFrame {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

impl fmt::Display for CanonicalFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// The deduplicated canonical frames of a backtrace, in byte order.
///
/// Its [`Display`](fmt::Display) output is the concatenation of all frames and is what goes
/// into the global fingerprint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NormalizedBacktrace {
    frames: BTreeSet<CanonicalFrame>,
}

impl NormalizedBacktrace {
    pub fn frames(&self) -> impl Iterator<Item = &CanonicalFrame> {
        self.frames.iter()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Renders the frames as debugger-like header lines.
    ///
    /// Normalizing the result yields the same frames again.
    pub fn render(&self) -> String {
        let mut rendered = String::new();
        for frame in &self.frames {
            let signature = frame.signature();
            let signature = signature.strip_prefix('#').unwrap_or(signature);
            rendered.push_str("#0 ");
            rendered.push_str(signature);
            rendered.push(':');
            rendered.push_str(frame.line());
            rendered.push('\n');
        }
        rendered
    }
}

impl fmt::Display for NormalizedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in &self.frames {
            f.write_str(frame.as_str())?;
        }
        Ok(())
    }
}

/// Reduces a raw debugger backtrace to its canonical frames.
pub fn normalize(backtrace: &str) -> NormalizedBacktrace {
    let frames = Scanner::default().scan(backtrace.as_bytes());
    tracing::trace!("Normalized backtrace to {} frames", frames.len());
    NormalizedBacktrace { frames }
}
