//! Reducing a core dump's module list.
//!
//! `eu-unstrip -n` prints one line per mapped module:
//!
//! ```text
//! 0x400000+0x209000 ab3c8286aac6c043fd1bb1cc2a0b88ec29517d3e@0x40024c /bin/sleep /usr/lib/debug/bin/sleep.debug [exe]
//! ```
//!
//! The load address and everything from the `@` on depend on the run. What remains is the
//! mapping size and build id, `0x209000ab3c8286aac6c043fd1bb1cc2a0b88ec29517d3e` above.

/// Concatenates the size and build id of every module line.
///
/// Lines without a `+` contribute nothing. Whitespace between the `+` and the `@` is dropped.
pub fn normalize(module_list: &str) -> String {
    let mut normalized = String::new();
    for line in module_list.split('\n') {
        let Some((_, rest)) = line.split_once('+') else {
            continue;
        };
        let fragment = rest.split_once('@').map_or(rest, |(fragment, _)| fragment);
        normalized.extend(fragment.chars().filter(|c| !is_c_space(*c)));
    }
    normalized
}

fn is_c_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\x0b' | '\x0c' | '\r')
}
