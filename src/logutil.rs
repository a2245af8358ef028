//! Helpers that keep log lines single-line and bounded: free text from
//! remote nodes or config files, and raw radio bytes.

/// Longest free-text preview written to the log, in characters.
pub const MAX_PREVIEW: usize = 300;

/// Escape a string for single-line logging, capped at [`MAX_PREVIEW`] characters.
///
/// Line breaks, tabs and backslashes get their usual escapes; any other
/// control character becomes `\xNN`.
pub fn escape_log(s: &str) -> String {
    escape_capped(s, MAX_PREVIEW)
}

fn escape_capped(s: &str, cap: usize) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(s.len().min(cap) + 8);
    let mut chars = s.chars();
    for ch in chars.by_ref().take(cap) {
        let _ = match ch {
            '\\' | '\n' | '\r' | '\t' => write!(&mut out, "{}", ch.escape_default()),
            c if c.is_control() => write!(&mut out, "\\x{:02X}", c as u32),
            c => write!(&mut out, "{c}"),
        };
    }
    if chars.next().is_some() {
        out.push('…');
    }
    out
}

/// Space separated upper-case hex of at most `max` bytes, with a `(+N)` suffix
/// counting what was left out.
pub fn hex_snippet(bytes: &[u8], max: usize) -> String {
    use std::fmt::Write;
    let shown = bytes.len().min(max);
    let mut out = String::with_capacity(shown * 3 + 8);
    for (i, b) in bytes[..shown].iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(&mut out, "{:02X}", b);
    }
    if bytes.len() > shown {
        let _ = write!(&mut out, " (+{})", bytes.len() - shown);
    }
    out
}
