//! Helpers for logging raw device output. Firmware debug lines can carry
//! control characters and partial ANSI sequences, and frame payloads are
//! binary; these render both as single-line printable log records.

/// Cap on how much of one device debug line makes it into the log.
const LINE_BUDGET: usize = 240;

/// Render a device debug line printable and single-line. Control characters
/// come out in their escaped form (`\n`, `\r`, `\u{1b}`, ...); anything past
/// [`LINE_BUDGET`] characters is cut with an ellipsis.
pub fn printable_line(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(LINE_BUDGET) + 4);
    let mut chars = raw.chars();
    for ch in chars.by_ref().take(LINE_BUDGET) {
        if ch.is_control() {
            out.extend(ch.escape_debug());
        } else {
            out.push(ch);
        }
    }
    if chars.next().is_some() {
        out.push('…');
    }
    out
}

/// Lowercase hex dump of at most `limit` leading bytes, with an ellipsis
/// when the buffer goes on. For frame traces.
pub fn hex_preview(bytes: &[u8], limit: usize) -> String {
    use std::fmt::Write;
    let shown = &bytes[..bytes.len().min(limit)];
    let mut out = String::with_capacity(shown.len() * 2 + 4);
    for b in shown {
        let _ = write!(out, "{:02x}", b);
    }
    if bytes.len() > limit {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{hex_preview, printable_line, LINE_BUDGET};

    #[test]
    fn firmware_line_stays_single_line() {
        let raw = "INFO  | 12:03:55 204 [Router] Radio init\r\x1b[0m";
        let rendered = printable_line(raw);
        assert_eq!(
            rendered,
            "INFO  | 12:03:55 204 [Router] Radio init\\r\\u{1b}[0m"
        );
        assert!(!rendered.contains('\r'));
    }

    #[test]
    fn long_line_is_cut_with_ellipsis() {
        let raw = "x".repeat(LINE_BUDGET + 50);
        let rendered = printable_line(&raw);
        assert!(rendered.ends_with('…'));
        assert_eq!(rendered.chars().count(), LINE_BUDGET + 1);
    }

    #[test]
    fn hex_preview_of_frame_header() {
        let header = [0x94, 0xC3, 0x00, 0x02, 0xAA, 0xBB];
        assert_eq!(hex_preview(&header, 4), "94c30002…");
        assert_eq!(hex_preview(&header, 16), "94c30002aabb");
    }
}
