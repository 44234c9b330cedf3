//! Helper utilities for Chainsock
//!
//! This module provides shared constants and small byte helpers used by the
//! session and the proxy handshakes.

/// Default operation timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Size of a single socket read when filling the line buffer
pub const READ_CHUNK_SIZE: usize = 4096;

/// Longest status or header line accepted from an HTTP proxy
pub const MAX_HANDSHAKE_LINE: usize = 8192;

/// Position of the first `\n` in `buf`
pub fn find_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

/// Strip a trailing `\r\n` or `\n`
pub fn trim_line_ending(line: &[u8]) -> &[u8] {
    match line.strip_suffix(b"\n") {
        Some(line) => line.strip_suffix(b"\r").unwrap_or(line),
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_TIMEOUT_MS, 60_000);
        assert_eq!(READ_CHUNK_SIZE, 4096);
        assert_eq!(MAX_HANDSHAKE_LINE, 8192);
    }

    #[test]
    fn test_find_newline() {
        assert_eq!(find_newline(b"foo\r\nbar"), Some(4));
        assert_eq!(find_newline(b"\n"), Some(0));
        assert_eq!(find_newline(b"no terminator"), None);
        assert_eq!(find_newline(b""), None);
    }

    #[test]
    fn test_trim_line_ending() {
        assert_eq!(trim_line_ending(b"foo\r\n"), b"foo");
        assert_eq!(trim_line_ending(b"foo\n"), b"foo");
        assert_eq!(trim_line_ending(b"foo"), b"foo");
        assert_eq!(trim_line_ending(b"\r\n"), b"");
        // a bare carriage return is not a line ending
        assert_eq!(trim_line_ending(b"foo\r"), b"foo\r");
    }
}
