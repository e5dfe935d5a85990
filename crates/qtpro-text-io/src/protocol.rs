//! Framing helpers for the carriage-return text protocol.
//!
//! Commands are sent as ASCII followed by a single carriage return.
//! Replies are read until a caller-chosen pattern appears: `\r\n` for
//! ordinary replies, `{NAK}\r\n` for the connect-time flush.

/// Line ending appended to every outbound command.
pub const LINE_ENDING: &[u8] = b"\r";

/// Pattern that terminates an ordinary reply.
pub const RESPONSE_TERMINATOR: &[u8] = b"\r\n";

/// Find the first occurrence of `pattern` in `buf`.
///
/// Returns the index just past the end of the match, so `&buf[..end]` is
/// the complete response including the pattern. An empty pattern matches
/// immediately at 0.
pub fn find_pattern(buf: &[u8], pattern: &[u8]) -> Option<usize> {
    if pattern.is_empty() {
        return Some(0);
    }
    buf.windows(pattern.len())
        .position(|window| window == pattern)
        .map(|start| start + pattern.len())
}

/// Build the bytes for one outbound command.
pub fn frame_command(payload: &str, line_ending: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + line_ending.len());
    frame.extend_from_slice(payload.as_bytes());
    frame.extend_from_slice(line_ending);
    frame
}

/// Decode reply bytes as text. The protocol is ASCII; anything else is
/// replaced rather than rejected so that a garbled byte surfaces as an
/// unparseable reply instead of a transport failure.
pub fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Remove trailing carriage returns and line feeds.
pub fn strip_line_endings(s: &str) -> &str {
    s.trim_end_matches(|c: char| c == '\r' || c == '\n')
}
