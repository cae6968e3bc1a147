//! Whitespace-boundary text splitter.
//!
//! Splits extracted text into segments of at most `max_len` bytes, cutting
//! just after the last whitespace character inside the window so words stay
//! intact. Concatenating the returned segments in order reproduces the input
//! exactly, including the whitespace at each boundary.

/// Split `text` into segments no longer than `max_len` bytes.
///
/// The cut lands after the last of space, newline, tab or carriage return
/// inside the window, so the boundary whitespace stays with the earlier
/// segment. A window with no whitespace is cut at `max_len` (nudged down to
/// a UTF-8 char boundary). Always returns at least one segment; empty input
/// yields one empty segment, which becomes the placeholder row for files
/// the extraction service could not read.
pub fn split_at(text: &str, max_len: usize) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut rest = text;
    while rest.len() > max_len {
        let window = floor_char_boundary(rest, max_len);
        let mut cut = match rest[..window].rfind([' ', '\n', '\t', '\r']) {
            Some(i) if i > 0 => i + 1,
            _ => window,
        };
        if cut == 0 {
            // max_len falls inside the first character; emit that whole
            // character rather than loop forever
            cut = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        segments.push(&rest[..cut]);
        rest = &rest[cut..];
    }
    segments.push(rest);
    segments
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
