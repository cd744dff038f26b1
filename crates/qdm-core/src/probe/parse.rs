//! Parse HTTP response header lines collected by curl.

/// Key facts from a header block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ParsedHeaders {
    /// Status code from the last `HTTP/` line.
    pub status: Option<u32>,
    /// `Content-Length`, if present.
    pub content_length: Option<u64>,
    /// True if the server sent `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
}

/// Status code of an `HTTP/x.y NNN reason` line, or None for any other line.
pub(crate) fn parse_status_line(line: &str) -> Option<u32> {
    let line = line.trim();
    if !line.starts_with("HTTP/") {
        return None;
    }
    line.split_whitespace().nth(1)?.parse().ok()
}

/// Parse collected header lines. A new status line (redirect hop) resets the
/// fields so only the final response counts.
pub(crate) fn parse_headers(lines: &[String]) -> ParsedHeaders {
    let mut out = ParsedHeaders::default();

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(code) = parse_status_line(line) {
            out = ParsedHeaders {
                status: Some(code),
                ..ParsedHeaders::default()
            };
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                if let Ok(n) = value.parse::<u64>() {
                    out.content_length = Some(n);
                }
            }
            if name.eq_ignore_ascii_case("accept-ranges") {
                out.accept_ranges = value.eq_ignore_ascii_case("bytes");
            }
        }
    }

    out
}
