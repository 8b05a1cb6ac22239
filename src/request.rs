// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Byte-oriented request line / header scanner.
//!
//! Walks indices into a fixed read buffer rather than leaning on a regex
//! engine or borrowing `&str` slices out of it — the buffer gets cleared and
//! refilled on every keep-alive reuse, so nothing here can outlive one parse.

use std::fmt::Display;

/// The only method this server accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// RFC 9110 §9.3.1
    Get,
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GET")
    }
}

/// Named states a request line/header scan could be in. Only `ReadingBody`
/// is unreachable in this GET-only core; it's kept so the state space stays
/// honest about what a future method with a body would need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Scanning for `METHOD SP TARGET SP VERSION CRLF`.
    ReadingRequestLine,
    /// Scanning header lines until an empty line terminates them.
    ReadingHeaders,
    /// Unreachable: this core never parses a request body.
    ReadingBody,
}

/// Why a request was rejected. Each variant maps to `400 Bad Request`; kept
/// distinct because it is useful in tests and diagnostics to know which check
/// failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// No CRLF found for the current line within the buffered bytes.
    Incomplete,
    /// Method token did not match `GET`.
    Method,
    /// Target is missing, doesn't start with `/`, or contains disallowed bytes.
    Target,
    /// Version token was not exactly `HTTP/1.1`.
    Version,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ParseError::Incomplete => "request not fully buffered",
            ParseError::Method => "unsupported or malformed method",
            ParseError::Target => "malformed request target",
            ParseError::Version => "unsupported or malformed HTTP version",
        })
    }
}

impl std::error::Error for ParseError {}

/// Successfully parsed request line plus header-derived state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    /// Always `Method::Get`; kept for symmetry with a future method set.
    pub method: Method,
    /// The request target, e.g. `/index.html`. Always starts with `/`.
    pub target: Box<str>,
    /// Collapses to `false` the moment a `Connection:` header is seen whose
    /// value doesn't contain `keep-alive` (case-insensitive). Never flips
    /// back to `true` within one parse.
    pub keep_alive: bool,
    /// Index just past the terminating CRLFCRLF, i.e. where a request body
    /// (never parsed by this core) would begin.
    pub consumed: usize,
}

/// Finds the next `\r\n` in `buf[from..]`, returning the index of the byte
/// just past it, or `None` if no full line terminator is present yet.
fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i + 1 < buf.len() {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            return Some(i + 2);
        }
        i += 1;
    }
    None
}

fn is_request_target_byte(b: u8) -> bool {
    // Printable ASCII, excluding the space that separates target from version.
    b.is_ascii_graphic()
}

/// Parses a request line followed by headers out of `buf`.
///
/// There is no partial-request continuation: if the full
/// request-line-plus-headers isn't present in `buf` yet, this returns
/// `ParseError::Incomplete`, which the caller treats identically to any other
/// parse failure (400, connection closed). The read budget on the caller's
/// fixed buffer is what bounds how much a client may send before that
/// happens.
pub fn parse(buf: &[u8]) -> Result<ParsedRequest, ParseError> {
    let line_end = find_crlf(buf, 0).ok_or(ParseError::Incomplete)?;
    let line = &buf[..line_end - 2];

    let mut parts = line.splitn(3, |&b| b == b' ');
    let method_tok = parts.next().ok_or(ParseError::Method)?;
    let target_tok = parts.next().ok_or(ParseError::Target)?;
    let version_tok = parts.next().ok_or(ParseError::Version)?;
    // splitn(3, ' ') on "GET / HTTP/1.1" yields exactly 3 parts; any
    // remaining space-separated junk would have landed inside version_tok,
    // so reject it explicitly rather than silently accepting it.
    if version_tok.contains(&b' ') {
        return Err(ParseError::Version);
    }

    if method_tok != b"GET" {
        return Err(ParseError::Method);
    }

    if target_tok.first() != Some(&b'/') || !target_tok.iter().all(|&b| is_request_target_byte(b)) {
        return Err(ParseError::Target);
    }
    // SAFETY: every byte in target_tok passed `is_ascii_graphic`, which is a
    // subset of valid UTF-8.
    let target: Box<str> = unsafe { std::str::from_utf8_unchecked(target_tok) }.into();

    if version_tok != b"HTTP/1.1" {
        return Err(ParseError::Version);
    }

    let mut keep_alive = true;
    let mut pos = line_end;
    loop {
        let header_end = find_crlf(buf, pos).ok_or(ParseError::Incomplete)?;
        let header_line = &buf[pos..header_end - 2];
        pos = header_end;

        if header_line.is_empty() {
            break;
        }

        if let Some(rest) = header_line.strip_prefix(b"Connection:") {
            if !contains_case_insensitive(rest, b"keep-alive") {
                keep_alive = false;
            }
        }
        // Any other header is reserved for future extension and ignored.
    }

    Ok(ParsedRequest {
        method: Method::Get,
        target,
        keep_alive,
        consumed: pos,
    })
}

fn contains_case_insensitive(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || haystack.len() < needle.len() {
        return needle.is_empty();
    }
    haystack
        .windows(needle.len())
        .any(|w| w.eq_ignore_ascii_case(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_get_with_keep_alive_header() {
        let req = parse(b"GET /index.html HTTP/1.1\r\nConnection: keep-alive\r\n\r\n").unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(&*req.target, "/index.html");
        assert!(req.keep_alive);
    }

    #[test]
    fn parses_without_connection_header_as_keep_alive() {
        let req = parse(b"GET /missing HTTP/1.1\r\n\r\n").unwrap();
        assert!(req.keep_alive);
    }

    #[test]
    fn connection_close_collapses_keep_alive() {
        let req = parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(!req.keep_alive);
    }

    #[test]
    fn connection_header_match_is_case_insensitive() {
        let req = parse(b"GET / HTTP/1.1\r\nConnection: Keep-Alive\r\n\r\n").unwrap();
        assert!(req.keep_alive);
    }

    #[test]
    fn target_without_leading_slash_is_bad_request() {
        assert_eq!(parse(b"GET foo HTTP/1.1\r\n\r\n"), Err(ParseError::Target));
    }

    #[test]
    fn non_get_method_is_bad_request() {
        assert_eq!(parse(b"POST /x HTTP/1.1\r\n\r\n"), Err(ParseError::Method));
    }

    #[test]
    fn wrong_version_is_bad_request() {
        assert_eq!(
            parse(b"GET / HTTP/1.0\r\n\r\n"),
            Err(ParseError::Version)
        );
    }

    #[test]
    fn missing_terminator_is_incomplete() {
        assert_eq!(
            parse(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n"),
            Err(ParseError::Incomplete)
        );
    }

    #[test]
    fn other_headers_are_ignored() {
        let req = parse(b"GET / HTTP/1.1\r\nX-Custom: whatever\r\n\r\n").unwrap();
        assert!(req.keep_alive);
    }

    #[test]
    fn two_identical_requests_parse_identically() {
        let raw: &[u8] = b"GET /a HTTP/1.1\r\n\r\n";
        assert_eq!(parse(raw).unwrap(), parse(raw).unwrap());
    }
}
