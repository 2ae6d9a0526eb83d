//! HTTP/1.1 request-line and header parsing (RFC 9112).

use super::tokens::{is_header_name_token, is_header_value_token, is_request_target_token};
use super::ParseError;
use crate::method::Method;
use crate::raw_request::RawRequest;
use crate::version::Version;

enum Token<'a> {
    Found(&'a [u8]),
    Incomplete,
    Empty,
}

fn take_token<'a>(cur: &mut RawRequest<'a>, stop: impl Fn(u8) -> bool) -> Token<'a> {
    match cur.take_until(stop) {
        Some(tok) => Token::Found(tok),
        None if cur.is_empty() => Token::Incomplete,
        None => Token::Empty,
    }
}

/// A parsed HTTP/1.1 request-line plus headers. Headers and the target are
/// owned (not borrowed from the read buffer): the slot this lives in is
/// reused across requests on the same connection, so the backing bytes are
/// gone by the time the next request is parsed.
#[derive(Debug, Default, Clone)]
pub struct H1Request {
    pub method: Option<Method>,
    pub target: String,
    pub version: Option<Version>,
    pub headers: Vec<(String, String)>,
}

impl H1Request {
    /// Parses one complete request (request-line, headers, terminating
    /// blank line) from the front of `buf`. On success, returns the parsed
    /// request and the number of bytes consumed, so pipelined requests
    /// already buffered behind this one can be parsed from the remainder.
    ///
    /// `Err(ParseError::Incomplete)` means `buf` does not yet contain a full
    /// request — the caller should keep the bytes and wait for more to
    /// arrive on the next readiness event. Any other error means the
    /// request is malformed and the connection should be closed.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), ParseError> {
        let mut cur = RawRequest::new(buf);

        let method = parse_method(&mut cur)?;
        expect_byte(&mut cur, b' ')?;
        let target = parse_target(&mut cur)?;
        expect_byte(&mut cur, b' ')?;
        let version = parse_version(&mut cur)?;
        expect_crlf(&mut cur)?;
        let headers = parse_headers(&mut cur)?;

        let consumed = buf.len() - cur.as_ref().len();
        Ok((
            Self {
                method: Some(method),
                target: String::from_utf8_lossy(target).into_owned(),
                version: Some(version),
                headers,
            },
            consumed,
        ))
    }

    /// Looks up a header by name, case-insensitively (RFC 9110 Section 5.1).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether this request asked for the connection to be kept alive,
    /// applying HTTP/1.1's "keep-alive by default" vs HTTP/1.0's
    /// "close by default" rule (RFC 9112 Section 9.3).
    pub fn keep_alive(&self) -> bool {
        let explicit = self.header("connection").map(|v| v.eq_ignore_ascii_case("keep-alive"));
        let explicit_close = self.header("connection").map(|v| v.eq_ignore_ascii_case("close"));
        match self.version {
            Some(Version::H1_1) => explicit_close != Some(true),
            _ => explicit == Some(true),
        }
    }
}

fn parse_method(cur: &mut RawRequest<'_>) -> Result<Method, ParseError> {
    match take_token(cur, |b| b == b' ') {
        Token::Found(tok) if tok.iter().all(|&b| b.is_ascii_uppercase()) => {
            Method::parse(tok).ok_or(ParseError::Method)
        }
        Token::Found(_) => Err(ParseError::Method),
        Token::Incomplete => Err(ParseError::Incomplete),
        Token::Empty => Err(ParseError::Method),
    }
}

fn parse_target<'a>(cur: &mut RawRequest<'a>) -> Result<&'a [u8], ParseError> {
    match take_token(cur, |b| b == b' ') {
        Token::Found(tok) if tok.iter().all(|&b| is_request_target_token(b)) => Ok(tok),
        Token::Found(_) => Err(ParseError::Target),
        Token::Incomplete => Err(ParseError::Incomplete),
        Token::Empty => Err(ParseError::Target),
    }
}

fn parse_version(cur: &mut RawRequest<'_>) -> Result<Version, ParseError> {
    for &expected in b"HTTP/" {
        match cur.next() {
            Some(b) if b == expected => continue,
            Some(_) => return Err(ParseError::Version),
            None => return Err(ParseError::Incomplete),
        }
    }
    match take_token(cur, |b| b == b'\r') {
        Token::Found(tok) => Version::parse(tok).ok_or(ParseError::Version),
        Token::Incomplete => Err(ParseError::Incomplete),
        Token::Empty => Err(ParseError::Version),
    }
}

fn expect_byte(cur: &mut RawRequest<'_>, expected: u8) -> Result<(), ParseError> {
    match cur.next() {
        Some(b) if b == expected => Ok(()),
        Some(_) => Err(ParseError::NewLine),
        None => Err(ParseError::Incomplete),
    }
}

fn expect_crlf(cur: &mut RawRequest<'_>) -> Result<(), ParseError> {
    expect_byte(cur, b'\r')?;
    expect_byte(cur, b'\n')
}

fn parse_headers(cur: &mut RawRequest<'_>) -> Result<Vec<(String, String)>, ParseError> {
    let mut headers = Vec::new();

    loop {
        match cur.peek() {
            Some(b'\r') => {
                cur.next();
                expect_byte(cur, b'\n')?;
                return Ok(headers);
            }
            Some(_) => {}
            None => return Err(ParseError::Incomplete),
        }

        let name = match take_token(cur, |b| b == b':') {
            Token::Found(tok) if tok.iter().all(|&b| is_header_name_token(b)) => tok,
            Token::Found(_) => return Err(ParseError::HeaderName),
            Token::Incomplete => return Err(ParseError::Incomplete),
            Token::Empty => return Err(ParseError::HeaderName),
        };

        // Optional whitespace (OWS) between the colon and the value.
        while cur.peek() == Some(b' ') || cur.peek() == Some(b'\t') {
            cur.next();
        }

        let value = match take_token(cur, |b| b == b'\r') {
            Token::Found(tok) if tok.iter().all(|&b| is_header_value_token(b)) => tok,
            Token::Found(_) => return Err(ParseError::HeaderValue),
            // An empty value (colon immediately followed by CRLF) is valid.
            Token::Empty => &[],
            Token::Incomplete => return Err(ParseError::Incomplete),
        };
        expect_byte(cur, b'\n')?;

        let name = String::from_utf8_lossy(name).into_owned();
        let value = String::from_utf8_lossy(trim_ows(value)).into_owned();
        headers.push((name, value));
    }
}

fn trim_ows(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != b' ' && b != b'\t').unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|&b| b != b' ' && b != b'\t').map_or(start, |p| p + 1);
    &bytes[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_simple_get() {
        let (req, consumed) = H1Request::parse(b"GET /hello HTTP/1.1\r\nHost: example.com\r\n\r\n").unwrap();
        assert_eq!(req.method, Some(Method::Get));
        assert_eq!(req.target, "/hello");
        assert_eq!(req.version, Some(Version::H1_1));
        assert_eq!(req.header("host"), Some("example.com"));
        assert_eq!(consumed, 44);
    }

    #[test]
    fn request_without_headers_parses() {
        let (req, _) = H1Request::parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(req.target, "/");
        assert!(req.headers.is_empty());
    }

    #[test]
    fn incomplete_request_is_distinguished_from_malformed() {
        assert_eq!(H1Request::parse(b"GET /hello HTTP/1.1\r\n"), Err(ParseError::Incomplete));
        assert_eq!(H1Request::parse(b"GET"), Err(ParseError::Incomplete));
    }

    #[test]
    fn malformed_method_is_rejected() {
        assert_eq!(H1Request::parse(b"G3T / HTTP/1.1\r\n\r\n"), Err(ParseError::Method));
    }

    #[test]
    fn pipelined_requests_report_consumed_length() {
        let buf = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let (first, consumed) = H1Request::parse(buf).unwrap();
        assert_eq!(first.target, "/a");
        let (second, _) = H1Request::parse(&buf[consumed..]).unwrap();
        assert_eq!(second.target, "/b");
    }

    #[test]
    fn http11_keeps_alive_by_default() {
        let (req, _) = H1Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(req.keep_alive());
    }

    #[test]
    fn http11_closes_when_connection_close_requested() {
        let (req, _) = H1Request::parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(!req.keep_alive());
    }

    #[test]
    fn http10_closes_by_default() {
        let (req, _) = H1Request::parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!req.keep_alive());
    }

    #[test]
    fn http10_keeps_alive_when_requested() {
        let (req, _) = H1Request::parse(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n").unwrap();
        assert!(req.keep_alive());
    }
}
