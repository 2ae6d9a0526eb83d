//! HTTP/1.1 response formatting (RFC 9112 Section 4).

use std::io::{self, Write};

use crate::status::Status;
use crate::version::Version;

/// A response ready to be written to a connection. Built up with the
/// `with_*` methods, then rendered with [`Response::write_to`].
#[derive(Debug, Clone)]
pub struct Response {
    version: Version,
    status: Status,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    pub fn new(version: Version, status: Status) -> Self {
        Self { version, status, headers: Vec::new(), body: Vec::new() }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Renders the status line, headers, a `Content-Length` computed from
    /// the body, the blank line, and the body, in that order.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write!(w, "{} {} {}\r\n", self.version, self.status, self.status.reason_phrase())?;
        for (name, value) in &self.headers {
            write!(w, "{name}: {value}\r\n")?;
        }
        write!(w, "content-length: {}\r\n", self.body.len())?;
        write!(w, "\r\n")?;
        w.write_all(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_status_line_headers_and_body() {
        let resp = Response::new(Version::H1_1, Status::Ok)
            .with_header("content-type", "text/plain")
            .with_body(*b"hi");

        let mut out = Vec::new();
        resp.write_to(&mut out).unwrap();

        let rendered = String::from_utf8(out).unwrap();
        assert!(rendered.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(rendered.contains("content-type: text/plain\r\n"));
        assert!(rendered.contains("content-length: 2\r\n"));
        assert!(rendered.ends_with("\r\n\r\nhi"));
    }

    #[test]
    fn empty_body_still_sets_content_length_zero() {
        let resp = Response::new(Version::H1_1, Status::NoContent);
        let mut out = Vec::new();
        resp.write_to(&mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("content-length: 0\r\n"));
    }
}
