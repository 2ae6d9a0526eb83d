//! Representation of the requested HTTP version.

use std::fmt::Display;

/// The request/response HTTP version. Only the 1.x family is ever produced
/// by this server's own responses; `H2`/`H3` are recognized on parse so a
/// client that speaks them gets a clean `505` rather than a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// HTTP/1.0
    H1_0,
    /// HTTP/1.1
    H1_1,
    /// HTTP/2
    H2,
    /// HTTP/3
    H3,
}

impl Version {
    /// Parses the three bytes following the `HTTP/` prefix consumed by the
    /// caller (e.g. `b"1.1"`).
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        Some(match bytes {
            b"1.0" => Self::H1_0,
            b"1.1" => Self::H1_1,
            b"2" | b"2.0" => Self::H2,
            b"3" | b"3.0" => Self::H3,
            _ => return None,
        })
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::H1_0 => "HTTP/1.0",
            Self::H1_1 => "HTTP/1.1",
            Self::H2 => "HTTP/2",
            Self::H3 => "HTTP/3",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_versions() {
        assert_eq!(Version::parse(b"1.1"), Some(Version::H1_1));
        assert_eq!(Version::parse(b"1.0"), Some(Version::H1_0));
    }
}
