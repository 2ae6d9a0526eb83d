//! Byte-class predicates used while parsing an HTTP/1.1 request.

/// Whether `b` may appear in a request-target (RFC 9112 Section 3.2): any
/// visible ASCII character except the space that terminates the target.
#[inline]
pub fn is_request_target_token(b: u8) -> bool {
    b.is_ascii_graphic()
}

/// `tchar` (RFC 9110 Section 5.6.2): the characters allowed in a header
/// field name.
#[inline]
pub fn is_header_name_token(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}

/// `field-vchar` plus the space/tab allowed as interior whitespace (RFC
/// 9110 Section 5.5): anything visible, plus space and horizontal tab.
#[inline]
pub fn is_header_value_token(b: u8) -> bool {
    b == b' ' || b == b'\t' || b.is_ascii_graphic()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_name_tokens_exclude_colon_and_whitespace() {
        assert!(is_header_name_token(b'X'));
        assert!(is_header_name_token(b'-'));
        assert!(!is_header_name_token(b':'));
        assert!(!is_header_name_token(b' '));
    }

    #[test]
    fn request_target_tokens_exclude_space() {
        assert!(is_request_target_token(b'/'));
        assert!(!is_request_target_token(b' '));
        assert!(!is_request_target_token(b'\r'));
    }
}
