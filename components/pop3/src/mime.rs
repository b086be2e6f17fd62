//! MIME header scanning (§1, §4.6 RETR handling): a field-name
//! comparator and a `Content-Type` value parser. The concrete MIME
//! type-tree the stripmime-style filter program would use internally is
//! out of scope (§1); the proxy only needs enough to decide *whether*
//! to divert a body into the ET pipeline.

/// Case-insensitive RFC 822 header field-name comparison (field names
/// are tokens and therefore ASCII; POP3/MIME headers never carry a
/// folded/`Mime-Version`-style unicode name in practice).
pub fn field_name_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// The `type/subtype` pulled out of a `Content-Type:` header value,
/// ignoring any `; parameter=value` suffix.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ContentType {
    pub type_: String,
    pub subtype: String,
}

impl ContentType {
    /// Parses a header *value* (everything after `Content-Type:`, already
    /// trimmed of the leading colon-space). Returns `None` for a value
    /// that isn't a `type/subtype` pair.
    pub fn parse(value: &str) -> Option<ContentType> {
        let main = value.split(';').next()?.trim();
        let mut parts = main.splitn(2, '/');
        let type_ = parts.next()?.trim();
        let subtype = parts.next()?.trim();
        if type_.is_empty() || subtype.is_empty() {
            return None;
        }
        Some(ContentType {
            type_: type_.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
        })
    }
}

/// Scans the header block of a (dot-unstuffed) RETR/TOP body for a
/// `Content-Type` header and returns its parsed value, if present.
/// Headers end at the first blank line, per RFC 822/2045.
pub fn find_content_type(body: &[u8]) -> Option<ContentType> {
    let text = String::from_utf8_lossy(body);
    for line in text.split("\r\n") {
        if line.is_empty() {
            // Blank line: end of headers.
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if field_name_eq(name.trim(), "Content-Type") {
                return ContentType::parse(value);
            }
        }
    }
    None
}
