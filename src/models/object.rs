//! Object naming and metadata as seen by the gateway.

use percent_encoding::percent_decode_str;
use std::fmt;

/// Name of an object inside a container, derived from a request path.
///
/// Swift has a flat namespace, so any `/` left after stripping the leading
/// separator is part of the name (`photos/2025/img.jpg`). Segments that are
/// exactly `.` or `..` are refused: URL path normalisation would collapse
/// them and the store would be asked for a different object. Other names
/// pass through unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectName(String);

impl ObjectName {
    /// Derive an object name from a request path.
    ///
    /// Strips at most one leading `/`, percent-decodes the rest and trims
    /// surrounding whitespace. Returns `None` for an empty name, a bare `/`,
    /// escapes that do not decode to UTF-8, or a `.`/`..` segment.
    pub fn from_request_path(path: &str) -> Option<Self> {
        let stripped = path.strip_prefix('/').unwrap_or(path);
        let decoded = percent_decode_str(stripped).decode_utf8().ok()?;
        let name = decoded.trim();

        if name.is_empty() || name == "/" || has_dot_segment(name) {
            return None;
        }
        Some(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for a `Content-Disposition: attachment` header.
    ///
    /// The filename is quoted; `"` and `\` are backslash-escaped and control
    /// characters are written as escape sequences so the header stays valid.
    pub fn attachment_disposition(&self) -> String {
        let mut quoted = String::with_capacity(self.0.len() + 2);
        for c in self.0.chars() {
            match c {
                '"' => quoted.push_str("\\\""),
                '\\' => quoted.push_str("\\\\"),
                '\t' => quoted.push_str("\\t"),
                '\n' => quoted.push_str("\\n"),
                '\r' => quoted.push_str("\\r"),
                c if c.is_control() => quoted.push_str(&format!("\\u{{{:04x}}}", c as u32)),
                c => quoted.push(c),
            }
        }
        format!("attachment; filename=\"{}\"", quoted)
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Whether any `/`-separated segment is `.` or `..`.
pub fn has_dot_segment(name: &str) -> bool {
    name.split('/').any(|segment| segment == "." || segment == "..")
}

/// Headers reported by the store when an object is opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Size in bytes, when the store sent a `Content-Length`.
    pub content_length: Option<u64>,

    /// MD5 of the object body as reported by the store.
    pub etag: Option<String>,
}
