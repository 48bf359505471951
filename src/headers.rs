//! Header storage: insertion-ordered, duplicate-tolerant, case-insensitive
//! lookup by name. The wire form of each name is preserved for
//! re-serialization; only comparisons are case-insensitive.

/// A single (name, value) header pair as it appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: Vec<u8>,
}

impl Header {
    pub fn new<N: Into<String>, V: Into<Vec<u8>>>(name: N, value: V) -> Header {
        Header { name: name.into(), value: value.into() }
    }
}

/// An ordered collection of headers that permits duplicate names and
/// compares names case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<Header>,
}

impl Headers {
    pub fn new() -> Headers {
        Headers { entries: Vec::new() }
    }

    pub fn push<N: Into<String>, V: Into<Vec<u8>>>(&mut self, name: N, value: V) {
        self.entries.push(Header::new(name, value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }

    /// Value of the first header matching `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_slice())
    }

    /// All values for headers matching `name` (case-insensitive), in
    /// wire order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a [u8]> {
        self.entries
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|h| h.name.eq_ignore_ascii_case(name))
    }

    /// True if `name`'s value contains `token` as a comma-separated,
    /// case-insensitive token (used for `Connection` and
    /// `Transfer-Encoding` token lists).
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name).any(|v| {
            std::str::from_utf8(v)
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(|t| t.trim())
                        .any(|t| t.eq_ignore_ascii_case(token))
                })
                .unwrap_or(false)
        })
    }
}

#[inline]
pub fn is_transfer_encoding(name: &str) -> bool {
    name.eq_ignore_ascii_case("transfer-encoding")
}

#[inline]
pub fn is_content_length(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length")
}

#[inline]
pub fn is_connection(name: &str) -> bool {
    name.eq_ignore_ascii_case("connection")
}
