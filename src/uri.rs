//! Request-target / URI decomposition.
//!
//! This module only handles what the core needs: splitting a request-target
//! (or an absolute-URI) into scheme/authority/path/query and percent-decoding
//! query parameters at parse time. Full percent-decoding *tables* (the
//! reserved/unreserved character classification used by a general-purpose
//! URI library) are an external collaborator per spec — this is a minimal,
//! self-contained decoder, not that table-driven system.

/// A decomposed URI or origin-form request-target.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Uri {
    pub scheme: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: String,
    pub fragment: Option<String>,
    pub query: Vec<(String, String)>,
}

impl Uri {
    /// Parse a request-target: either origin-form (`/path?query`) or an
    /// absolute-URI (`http://host:port/path?query`). The literal `"*"` is
    /// accepted here and left with an empty path; callers reject it
    /// downstream per spec.
    pub fn parse(raw: &str) -> Option<Uri> {
        if raw == "*" {
            return Some(Uri { path: String::new(), ..Uri::default() });
        }
        if raw.is_empty() || !raw.is_ascii() {
            return None;
        }
        if raw.starts_with('/') {
            return Uri::parse_origin_form(raw);
        }
        if let Some(scheme_end) = raw.find("://") {
            let scheme = raw[..scheme_end].to_ascii_lowercase();
            if !is_valid_scheme(&scheme) {
                return None;
            }
            let rest = &raw[scheme_end + 3..];
            let (authority, path_and_rest) = match rest.find('/') {
                Some(idx) => (&rest[..idx], &rest[idx..]),
                None => (rest, "/"),
            };
            let mut uri = Uri::parse_origin_form(path_and_rest)?;
            uri.scheme = Some(scheme);
            parse_authority(authority, &mut uri);
            return Some(uri);
        }
        None
    }

    fn parse_origin_form(raw: &str) -> Option<Uri> {
        if !raw.starts_with('/') {
            return None;
        }
        let (before_fragment, fragment) = match raw.find('#') {
            Some(idx) => (&raw[..idx], Some(decode(&raw[idx + 1..])?)),
            None => (raw, None),
        };
        let (path_raw, query_raw) = match before_fragment.find('?') {
            Some(idx) => (&before_fragment[..idx], Some(&before_fragment[idx + 1..])),
            None => (before_fragment, None),
        };
        let path = decode(path_raw)?;
        let query = match query_raw {
            Some(q) => parse_query(q)?,
            None => Vec::new(),
        };
        Some(Uri {
            scheme: None,
            user: None,
            password: None,
            host: None,
            port: None,
            path,
            fragment,
            query,
        })
    }

    pub fn get_query(&self, name: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Re-encode into a request-target / absolute-URI string.
    pub fn to_request_target(&self) -> String {
        let mut out = String::new();
        if let Some(scheme) = &self.scheme {
            out.push_str(scheme);
            out.push_str("://");
            if let Some(host) = &self.host {
                out.push_str(host);
            }
            if let Some(port) = self.port {
                out.push(':');
                out.push_str(&port.to_string());
            }
        }
        out.push_str(&encode_path(&self.path));
        if !self.query.is_empty() {
            out.push('?');
            let parts: Vec<String> = self
                .query
                .iter()
                .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
                .collect();
            out.push_str(&parts.join("&"));
        }
        if let Some(fragment) = &self.fragment {
            out.push('#');
            out.push_str(&encode_component(fragment));
        }
        out
    }
}

fn is_valid_scheme(scheme: &str) -> bool {
    !scheme.is_empty()
        && scheme.chars().next().unwrap().is_ascii_alphabetic()
        && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
}

fn parse_authority(authority: &str, uri: &mut Uri) {
    let (userinfo, hostport) = match authority.find('@') {
        Some(idx) => (Some(&authority[..idx]), &authority[idx + 1..]),
        None => (None, authority),
    };
    if let Some(ui) = userinfo {
        match ui.find(':') {
            Some(idx) => {
                uri.user = Some(ui[..idx].to_string());
                uri.password = Some(ui[idx + 1..].to_string());
            }
            None => uri.user = Some(ui.to_string()),
        }
    }
    match hostport.rfind(':') {
        Some(idx) if hostport[idx + 1..].chars().all(|c| c.is_ascii_digit()) && idx + 1 < hostport.len() => {
            uri.host = Some(hostport[..idx].to_string());
            uri.port = hostport[idx + 1..].parse().ok();
        }
        _ => uri.host = Some(hostport.to_string()),
    }
}

fn parse_query(raw: &str) -> Option<Vec<(String, String)>> {
    if raw.is_empty() {
        return Some(Vec::new());
    }
    let mut out = Vec::new();
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (k, v) = match pair.find('=') {
            Some(idx) => (&pair[..idx], &pair[idx + 1..]),
            None => (pair, ""),
        };
        out.push((decode_form(k)?, decode_form(v)?));
    }
    Some(out)
}

/// Percent-decode a path/fragment component. `+` is left literal (it is
/// only a space in the query/form encoding).
fn decode(raw: &str) -> Option<String> {
    percent_decode(raw.as_bytes(), false)
}

/// Percent-decode a query-string component, where `+` means space.
fn decode_form(raw: &str) -> Option<String> {
    percent_decode(raw.as_bytes(), true)
}

fn percent_decode(bytes: &[u8], plus_is_space: bool) -> Option<String> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hi = hex_val(*bytes.get(i + 1)?)?;
                let lo = hex_val(*bytes.get(i + 2)?)?;
                out.push((hi << 4) | lo);
                i += 3;
            }
            b'+' if plus_is_space => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}

fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn encode_path(path: &str) -> String {
    path.bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() || b"-_.~/".contains(&b) {
                (b as char).to_string()
            } else {
                format!("%{:02X}", b)
            }
        })
        .collect()
}

fn encode_component(s: &str) -> String {
    s.bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() || b"-_.~".contains(&b) {
                (b as char).to_string()
            } else {
                format!("%{:02X}", b)
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::Uri;

    #[test]
    fn parses_origin_form_with_query() {
        let uri = Uri::parse("/search?q=rust+lang&page=2").unwrap();
        assert_eq!(uri.path, "/search");
        assert_eq!(uri.get_query("q"), Some("rust lang"));
        assert_eq!(uri.get_query("page"), Some("2"));
    }

    #[test]
    fn parses_percent_encoded_path() {
        let uri = Uri::parse("/a%20b/c").unwrap();
        assert_eq!(uri.path, "/a b/c");
    }

    #[test]
    fn parses_absolute_uri() {
        let uri = Uri::parse("http://example.com:8080/x?y=1").unwrap();
        assert_eq!(uri.scheme.as_deref(), Some("http"));
        assert_eq!(uri.host.as_deref(), Some("example.com"));
        assert_eq!(uri.port, Some(8080));
        assert_eq!(uri.path, "/x");
        assert_eq!(uri.get_query("y"), Some("1"));
    }

    #[test]
    fn star_target_is_accepted_but_pathless() {
        let uri = Uri::parse("*").unwrap();
        assert_eq!(uri.path, "");
    }

    #[test]
    fn round_trip_is_idempotent() {
        let uri = Uri::parse("/a/b?x=1&y=two").unwrap();
        let again = Uri::parse(&uri.to_request_target()).unwrap();
        assert_eq!(uri, again);
    }

    #[test]
    fn rejects_missing_leading_slash() {
        assert!(Uri::parse("relative/path").is_none());
    }
}
