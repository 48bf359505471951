//! Minimal `Content-Type` parsing: a base media type plus its parameter
//! map. Full MIME media-type parsing (charset aliasing, RFC 2231 extended
//! parameters, and the like) is an external collaborator per spec; this is
//! only what the parser and the content-decoder registry need.

/// A parsed `Content-Type` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// The base media type, lowercased (e.g. `application/x-www-form-urlencoded`).
    pub media_type: String,
    pub parameters: Vec<(String, String)>,
}

impl ContentType {
    pub fn parse(raw: &str) -> Option<ContentType> {
        let mut parts = raw.split(';');
        let media_type = parts.next()?.trim().to_ascii_lowercase();
        if media_type.is_empty() || !media_type.contains('/') {
            return None;
        }
        let mut parameters = Vec::new();
        for part in parts {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Some(idx) = part.find('=') {
                let name = part[..idx].trim().to_ascii_lowercase();
                let value = part[idx + 1..].trim().trim_matches('"').to_string();
                parameters.push((name, value));
            }
        }
        Some(ContentType { media_type, parameters })
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::ContentType;

    #[test]
    fn parses_bare_media_type() {
        let ct = ContentType::parse("text/html").unwrap();
        assert_eq!(ct.media_type, "text/html");
        assert!(ct.parameters.is_empty());
    }

    #[test]
    fn parses_parameters() {
        let ct = ContentType::parse("text/html; charset=UTF-8").unwrap();
        assert_eq!(ct.media_type, "text/html");
        assert_eq!(ct.parameter("charset"), Some("UTF-8"));
    }

    #[test]
    fn is_case_insensitive_on_media_type() {
        let ct = ContentType::parse("Application/JSON").unwrap();
        assert_eq!(ct.media_type, "application/json");
    }

    #[test]
    fn rejects_type_without_slash() {
        assert!(ContentType::parse("garbage").is_none());
    }
}
