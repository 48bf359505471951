use std::fmt::{self, Display};

/// The HTTP version of a parsed or outgoing message.
///
/// HTTP/0.9 is not supported and never will be; most requests that appear
/// to be HTTP/0.9 are malformed HTTP/1.0 requests and are rejected as such.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn parse(major: u8, minor: u8) -> Option<Version> {
        match (major, minor) {
            (1, 0) => Some(Version::Http10),
            (1, 1) => Some(Version::Http11),
            _ => None,
        }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        })
    }
}

#[cfg(test)]
mod test {
    use super::Version;

    #[test]
    fn parse_known_versions() {
        assert_eq!(Version::parse(1, 0), Some(Version::Http10));
        assert_eq!(Version::parse(1, 1), Some(Version::Http11));
    }

    #[test]
    fn rejects_unknown_versions() {
        assert_eq!(Version::parse(2, 0), None);
        assert_eq!(Version::parse(0, 9), None);
    }

    #[test]
    fn display_matches_wire_form() {
        assert_eq!(Version::Http10.to_string(), "HTTP/1.0");
        assert_eq!(Version::Http11.to_string(), "HTTP/1.1");
    }
}
