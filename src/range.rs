//! `Range` header parsing, bytes unit only (RFC 7233). Used by
//! `Connection::send_response_with_file` to serve partial content.

/// One `byte-range-spec`, already resolved against a known resource length
/// where possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `first-byte-pos "-" last-byte-pos`
    FromTo(u64, u64),
    /// `first-byte-pos "-"` (to end of resource)
    From(u64),
    /// `"-" suffix-length` (last N bytes)
    Suffix(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranges {
    pub ranges: Vec<ByteRange>,
}

impl Ranges {
    /// Parse a `Range: bytes=...` header value. Returns `None` if the unit
    /// is not `bytes` or the syntax is invalid (per RFC 7233, an invalid
    /// Range header is ignored, not rejected).
    pub fn parse(raw: &str) -> Option<Ranges> {
        let raw = raw.trim();
        let rest = raw.strip_prefix("bytes=")?;
        let mut ranges = Vec::new();
        for spec in rest.split(',') {
            let spec = spec.trim();
            if spec.is_empty() {
                return None;
            }
            let mut parts = spec.splitn(2, '-');
            let first = parts.next()?;
            let last = parts.next()?;
            if first.is_empty() {
                let suffix: u64 = last.parse().ok()?;
                ranges.push(ByteRange::Suffix(suffix));
            } else if last.is_empty() {
                let start: u64 = first.parse().ok()?;
                ranges.push(ByteRange::From(start));
            } else {
                let start: u64 = first.parse().ok()?;
                let end: u64 = last.parse().ok()?;
                if end < start {
                    return None;
                }
                ranges.push(ByteRange::FromTo(start, end));
            }
        }
        if ranges.is_empty() {
            None
        } else {
            Some(Ranges { ranges })
        }
    }

    /// Resolve each spec against a concrete resource length, clamping
    /// `FromTo`/`From` to `total - 1` and dropping any spec that is wholly
    /// unsatisfiable. Returns `(start, end_inclusive)` pairs.
    pub fn resolve(&self, total: u64) -> Vec<(u64, u64)> {
        self.ranges
            .iter()
            .filter_map(|r| match *r {
                ByteRange::FromTo(start, end) if start < total => {
                    Some((start, end.min(total - 1)))
                }
                ByteRange::From(start) if start < total => Some((start, total - 1)),
                ByteRange::Suffix(len) if len > 0 && total > 0 => {
                    let len = len.min(total);
                    Some((total - len, total - 1))
                }
                _ => None,
            })
            .collect()
    }
}
