//! Pluggable content decoders keyed by base media type.
//!
//! A decoder turns a raw, already-buffered body into a typed value. The
//! default decoder for `application/x-www-form-urlencoded` is registered
//! unconditionally, per spec.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A decoded body, downcast-able to whatever type the matching decoder
/// produced. `application/x-www-form-urlencoded` always decodes to
/// `Vec<(String, String)>`.
pub type DecodedContent = Box<dyn Any + Send + Sync>;

/// Implemented by pluggable content decoders.
pub trait ContentDecoder: Send + Sync {
    /// Decode a full body. Returning `None` means "could not decode this
    /// body as this media type"; the `decoded_content` field is then left
    /// empty rather than the message failing outright.
    fn decode(&self, body: &[u8]) -> Option<DecodedContent>;
}

impl<F> ContentDecoder for F
where
    F: Fn(&[u8]) -> Option<DecodedContent> + Send + Sync,
{
    fn decode(&self, body: &[u8]) -> Option<DecodedContent> {
        self(body)
    }
}

/// Registry of `media-type -> decoder`, keyed on the lowercased base media
/// type (parameters like `charset` are ignored for lookup).
#[derive(Clone)]
pub struct DecoderRegistry {
    decoders: HashMap<String, Arc<dyn ContentDecoder>>,
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DecoderRegistry")
            .field("media_types", &self.decoders.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for DecoderRegistry {
    fn default() -> DecoderRegistry {
        let mut registry = DecoderRegistry { decoders: HashMap::new() };
        registry.register("application/x-www-form-urlencoded", Arc::new(UrlEncodedDecoder));
        registry
    }
}

impl DecoderRegistry {
    pub fn new() -> DecoderRegistry {
        DecoderRegistry { decoders: HashMap::new() }
    }

    pub fn register(&mut self, media_type: &str, decoder: Arc<dyn ContentDecoder>) {
        self.decoders.insert(media_type.to_ascii_lowercase(), decoder);
    }

    pub fn decode(&self, media_type: &str, body: &[u8]) -> Option<DecodedContent> {
        self.decoders.get(&media_type.to_ascii_lowercase())?.decode(body)
    }
}

struct UrlEncodedDecoder;

impl ContentDecoder for UrlEncodedDecoder {
    fn decode(&self, body: &[u8]) -> Option<DecodedContent> {
        let raw = std::str::from_utf8(body).ok()?;
        let mut pairs = Vec::new();
        for part in raw.split('&') {
            if part.is_empty() {
                continue;
            }
            let (k, v) = match part.find('=') {
                Some(idx) => (&part[..idx], &part[idx + 1..]),
                None => (part, ""),
            };
            pairs.push((form_decode(k)?, form_decode(v)?));
        }
        Some(Box::new(pairs) as DecodedContent)
    }
}

fn form_decode(raw: &str) -> Option<String> {
    let mut out = Vec::with_capacity(raw.len());
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hi = (bytes[i + 1] as char).to_digit(16)?;
                let lo = (bytes[i + 2] as char).to_digit(16)?;
                out.push(((hi << 4) | lo) as u8);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}
