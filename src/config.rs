//! Configuration options the core recognizes (spec §6), plus per-route
//! overrides.

use std::sync::Arc;

use crate::decoder::{ContentDecoder, DecoderRegistry};
use crate::headers::Headers;

/// Whether a message body is buffered whole in memory, delivered
/// incrementally, or buffered based on its advertised size.
///
/// `Stream` is accepted as a configuration value (so existing config
/// structures round-trip) but is not implemented by the parser: spec §4.2
/// calls progressive delivery out of scope for this core, so `Stream`
/// behaves exactly like `Buffer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bufferization {
    Auto,
    Buffer,
    Stream,
}

impl Default for Bufferization {
    fn default() -> Bufferization {
        Bufferization::Auto
    }
}

/// Parser limits, shared by server and client configuration.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_request_uri_length: usize,
    pub max_header_name_length: usize,
    pub max_header_value_length: usize,
    pub max_content_length: u64,
    pub max_chunk_length: u64,
}

impl Default for Limits {
    fn default() -> Limits {
        Limits {
            max_request_uri_length: 2048,
            max_header_name_length: 128,
            max_header_value_length: 4096,
            max_content_length: 16 * 1024 * 1024,
            max_chunk_length: 1024 * 1024,
        }
    }
}

/// Server-wide configuration.
#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub connection_backlog: i32,
    pub use_tls: bool,
    pub tls_certificate: Option<String>,
    pub tls_key: Option<String>,
    pub tls_ciphers: Option<String>,
    pub limits: Limits,
    pub bufferization: Bufferization,
    pub connection_timeout_ms: u64,
    pub content_decoders: DecoderRegistry,
    pub default_headers: Headers,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            connection_backlog: 128,
            use_tls: false,
            tls_certificate: None,
            tls_key: None,
            tls_ciphers: None,
            limits: Limits::default(),
            bufferization: Bufferization::default(),
            connection_timeout_ms: 10_000,
            content_decoders: DecoderRegistry::default(),
            default_headers: Headers::new(),
        }
    }
}

impl ServerConfig {
    pub fn register_decoder(&mut self, media_type: &str, decoder: Arc<dyn ContentDecoder>) {
        self.content_decoders.register(media_type, decoder);
    }
}

/// Client-wide configuration. Shares the same wire-protocol limits as the
/// server; TLS and decoders are equally meaningful on outbound connections.
#[derive(Clone)]
pub struct ClientConfig {
    pub use_tls: bool,
    pub tls_ciphers: Option<String>,
    pub limits: Limits,
    pub bufferization: Bufferization,
    pub connection_timeout_ms: u64,
    pub content_decoders: DecoderRegistry,
    pub default_headers: Headers,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            use_tls: false,
            tls_ciphers: None,
            limits: Limits::default(),
            bufferization: Bufferization::default(),
            connection_timeout_ms: 10_000,
            content_decoders: DecoderRegistry::default(),
            default_headers: Headers::new(),
        }
    }
}

/// Per-route overrides (spec §6: "Route options override `bufferization`,
/// `max_content_length`, and per-route default headers").
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    pub bufferization: Option<Bufferization>,
    pub max_content_length: Option<u64>,
    pub default_headers: Headers,
}

impl RouteOptions {
    pub fn new() -> RouteOptions {
        RouteOptions::default()
    }

    pub fn effective_bufferization(&self, server_default: Bufferization) -> Bufferization {
        self.bufferization.unwrap_or(server_default)
    }

    pub fn effective_max_content_length(&self, server_default: u64) -> u64 {
        self.max_content_length.unwrap_or(server_default)
    }
}
