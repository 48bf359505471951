//! Typed errors for every failure surface the core exposes.
//!
//! There is no process-global "last error": every fallible operation
//! returns a `Result` carrying one of the enums below.

use std::io;
use std::num::ParseIntError;
use std::str::Utf8Error;

quick_error! {
    /// Failures while parsing a request or response off the wire.
    ///
    /// Each variant maps to exactly one HTTP status code via
    /// [`ProtocolError::status`]. Don't match exhaustively on this enum in
    /// embedder code; more variants may be added.
    #[derive(Debug)]
    pub enum ProtocolError {
        BadStartLine {
            description("malformed request-line or status-line")
        }
        UnsupportedVersion {
            description("unsupported HTTP version")
        }
        IllegalCharacter(byte: u8) {
            description("illegal character in method or request-target")
            display(me) -> ("{}: byte {:#04x}", me, byte)
        }
        UriTooLong {
            description("request-target exceeds max_request_uri_length")
        }
        HeaderNameTooLong {
            description("header field-name exceeds max_header_name_length")
        }
        HeaderValueTooLong {
            description("header field-value exceeds max_header_value_length")
        }
        HeaderFolded {
            description("obsolete header line folding is not accepted")
        }
        HeaderSyntax(e: httparse::Error) {
            from()
            description("malformed header block")
            display(me) -> ("{}: {:?}", me, e)
        }
        MissingHost {
            description("HTTP/1.1 request without a Host header")
        }
        ConflictingBodyLength {
            description("both Content-Length and Transfer-Encoding present")
        }
        BadContentLength(e: ParseIntError) {
            from()
            description("invalid Content-Length value")
            display(me) -> ("{}: {}", me, e)
        }
        UnsupportedTransferEncoding {
            description("unsupported Transfer-Encoding token")
        }
        ContentTooLarge {
            description("body exceeds max_content_length")
        }
        ChunkTooLarge {
            description("chunk exceeds max_chunk_length")
        }
        BadChunkSize {
            description("malformed chunk-size line")
        }
        BadUtf8(e: Utf8Error) {
            from()
            description("invalid utf-8 in a header that must be text")
            display(me) -> ("{}: {}", me, e)
        }
        UnsupportedRequestTarget {
            description("the '*' request-target is not supported")
        }
        PrematureEof {
            description("connection closed mid-message")
        }
    }
}

impl ProtocolError {
    /// Status code this error is mapped to, per spec.
    pub fn status(&self) -> u16 {
        use ProtocolError::*;
        match *self {
            BadStartLine | IllegalCharacter(_) | HeaderSyntax(_)
            | HeaderFolded | MissingHost | ConflictingBodyLength
            | BadContentLength(_) | BadUtf8(_) | UnsupportedRequestTarget
            | PrematureEof | BadChunkSize => 400,
            UnsupportedVersion => 505,
            UriTooLong => 414,
            HeaderNameTooLong | HeaderValueTooLong => 431,
            ContentTooLarge | ChunkTooLarge => 413,
            UnsupportedTransferEncoding => 501,
        }
    }

    pub fn reason(&self) -> &'static str {
        crate::status::reason_phrase(self.status())
    }
}

quick_error! {
    /// Failures in the surrounding resources (sockets, allocation, reactor
    /// registration). The connection is closed; `error_hook` sees the detail.
    #[derive(Debug)]
    pub enum ResourceError {
        Io(e: io::Error) {
            from()
            description("i/o error")
            display(me) -> ("{}: {}", me, e)
        }
        ReactorRegistration(detail: String) {
            description("failed to register fd/timer with the reactor")
            display(me) -> ("{}: {}", me, detail)
        }
        AllocationFailed {
            description("buffer growth exceeded available memory")
        }
    }
}

quick_error! {
    /// Failures surfaced synchronously from `listen()` / `add_route()`.
    /// The library never starts on a `ConfigurationError`.
    #[derive(Debug)]
    pub enum ConfigurationError {
        InvalidPattern(pattern: String, reason: &'static str) {
            description("invalid route pattern")
            display(me) -> ("{}: {:?}: {}", me, pattern, reason)
        }
        DuplicateRoute(method: String, pattern: String) {
            description("route already registered")
            display(me) -> ("{}: {} {}", me, method, pattern)
        }
        MissingTlsMaterial {
            description("use_tls is set but tls_certificate/tls_key is missing")
        }
        InvalidHost(detail: String) {
            description("host/port could not be resolved")
            display(me) -> ("{}: {}", me, detail)
        }
        RoutesFrozen {
            description("routes may only be added before the server starts listening")
        }
    }
}

/// Unchecked handler-side misbehavior.
///
/// Not propagated as a `Result`: if a handler returns without writing a
/// response, the connection eventually times out and emits 408. A
/// `Connection` may instead synthesize 500 on handler return if the write
/// stream is still empty (`Connection::finish_handler`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerError {
    /// Handler returned without writing any response and without
    /// registering to write one later.
    NoResponseWritten,
}

/// Shared trait for error kinds that render to a status code + reason.
pub trait HttpError {
    fn http_status(&self) -> (u16, &'static str);
}

impl HttpError for ProtocolError {
    fn http_status(&self) -> (u16, &'static str) {
        (self.status(), self.reason())
    }
}
