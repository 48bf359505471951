//! The incremental HTTP/1.x parser (spec §4.2).
//!
//! Bodies are always buffered whole: progressive/`STREAM` delivery is out
//! of scope for this core (`Bufferization::Stream` behaves like `Buffer`),
//! so the state machine never needs to hand partial bodies to a caller.
//! `httparse` still does the header-block tokenization once the blank line
//! that terminates it has been located; everything else (start line,
//! chunk framing, limit enforcement) is hand-rolled against the shared
//! [`ByteBuffer`]-backed slice the caller passes in.

use std::collections::HashMap;

use crate::config::Limits;
use crate::content_type::ContentType;
use crate::error::ProtocolError;
use crate::headers::Headers;
use crate::parsed::{Common, ConnectionOptions, Message, Request, Response};
use crate::range::Ranges;
use crate::uri::Uri;
use crate::version::Version;

const MAX_HEADERS: usize = 64;

/// Which grammar a [`Parser`] is scanning for: request-line or status-line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Request,
    Response,
}

#[derive(Debug)]
enum BodyProgress {
    /// No body; ready to finalize immediately.
    None,
    Fixed(u64),
    ChunkSize,
    ChunkData(u64),
    ChunkCrlf,
    ChunkTrailer,
    /// Response framed by connection close; `eof` must be signalled by
    /// the caller once the peer has actually closed.
    Eof,
}

#[derive(Debug)]
enum State {
    StartLine,
    Headers,
    Body { message: Message, progress: BodyProgress, body: Vec<u8> },
}

/// Outcome of a single [`Parser::parse`] call.
pub enum Outcome {
    /// No complete message yet; call again once more bytes have arrived
    /// (or, for EOF-framed responses, once `eof` is true).
    NeedMore,
    /// Headers finished parsing on a request carrying `Expect:
    /// 100-continue`. The caller may send `100 Continue` now; parsing
    /// continues into the body on the next call regardless. Emitted at
    /// most once per message.
    Expect100Continue,
    /// A full message was parsed. `consumed` bytes of `buf`, counted from
    /// its start, belong to this message and should be advanced out of
    /// the caller's read buffer.
    Complete { message: Message, consumed: usize },
    /// The message is malformed or exceeds a limit. The parser does not
    /// recover; the caller should respond with the mapped status and
    /// close or half-close the connection.
    Failed(ProtocolError),
}

/// A single in-progress request or response, scanning a byte slice that
/// only ever grows between calls (the caller advances its buffer only on
/// [`Outcome::Complete`]).
pub struct Parser {
    kind: Kind,
    limits: Limits,
    state: State,
    pos: usize,
    /// Holds the message built from the start line until header parsing
    /// completes and it can be moved into `State::Body`.
    pending: Option<Message>,
    continue_signalled: bool,
}

impl Parser {
    pub fn new(kind: Kind, limits: Limits) -> Parser {
        Parser { kind, limits, state: State::StartLine, pos: 0, pending: None, continue_signalled: false }
    }

    /// Reset to scan the next message on the same connection (pipelining).
    pub fn reset(&mut self) {
        self.state = State::StartLine;
        self.pos = 0;
        self.pending = None;
        self.continue_signalled = false;
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Has a message already been partially parsed? Used by the connection
    /// to decide whether an unexpected EOF is a clean close or a failure.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::StartLine) && self.pos == 0
    }

    /// Advance the state machine against `buf`. `eof` signals that the
    /// peer has closed its write side and no more bytes will ever arrive;
    /// it only matters for EOF-framed response bodies.
    pub fn parse(&mut self, buf: &[u8], eof: bool) -> Outcome {
        loop {
            match self.step(buf, eof) {
                Step::Again => continue,
                Step::Outcome(outcome) => return outcome,
            }
        }
    }

    fn step(&mut self, buf: &[u8], eof: bool) -> Step {
        match self.state {
            State::StartLine => self.step_start_line(buf),
            State::Headers => self.step_headers(buf),
            State::Body { .. } => self.step_body(buf, eof),
        }
    }

    fn fail(&mut self, err: ProtocolError) -> Step {
        self.state = State::StartLine;
        self.pending = None;
        Step::Outcome(Outcome::Failed(err))
    }

    fn step_start_line(&mut self, buf: &[u8]) -> Step {
        let rest = &buf[self.pos..];
        let line_end = match find(rest, b"\r\n") {
            Some(idx) => idx,
            None => {
                let cap = self.limits.max_request_uri_length + 64;
                if rest.len() > cap {
                    return self.fail(ProtocolError::BadStartLine);
                }
                return Step::Outcome(Outcome::NeedMore);
            }
        };
        let line = &rest[..line_end];
        if let Some(&byte) = line.iter().find(|&&b| b < 0x20 && b != b'\t') {
            return self.fail(ProtocolError::IllegalCharacter(byte));
        }
        let parsed = match self.kind {
            Kind::Request => parse_request_line(line, self.limits.max_request_uri_length),
            Kind::Response => parse_status_line(line),
        };
        let message = match parsed {
            Ok(m) => m,
            Err(e) => return self.fail(e),
        };
        self.pos += line_end + 2;
        self.state = State::Headers;
        self.pending = Some(message);
        Step::Again
    }

    fn step_headers(&mut self, buf: &[u8]) -> Step {
        let rest = &buf[self.pos..];
        let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        match httparse::parse_headers(rest, &mut raw_headers) {
            Ok(httparse::Status::Complete((used, parsed))) => {
                let mut headers = Headers::new();
                for h in parsed {
                    if h.name.len() > self.limits.max_header_name_length {
                        return self.fail(ProtocolError::HeaderNameTooLong);
                    }
                    if h.value.len() > self.limits.max_header_value_length {
                        return self.fail(ProtocolError::HeaderValueTooLong);
                    }
                    headers.push(h.name.to_string(), h.value.to_vec());
                }
                self.pos += used;
                let mut message = self.pending.take().expect("pending start line before headers");
                let progress = match finish_headers(&mut message, headers, &self.limits, self.kind) {
                    Ok(p) => p,
                    Err(e) => return self.fail(e),
                };
                let wants_continue = message
                    .as_request()
                    .map(|r| r.expects_100_continue)
                    .unwrap_or(false)
                    && !matches!(progress, BodyProgress::None);
                self.state = State::Body { message, progress, body: Vec::new() };
                if wants_continue && !self.continue_signalled {
                    self.continue_signalled = true;
                    return Step::Outcome(Outcome::Expect100Continue);
                }
                Step::Again
            }
            Ok(httparse::Status::Partial) => {
                let cap = MAX_HEADERS
                    * (self.limits.max_header_name_length + self.limits.max_header_value_length + 4);
                if rest.len() > cap {
                    return self.fail(ProtocolError::HeaderValueTooLong);
                }
                Step::Outcome(Outcome::NeedMore)
            }
            Err(e) => self.fail(ProtocolError::HeaderSyntax(e)),
        }
    }

    fn step_body(&mut self, buf: &[u8], eof: bool) -> Step {
        let State::Body { ref mut progress, ref mut body, .. } = self.state else {
            unreachable!()
        };
        match progress {
            BodyProgress::None => self.finalize(),
            BodyProgress::Fixed(remaining) => {
                let available = buf.len() - self.pos;
                let take = (*remaining).min(available as u64) as usize;
                body.extend_from_slice(&buf[self.pos..self.pos + take]);
                self.pos += take;
                *remaining -= take as u64;
                if *remaining == 0 {
                    self.finalize()
                } else {
                    Step::Outcome(Outcome::NeedMore)
                }
            }
            BodyProgress::ChunkSize => self.step_chunk_size(buf),
            BodyProgress::ChunkData(remaining) => {
                let available = buf.len() - self.pos;
                let take = (*remaining).min(available as u64) as usize;
                body.extend_from_slice(&buf[self.pos..self.pos + take]);
                self.pos += take;
                *remaining -= take as u64;
                if *remaining == 0 {
                    *progress = BodyProgress::ChunkCrlf;
                    Step::Again
                } else {
                    Step::Outcome(Outcome::NeedMore)
                }
            }
            BodyProgress::ChunkCrlf => {
                let rest = &buf[self.pos..];
                if rest.len() < 2 {
                    return Step::Outcome(Outcome::NeedMore);
                }
                if &rest[..2] != b"\r\n" {
                    return self.fail(ProtocolError::BadChunkSize);
                }
                self.pos += 2;
                *progress = BodyProgress::ChunkSize;
                Step::Again
            }
            BodyProgress::ChunkTrailer => self.step_chunk_trailer(buf),
            BodyProgress::Eof => {
                body.extend_from_slice(&buf[self.pos..]);
                self.pos = buf.len();
                if eof {
                    self.finalize()
                } else {
                    Step::Outcome(Outcome::NeedMore)
                }
            }
        }
    }

    fn step_chunk_size(&mut self, buf: &[u8]) -> Step {
        let rest = &buf[self.pos..];
        let line_end = match find(rest, b"\r\n") {
            Some(idx) => idx,
            None => {
                if rest.len() > 256 {
                    return self.fail(ProtocolError::BadChunkSize);
                }
                return Step::Outcome(Outcome::NeedMore);
            }
        };
        let line = &rest[..line_end];
        let size_part = match line.iter().position(|&b| b == b';') {
            Some(idx) => &line[..idx],
            None => line,
        };
        let size_str = match std::str::from_utf8(size_part) {
            Ok(s) => s.trim(),
            Err(e) => return self.fail(ProtocolError::BadUtf8(e)),
        };
        let size = match u64::from_str_radix(size_str, 16) {
            Ok(n) => n,
            Err(_) => return self.fail(ProtocolError::BadChunkSize),
        };
        if size > self.limits.max_chunk_length {
            return self.fail(ProtocolError::ChunkTooLarge);
        }
        self.pos += line_end + 2;
        let State::Body { ref mut progress, .. } = self.state else { unreachable!() };
        *progress = if size == 0 { BodyProgress::ChunkTrailer } else { BodyProgress::ChunkData(size) };
        Step::Again
    }

    fn step_chunk_trailer(&mut self, buf: &[u8]) -> Step {
        let rest = &buf[self.pos..];
        let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        match httparse::parse_headers(rest, &mut raw_headers) {
            Ok(httparse::Status::Complete((used, parsed))) => {
                let State::Body { ref mut message, .. } = self.state else { unreachable!() };
                let mut headers = message.common().headers.clone();
                for h in parsed {
                    headers.push(h.name.to_string(), h.value.to_vec());
                }
                message.common_mut().headers = headers;
                self.pos += used;
                self.finalize()
            }
            Ok(httparse::Status::Partial) => {
                if rest.len() > 4096 {
                    return self.fail(ProtocolError::HeaderValueTooLong);
                }
                Step::Outcome(Outcome::NeedMore)
            }
            Err(e) => self.fail(ProtocolError::HeaderSyntax(e)),
        }
    }

    fn finalize(&mut self) -> Step {
        let consumed = self.pos;
        let (mut message, body) = match std::mem::replace(&mut self.state, State::StartLine) {
            State::Body { message, body, .. } => (message, body),
            _ => unreachable!("finalize called outside Body state"),
        };
        self.pos = 0;
        self.continue_signalled = false;
        let common = message.common_mut();
        common.is_complete = true;
        if !body.is_empty() || common.content_length.is_some() || common.is_body_chunked {
            common.body = Some(body);
        }
        Step::Outcome(Outcome::Complete { message, consumed })
    }
}

enum Step {
    Again,
    Outcome(Outcome),
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    memchr::memmem::find(haystack, needle)
}

fn parse_version(raw: &[u8]) -> Option<Version> {
    let raw = std::str::from_utf8(raw).ok()?;
    let digits = raw.strip_prefix("HTTP/")?;
    let mut parts = digits.splitn(2, '.');
    let major: u8 = parts.next()?.parse().ok()?;
    let minor: u8 = parts.next()?.parse().ok()?;
    Version::parse(major, minor)
}

fn parse_request_line(line: &[u8], max_uri_len: usize) -> Result<Message, ProtocolError> {
    let mut parts = line.splitn(3, |&b| b == b' ');
    let method = parts.next().ok_or(ProtocolError::BadStartLine)?;
    let target = parts.next().ok_or(ProtocolError::BadStartLine)?;
    let version_raw = parts.next().ok_or(ProtocolError::BadStartLine)?;
    if target.len() > max_uri_len {
        return Err(ProtocolError::UriTooLong);
    }
    let version = parse_version(version_raw).ok_or(ProtocolError::UnsupportedVersion)?;
    let method = std::str::from_utf8(method).map_err(ProtocolError::from)?.to_string();
    let raw_uri = std::str::from_utf8(target).map_err(ProtocolError::from)?.to_string();
    if raw_uri == "*" {
        return Err(ProtocolError::UnsupportedRequestTarget);
    }
    let uri = Uri::parse(&raw_uri).ok_or(ProtocolError::BadStartLine)?;
    let common = Common::new(version, Headers::new());
    Ok(Message::Request(Request {
        common,
        method,
        raw_uri,
        uri,
        named_parameters: HashMap::new(),
        expects_100_continue: false,
        ranges: None,
    }))
}

fn parse_status_line(line: &[u8]) -> Result<Message, ProtocolError> {
    let mut parts = line.splitn(3, |&b| b == b' ');
    let version_raw = parts.next().ok_or(ProtocolError::BadStartLine)?;
    let status_raw = parts.next().ok_or(ProtocolError::BadStartLine)?;
    let reason_raw = parts.next().unwrap_or(b"");
    let version = parse_version(version_raw).ok_or(ProtocolError::UnsupportedVersion)?;
    let status_code: u16 = std::str::from_utf8(status_raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(ProtocolError::BadStartLine)?;
    let reason_phrase = std::str::from_utf8(reason_raw).map_err(ProtocolError::from)?.to_string();
    let common = Common::new(version, Headers::new());
    Ok(Message::Response(Response { common, status_code, reason_phrase }))
}

/// Apply header post-processing (spec §4.2) to a freshly start-line-parsed
/// message and decide how its body is framed.
fn finish_headers(
    message: &mut Message,
    headers: Headers,
    limits: &Limits,
    kind: Kind,
) -> Result<BodyProgress, ProtocolError> {
    let has_transfer_encoding = headers.get("Transfer-Encoding").is_some();
    let has_content_length = headers.get("Content-Length").is_some();
    if has_transfer_encoding && has_content_length {
        return Err(ProtocolError::ConflictingBodyLength);
    }

    let mut is_chunked = false;
    if let Some(value) = headers.get("Transfer-Encoding") {
        let value = std::str::from_utf8(value)?;
        for token in value.split(',').map(|t| t.trim()).filter(|t| !t.is_empty()) {
            if token.eq_ignore_ascii_case("chunked") {
                is_chunked = true;
            } else {
                return Err(ProtocolError::UnsupportedTransferEncoding);
            }
        }
        if !is_chunked {
            return Err(ProtocolError::UnsupportedTransferEncoding);
        }
    }

    let content_length = match headers.get("Content-Length") {
        Some(value) => {
            let value = std::str::from_utf8(value)?;
            let n: u64 = value.trim().parse().map_err(ProtocolError::from)?;
            if n > limits.max_content_length {
                return Err(ProtocolError::ContentTooLarge);
            }
            Some(n)
        }
        None => None,
    };

    if kind == Kind::Request && message.common().version == Version::Http11 && headers.get("Host").is_none() {
        return Err(ProtocolError::MissingHost);
    }

    let content_type =
        headers.get("Content-Type").and_then(|v| std::str::from_utf8(v).ok()).and_then(ContentType::parse);
    let connection_options = ConnectionOptions::from_headers(&headers);

    {
        let common = message.common_mut();
        common.content_length = content_length;
        common.is_body_chunked = is_chunked;
        common.content_type = content_type;
        common.connection_options = connection_options;
        common.headers = headers;
    }

    if let Message::Request(req) = message {
        req.expects_100_continue = req.common.headers.has_token("Expect", "100-continue");
        req.ranges =
            req.common.headers.get("Range").and_then(|v| std::str::from_utf8(v).ok()).and_then(Ranges::parse);
    }

    Ok(if is_chunked {
        BodyProgress::ChunkSize
    } else if let Some(n) = content_length {
        BodyProgress::Fixed(n)
    } else {
        match message {
            Message::Request(_) => BodyProgress::None,
            Message::Response(resp) => {
                if response_can_have_body(resp.status_code) {
                    BodyProgress::Eof
                } else {
                    BodyProgress::None
                }
            }
        }
    })
}

/// `1xx`, `204`, and `304` responses never carry a body regardless of
/// framing headers (RFC 7230 §3.3).
fn response_can_have_body(status: u16) -> bool {
    !(matches!(status, 100..=199) || status == 204 || status == 304)
}
