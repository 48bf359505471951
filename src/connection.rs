//! Per-socket connection state machine (spec §4.4): the read path drives
//! the parser, the write path drains a queue of in-memory chunks and file
//! regions, plus timeout tracking, half-close, and the keep-alive decision.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::io::RawFd;
use std::sync::Arc;

use log::warn;

use crate::buffer::ByteBuffer;
use crate::config::Limits;
use crate::decoder::DecoderRegistry;
use crate::error::ProtocolError;
use crate::headers::Headers;
use crate::message::{Body, Outgoing, OutgoingState};
use crate::parsed::{ConnectionOptions, Message};
use crate::parser::{Kind, Outcome, Parser};
use crate::reactor::{Reactor, Token};
use crate::version::Version;

/// One entry in a connection's write stream: either an in-memory chunk or
/// a region of an open file (spec §4.4, Design Notes "write stream of
/// heterogeneous entries" — an enum, not a trait object, so draining never
/// allocates per entry).
pub enum WriteEntry {
    Chunk(Vec<u8>),
    File { file: File, remaining: u64 },
}

/// FIFO-tracked metadata for an in-flight request (spec §3). Pushed when a
/// request is parsed (server) or sent (client), popped/updated as the
/// matching response becomes known.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub issued_at_ms: u64,
    pub method: String,
    pub uri: String,
    pub status_code: Option<u16>,
}

/// Decide whether a connection stays open after a response is fully
/// written (spec §4.4 "Keep-alive decision"). `response_close` is `true`
/// when the response itself carries `Connection: close` (including the
/// connection-close framing this crate applies to an HTTP/1.1 response
/// with neither `Content-Length` nor `Transfer-Encoding` — see
/// DESIGN.md's Open Question decisions).
pub fn keep_alive_after(version: Version, request_options: ConnectionOptions, response_close: bool) -> bool {
    if response_close || request_options.effective_close() {
        return false;
    }
    match version {
        Version::Http10 => request_options.keep_alive,
        Version::Http11 => true,
    }
}

/// RFC 7230 §3.3.2: a server must not send `Content-Length` on a 1xx or
/// 204 response. Mirrors the body-kind check `Outgoing::response_status`
/// already applies when it forces `Body::Denied`.
fn is_bodyless_status(status: u16) -> bool {
    status == 101 || status == 204
}

/// Context carried from the most recently completed request/response,
/// used to frame the message going the other way.
#[derive(Debug, Clone, Copy)]
pub struct ResponseContext {
    pub version: Version,
    pub is_head: bool,
    pub request_options: ConnectionOptions,
}

impl Default for ResponseContext {
    fn default() -> ResponseContext {
        ResponseContext { version: Version::Http11, is_head: false, request_options: ConnectionOptions::default() }
    }
}

/// Per-socket state: `{read_buf, parser, write_queue, timers, flags}` from
/// spec §3's `Connection` data model, minus the transport handle itself
/// (the embedder owns the socket; this type is transport-agnostic so it
/// can be driven directly in tests).
pub struct Connection {
    limits: Limits,
    read_buf: ByteBuffer,
    parser: Parser,
    write_queue: VecDeque<WriteEntry>,
    pending_out: ByteBuffer,
    last_activity_ms: u64,
    shutting_down: bool,
    closed_by_peer: bool,
    decoders: Arc<DecoderRegistry>,
    reactor: Option<Arc<dyn Reactor>>,
    fd: Option<RawFd>,
    write_token: Option<Token>,
    pub request_info_queue: VecDeque<RequestInfo>,
    pub response_ctx: ResponseContext,
}

impl Connection {
    pub fn new(kind: Kind, limits: Limits, now_ms: u64) -> Connection {
        Connection::with_decoders(kind, limits, Arc::new(DecoderRegistry::default()), now_ms)
    }

    /// As [`Connection::new`], but sharing the decoder registry a
    /// [`crate::server::Server`]/[`crate::client::Client`] was configured
    /// with instead of a fresh default one.
    pub fn with_decoders(kind: Kind, limits: Limits, decoders: Arc<DecoderRegistry>, now_ms: u64) -> Connection {
        Connection {
            limits,
            read_buf: ByteBuffer::new(),
            parser: Parser::new(kind, limits),
            write_queue: VecDeque::new(),
            pending_out: ByteBuffer::new(),
            last_activity_ms: now_ms,
            shutting_down: false,
            closed_by_peer: false,
            decoders,
            reactor: None,
            fd: None,
            write_token: None,
            request_info_queue: VecDeque::new(),
            response_ctx: ResponseContext::default(),
        }
    }

    /// Wire this connection to the embedder's reactor (spec §4.4 "write
    /// path... arm write-readiness"/"disarm write-readiness"): from now on,
    /// every write-stream transition between empty and non-empty calls
    /// `register_write`/`unregister` on `reactor` for `fd`. Connections
    /// driven directly in tests, with no reactor wired, simply skip this.
    pub fn set_reactor(&mut self, reactor: Arc<dyn Reactor>, fd: RawFd) {
        self.reactor = Some(reactor);
        self.fd = Some(fd);
        self.sync_write_interest();
    }

    /// Whether write-readiness is currently armed with the wired reactor
    /// (spec §8 invariant 6: "armed iff the write stream is non-empty").
    pub fn has_armed_write_interest(&self) -> bool {
        self.write_token.is_some()
    }

    /// Arm or disarm write-readiness so it tracks `write_queue`'s
    /// emptiness. Called at every point the queue can transition. A no-op
    /// when no reactor has been wired via [`Connection::set_reactor`].
    fn sync_write_interest(&mut self) {
        let reactor = match &self.reactor {
            Some(reactor) => Arc::clone(reactor),
            None => return,
        };
        if self.write_queue.is_empty() {
            if let Some(token) = self.write_token.take() {
                reactor.unregister(token);
            }
        } else if self.write_token.is_none() {
            match self.fd {
                Some(fd) => match reactor.register_write(fd) {
                    Ok(token) => self.write_token = Some(token),
                    Err(e) => warn!("failed to arm write-readiness: {}", e),
                },
                None => {}
            }
        }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.last_activity_ms = now_ms;
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms
    }

    /// Spec §8 invariant 7: a connection whose last activity is older than
    /// the timeout must be observed as timed out within one timer period.
    pub fn is_timed_out(&self, now_ms: u64, timeout_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_activity_ms) > timeout_ms
    }

    pub fn closed_by_peer(&self) -> bool {
        self.closed_by_peer
    }

    /// True if no message is currently mid-parse (a clean point to treat
    /// an EOF as a normal close rather than a truncated message).
    pub fn parser_idle(&self) -> bool {
        self.parser.is_idle()
    }

    fn drain_parser(&mut self) -> Vec<Result<Message, ProtocolError>> {
        let mut out = Vec::new();
        loop {
            match self.parser.parse(self.read_buf.peek(), self.closed_by_peer) {
                Outcome::NeedMore => break,
                Outcome::Expect100Continue => {
                    self.write_queue.push_back(WriteEntry::Chunk(b"HTTP/1.1 100 Continue\r\n\r\n".to_vec()));
                    self.sync_write_interest();
                    continue;
                }
                Outcome::Complete { mut message, consumed } => {
                    self.read_buf.advance(consumed);
                    self.parser.reset();
                    self.decode_body(&mut message);
                    out.push(Ok(message));
                }
                Outcome::Failed(e) => {
                    out.push(Err(e));
                    break;
                }
            }
        }
        out
    }

    /// Run the registered content decoder matching the message's
    /// `Content-Type` over its buffered body, if any (spec §3
    /// `decoded_content`).
    fn decode_body(&self, message: &mut Message) {
        let common = message.common_mut();
        let (media_type, body) = match (&common.content_type, &common.body) {
            (Some(ct), Some(body)) => (ct.media_type.clone(), body),
            _ => return,
        };
        common.decoded_content = self.decoders.decode(&media_type, body);
    }

    /// Append bytes already read off the wire and drive the parser. Used
    /// directly by tests and by [`Connection::fill_from`].
    pub fn ingest(&mut self, data: &[u8], now_ms: u64) -> Vec<Result<Message, ProtocolError>> {
        self.touch(now_ms);
        self.read_buf.append(data);
        self.drain_parser()
    }

    /// Read whatever is available from `r` into the read buffer and drive
    /// the parser (spec §4.4 read path). A zero-length read is EOF: sets
    /// `closed_by_peer` so an EOF-framed response body (or a request with
    /// neither framing header) can finalize, and any in-flight message
    /// that cannot complete surfaces as [`ProtocolError::PrematureEof`] the
    /// next time the caller checks [`Connection::parser_idle`].
    pub fn fill_from<R: Read>(&mut self, r: &mut R, now_ms: u64) -> io::Result<Vec<Result<Message, ProtocolError>>> {
        self.touch(now_ms);
        match self.read_buf.read_from(r, 64 * 1024) {
            Ok(0) => {
                self.closed_by_peer = true;
                let mut events = self.drain_parser();
                if !self.parser_idle() && events.is_empty() {
                    events.push(Err(ProtocolError::PrematureEof));
                }
                Ok(events)
            }
            Ok(_) => Ok(self.drain_parser()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    pub fn write_pending(&self) -> bool {
        !self.write_queue.is_empty()
    }

    /// Drain as many write-stream entries as the writer accepts (spec
    /// §4.4 write path). Returns `true` once the stream is fully empty —
    /// the caller should then disarm write-readiness and, if
    /// [`Connection::is_shutting_down`], close the socket.
    pub fn drain_to<W: Write>(&mut self, w: &mut W) -> io::Result<bool> {
        let result = self.drain_to_inner(w);
        self.sync_write_interest();
        result
    }

    fn drain_to_inner<W: Write>(&mut self, w: &mut W) -> io::Result<bool> {
        while let Some(entry) = self.write_queue.front_mut() {
            match entry {
                WriteEntry::Chunk(data) => match w.write(data) {
                    Ok(0) => return Ok(false),
                    Ok(n) if n == data.len() => {
                        self.write_queue.pop_front();
                    }
                    Ok(n) => {
                        data.drain(0..n);
                        return Ok(false);
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                    Err(e) => return Err(e),
                },
                WriteEntry::File { file, remaining } => {
                    let mut chunk = vec![0u8; (*remaining).min(64 * 1024) as usize];
                    let read = file.read(&mut chunk)?;
                    if read == 0 {
                        self.write_queue.pop_front();
                        continue;
                    }
                    match w.write(&chunk[..read]) {
                        Ok(n) => {
                            *remaining -= n as u64;
                            if n < read {
                                // Rewind the unwritten tail so the next
                                // drain re-reads it from the file.
                                file.seek(SeekFrom::Current(-((read - n) as i64)))?;
                            }
                            if *remaining == 0 {
                                self.write_queue.pop_front();
                            } else if n < read {
                                return Ok(false);
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            file.seek(SeekFrom::Current(-(read as i64)))?;
                            return Ok(false);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Ok(true)
    }

    /// `shutdown()` (spec §4.4): the caller is expected to disarm read
    /// interest and issue a read-side socket shutdown; this flag tells the
    /// write path to close once drained.
    pub fn shutdown(&mut self) {
        self.shutting_down = true;
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    pub fn should_close_now(&self) -> bool {
        self.shutting_down && self.write_queue.is_empty()
    }

    /// Move whatever has been buffered into `pending_out` onto the write
    /// queue. The caller must have already dropped any `Outgoing` borrowing
    /// `pending_out`.
    fn flush_pending_out(&mut self, keep_alive: bool) {
        let data = self.pending_out.peek().to_vec();
        self.pending_out.clear();
        if !data.is_empty() {
            self.write_queue.push_back(WriteEntry::Chunk(data));
        }
        self.sync_write_interest();
        if !keep_alive {
            self.shutdown();
        }
    }

    fn mark_status(&mut self, status: u16) {
        if let Some(info) = self.request_info_queue.back_mut() {
            if info.status_code.is_none() {
                info.status_code = Some(status);
            }
        }
    }

    /// `send_response` (spec §4.4): status line plus merged headers, no
    /// body.
    pub fn send_response(&mut self, status: u16, headers: &Headers) {
        self.send_response_with_body(status, headers, b"");
    }

    /// `send_response_with_body`.
    pub fn send_response_with_body(&mut self, status: u16, headers: &Headers, body: &[u8]) {
        self.send_response_with_body_closing(status, headers, body, false);
    }

    /// Shared by [`Connection::send_response_with_body`] and
    /// [`Connection::send_error`]. `force_close` overrides the keep-alive
    /// decision outright, for the paths spec §4.4/§7 require to always
    /// half-close (idle timeout, a `ProtocolError` response) rather than
    /// leave it to whatever the request's `Connection` header happens to
    /// say.
    fn send_response_with_body_closing(&mut self, status: u16, headers: &Headers, body: &[u8], force_close: bool) {
        let ctx = self.response_ctx;
        let keep_alive = !force_close && keep_alive_after(ctx.version, ctx.request_options, false);
        let mut out = OutgoingState::ResponseStart {
            version: ctx.version,
            body: if ctx.is_head { Body::Ignored } else { Body::Normal },
            close: !keep_alive,
        }
        .with(&mut self.pending_out);
        out.response_status(status, crate::status::reason_phrase(status));
        for h in headers.iter() {
            out.add_header(&h.name, &h.value).expect("response headers must not set Content-Length/Transfer-Encoding directly");
        }
        // RFC 7230 §3.3.2: a 1xx or 204 response must never carry a
        // Content-Length header.
        if !is_bodyless_status(status) {
            out.add_length(body.len() as u64).expect("Content-Length set exactly once");
        }
        let needs_body = out.done_headers().expect("headers already validated above");
        if needs_body && !ctx.is_head {
            out.write_body(body);
        }
        out.done();
        drop(out);
        self.flush_pending_out(keep_alive);
        self.mark_status(status);
    }

    /// `send_response_with_file`: headers plus a single byte-range file
    /// region. `range` is `(start, end_inclusive)`, already resolved by
    /// the caller against the file's length (see [`crate::range::Ranges::resolve`]);
    /// `None` streams the whole file. Serving multiple ranges as
    /// `multipart/byteranges` is not implemented (see DESIGN.md).
    pub fn send_response_with_file(
        &mut self,
        status: u16,
        headers: &Headers,
        mut file: File,
        total_len: u64,
        range: Option<(u64, u64)>,
    ) -> io::Result<()> {
        let ctx = self.response_ctx;
        let keep_alive = keep_alive_after(ctx.version, ctx.request_options, false);
        let (start, len) = match range {
            Some((start, end)) => (start, end.saturating_sub(start) + 1),
            None => (0, total_len),
        };
        if start > 0 {
            file.seek(SeekFrom::Start(start))?;
        }
        let mut out = OutgoingState::ResponseStart {
            version: ctx.version,
            body: if ctx.is_head { Body::Ignored } else { Body::Normal },
            close: !keep_alive,
        }
        .with(&mut self.pending_out);
        out.response_status(status, crate::status::reason_phrase(status));
        for h in headers.iter() {
            out.add_header(&h.name, &h.value).expect("response headers must not set Content-Length/Transfer-Encoding directly");
        }
        // RFC 7230 §3.3.2: a 1xx or 204 response must never carry a
        // Content-Length header.
        if !is_bodyless_status(status) {
            out.add_length(len).expect("Content-Length set exactly once");
        }
        // The fixed-size body accounting in `Outgoing` is satisfied by the
        // file region pushed below rather than by `write_body`/`done`: we
        // only need the header bytes it has already buffered.
        let needs_body = out.done_headers().expect("headers already validated above");
        drop(out);
        let data = self.pending_out.peek().to_vec();
        self.pending_out.clear();
        if !data.is_empty() {
            self.write_queue.push_back(WriteEntry::Chunk(data));
        }
        if needs_body && len > 0 {
            self.write_queue.push_back(WriteEntry::File { file, remaining: len });
        }
        self.sync_write_interest();
        if !keep_alive {
            self.shutdown();
        }
        self.mark_status(status);
        Ok(())
    }

    /// Called after a route handler returns. If it wrote nothing, synthesize
    /// a 500 rather than let the connection hang until the idle timeout.
    pub fn finish_handler(&mut self) {
        if !self.write_pending() {
            self.send_error(500, "handler returned without writing a response");
        }
    }

    /// `send_error`: a default plain-text error body, used unless the
    /// embedder's `error_sender` hook has already written a response.
    /// Always half-closes the connection afterward (spec §4.4 "Timeout...
    /// is sent 408... and half-closed"; spec §7 "ProtocolError... handled
    /// locally by sending that response and half-closing") rather than
    /// leaving it to the keep-alive math, which a client's own `Connection`
    /// header could otherwise steer back to keep-alive.
    pub fn send_error(&mut self, status: u16, detail: &str) {
        let body = format!("{} {}\n{}\n", status, crate::status::reason_phrase(status), detail);
        let mut headers = Headers::new();
        headers.push("Content-Type", b"text/plain; charset=utf-8".to_vec());
        self.send_response_with_body_closing(status, &headers, body.as_bytes(), true);
    }

    /// `send_request` support for the client side: writes a request line,
    /// headers, and body directly onto the write stream.
    pub fn send_request(&mut self, method: &str, target: &str, version: Version, headers: &Headers, body: &[u8]) {
        let mut out = OutgoingState::RequestStart.with(&mut self.pending_out);
        out.request_line(method, target, version);
        for h in headers.iter() {
            out.add_header(&h.name, &h.value).expect("request headers must not set Content-Length/Transfer-Encoding directly");
        }
        if !body.is_empty() || !headers.contains("Content-Length") {
            out.add_length(body.len() as u64).expect("Content-Length set exactly once");
        }
        let needs_body = out.done_headers().expect("headers already validated above");
        if needs_body {
            out.write_body(body);
        }
        out.done();
        drop(out);
        let data = self.pending_out.peek().to_vec();
        self.pending_out.clear();
        if !data.is_empty() {
            self.write_queue.push_back(WriteEntry::Chunk(data));
        }
        self.sync_write_interest();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Limits;
    use crate::parser::Kind;

    #[test]
    fn simple_get_round_trip() {
        let mut conn = Connection::new(Kind::Request, Limits::default(), 0);
        let events = conn.ingest(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n", 0);
        assert_eq!(events.len(), 1);
        let req = events[0].as_ref().unwrap().as_request().unwrap();
        assert_eq!(req.raw_uri, "/hello");

        conn.response_ctx = ResponseContext {
            version: Version::Http11,
            is_head: false,
            request_options: req.common.connection_options,
        };
        conn.send_response_with_body(200, &Headers::new(), b"hi");
        let mut out = Vec::new();
        let drained = conn.drain_to(&mut out).unwrap();
        assert!(drained);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));
    }

    #[test]
    fn pipelined_requests_both_parse_in_order() {
        let mut conn = Connection::new(Kind::Request, Limits::default(), 0);
        let events = conn.ingest(
            b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n",
            0,
        );
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap().as_request().unwrap().raw_uri, "/a");
        assert_eq!(events[1].as_ref().unwrap().as_request().unwrap().raw_uri, "/b");
    }

    #[test]
    fn http10_closes_without_keep_alive_token() {
        let opts = ConnectionOptions { keep_alive: false, close: false };
        assert!(!keep_alive_after(Version::Http10, opts, false));
    }

    #[test]
    fn http10_keeps_alive_with_token() {
        let opts = ConnectionOptions { keep_alive: true, close: false };
        assert!(keep_alive_after(Version::Http10, opts, false));
    }

    #[test]
    fn http11_closes_on_request_close_token() {
        let opts = ConnectionOptions { keep_alive: false, close: true };
        assert!(!keep_alive_after(Version::Http11, opts, false));
    }

    #[test]
    fn http11_closes_on_response_close() {
        let opts = ConnectionOptions::default();
        assert!(!keep_alive_after(Version::Http11, opts, true));
    }

    #[test]
    fn http11_keeps_alive_by_default() {
        let opts = ConnectionOptions::default();
        assert!(keep_alive_after(Version::Http11, opts, false));
    }

    #[test]
    fn timeout_is_detected_after_the_window() {
        let conn = Connection::new(Kind::Request, Limits::default(), 1_000);
        assert!(!conn.is_timed_out(5_000, 10_000));
        assert!(conn.is_timed_out(20_000, 10_000));
    }

    #[test]
    fn form_body_is_decoded_through_the_registered_decoder() {
        let mut conn = Connection::new(Kind::Request, Limits::default(), 0);
        let events = conn.ingest(
            b"POST /submit HTTP/1.1\r\nHost: x\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 7\r\n\r\na=1&b=2",
            0,
        );
        assert_eq!(events.len(), 1);
        let req = events[0].as_ref().unwrap().as_request().unwrap();
        let decoded = req.common.decoded_content.as_ref().expect("body should have been decoded");
        let pairs = decoded.downcast_ref::<Vec<(String, String)>>().unwrap();
        assert_eq!(pairs, &vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]);
    }

    #[test]
    fn unregistered_media_type_leaves_decoded_content_empty() {
        let mut conn = Connection::new(Kind::Request, Limits::default(), 0);
        let events = conn.ingest(
            b"POST /submit HTTP/1.1\r\nHost: x\r\nContent-Type: application/json\r\nContent-Length: 2\r\n\r\n{}",
            0,
        );
        let req = events[0].as_ref().unwrap().as_request().unwrap();
        assert!(req.common.decoded_content.is_none());
    }

    #[test]
    fn write_queue_arms_and_drains() {
        let mut conn = Connection::new(Kind::Request, Limits::default(), 0);
        assert!(!conn.write_pending());
        conn.send_response(204, &Headers::new());
        assert!(conn.write_pending());
        let mut sink = Vec::new();
        assert!(conn.drain_to(&mut sink).unwrap());
        assert!(!conn.write_pending());
    }

    #[test]
    fn no_content_response_carries_no_content_length_header() {
        let mut conn = Connection::new(Kind::Request, Limits::default(), 0);
        conn.send_response(204, &Headers::new());
        let mut out = Vec::new();
        conn.drain_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 204"));
        assert!(!text.contains("Content-Length"));
    }

    #[test]
    fn send_error_forces_close_even_when_request_asked_to_keep_alive() {
        let mut conn = Connection::new(Kind::Request, Limits::default(), 0);
        conn.response_ctx = ResponseContext {
            version: Version::Http11,
            is_head: false,
            request_options: ConnectionOptions { keep_alive: true, close: false },
        };
        assert!(keep_alive_after(Version::Http11, conn.response_ctx.request_options, false));

        conn.send_error(400, "bad request");

        assert!(conn.is_shutting_down());
        let mut out = Vec::new();
        conn.drain_to(&mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("HTTP/1.1 400"));
    }
}
