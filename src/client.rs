//! Outbound connection (spec §4.6). A `Client` owns exactly one
//! [`Connection`] opened lazily on first `send_request`, serializes
//! requests onto its write stream, and matches responses back to the
//! `RequestInfo` pushed when each request was sent, in FIFO order
//! (pipelining-safe as long as the peer also responds in order, per
//! HTTP/1.1 semantics).

use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use log::debug;

use crate::config::ClientConfig;
use crate::connection::{Connection, RequestInfo};
use crate::decoder::DecoderRegistry;
use crate::error::ProtocolError;
use crate::headers::Headers;
use crate::parsed::{Message, Response};
use crate::parser::Kind;
use crate::reactor::Reactor;
use crate::version::Version;

/// A response paired with the request metadata it answers.
pub struct Dispatched {
    pub info: RequestInfo,
    pub response: Response,
}

/// Outbound connection state (spec §4.6). Transport-agnostic, like
/// [`Connection`] itself: `send_request` only enqueues bytes, and
/// `ingest`/`fill_from` (inherited via `connection()`) drive the read
/// side exactly as the server does.
pub struct Client {
    config: ClientConfig,
    decoders: Arc<DecoderRegistry>,
    reactor: Option<(Arc<dyn Reactor>, RawFd)>,
    conn: Option<Connection>,
    pending: VecDeque<RequestInfo>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Client {
        let decoders = Arc::new(config.content_decoders.clone());
        Client { config, decoders, reactor: None, conn: None, pending: VecDeque::new() }
    }

    /// Wire this client's (possibly not-yet-opened) connection to the
    /// embedder's reactor (see [`Connection::set_reactor`]). `fd` is the
    /// socket `send_request` will eventually write through. If a
    /// connection already exists, it is wired immediately; otherwise the
    /// wiring is applied the moment [`Client::connection`] opens one.
    pub fn set_reactor(&mut self, reactor: Arc<dyn Reactor>, fd: RawFd) {
        if let Some(conn) = self.conn.as_mut() {
            conn.set_reactor(Arc::clone(&reactor), fd);
        }
        self.reactor = Some((reactor, fd));
    }

    fn connection(&mut self, now_ms: u64) -> &mut Connection {
        if self.conn.is_none() {
            debug!("opening client connection");
            let mut conn = Connection::with_decoders(
                Kind::Response,
                self.config.limits,
                Arc::clone(&self.decoders),
                now_ms,
            );
            if let Some((reactor, fd)) = &self.reactor {
                conn.set_reactor(Arc::clone(reactor), *fd);
            }
            self.conn = Some(conn);
        }
        self.conn.as_mut().unwrap()
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// `send_request` (spec §4.6): serialize onto the write stream and
    /// push a `RequestInfo` onto the FIFO. The connection is opened lazily
    /// on first call.
    pub fn send_request(&mut self, method: &str, target: &str, version: Version, headers: &Headers, body: &[u8], now_ms: u64) {
        let mut merged = self.config.default_headers.clone();
        for h in headers.iter() {
            merged.push(h.name.clone(), h.value.clone());
        }
        let conn = self.connection(now_ms);
        conn.send_request(method, target, version, &merged, body);
        self.pending.push_back(RequestInfo {
            issued_at_ms: now_ms,
            method: method.to_string(),
            uri: target.to_string(),
            status_code: None,
        });
    }

    /// Feed newly arrived bytes and match every completed response against
    /// the oldest pending `RequestInfo` (spec §4.6 "parse responses in
    /// order and dispatch... alongside the popped RequestInfo").
    pub fn ingest(&mut self, data: &[u8], now_ms: u64) -> Vec<Result<Dispatched, ProtocolError>> {
        let conn = self.connection(now_ms);
        let events = conn.ingest(data, now_ms);
        let mut out = Vec::new();
        for event in events {
            match event {
                Ok(Message::Response(response)) => {
                    if let Some(mut info) = self.pending.pop_front() {
                        info.status_code = Some(response.status_code);
                        out.push(Ok(Dispatched { info, response }));
                    }
                }
                Ok(Message::Request(_)) => {
                    // A client connection only ever parses responses.
                }
                Err(e) => out.push(Err(e)),
            }
        }
        out
    }

    pub fn write_pending(&self) -> bool {
        self.conn.as_ref().map(|c| c.write_pending()).unwrap_or(false)
    }

    pub fn drain_to<W: std::io::Write>(&mut self, w: &mut W) -> std::io::Result<bool> {
        match self.conn.as_mut() {
            Some(conn) => conn.drain_to(w),
            None => Ok(true),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn shutdown(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            conn.shutdown();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn send_request_opens_connection_lazily() {
        let mut client = Client::new(ClientConfig::default());
        assert!(!client.is_connected());
        client.send_request("GET", "/", Version::Http11, &Headers::new(), b"", 0);
        assert!(client.is_connected());
        let mut out = Vec::new();
        client.drain_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("GET / HTTP/1.1\r\n"));
    }

    #[test]
    fn responses_dispatch_in_fifo_order() {
        let mut client = Client::new(ClientConfig::default());
        client.send_request("GET", "/a", Version::Http11, &Headers::new(), b"", 0);
        client.send_request("GET", "/b", Version::Http11, &Headers::new(), b"", 0);
        let mut sink = Vec::new();
        client.drain_to(&mut sink).unwrap();

        let results = client.ingest(
            b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nAHTTP/1.1 404 Not Found\r\nContent-Length: 1\r\n\r\nB",
            0,
        );
        assert_eq!(results.len(), 2);
        let first = results[0].as_ref().unwrap();
        assert_eq!(first.info.uri, "/a");
        assert_eq!(first.response.status_code, 200);
        let second = results[1].as_ref().unwrap();
        assert_eq!(second.info.uri, "/b");
        assert_eq!(second.response.status_code, 404);
    }

    #[test]
    fn default_headers_are_merged_into_every_request() {
        let mut config = ClientConfig::default();
        config.default_headers.push("X-App", b"demo".to_vec());
        let mut client = Client::new(config);
        client.send_request("GET", "/", Version::Http11, &Headers::new(), b"", 0);
        let mut out = Vec::new();
        client.drain_to(&mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("X-App: demo\r\n"));
    }
}
