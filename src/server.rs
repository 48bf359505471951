//! Accept loop and request dispatch (spec §4.5). `Server` owns the route
//! table, the connection registry, and the configured hooks; it is driven
//! by whatever concrete [`crate::reactor::Reactor`] the embedder wires up —
//! this module never touches a socket directly.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use log::{debug, warn};

use crate::config::{RouteOptions, ServerConfig};
use crate::connection::Connection;
use crate::decoder::DecoderRegistry;
use crate::error::ConfigurationError;
use crate::headers::Headers;
use crate::parsed::{Message, Request};
use crate::parser::Kind;
use crate::reactor::{Reactor, Token};
use crate::route::{Match, RouteTable};

/// A route handler: writes a response directly onto the connection's write
/// stream (spec §4.4 "handler writes response via Connection's write
/// stream"). Boxed so routes with different closures share one `RouteTable`.
pub type Handler = Arc<dyn Fn(&mut Connection, &Request) + Send + Sync>;

/// Capability trait passed to the server (spec §9 "hook callbacks with
/// opaque argument map to a capability trait"). Every method has a
/// sensible default so an embedder only overrides what it needs.
pub trait Hooks: Send {
    /// Pre-route, observation only.
    fn request_hook(&self, _conn: &mut Connection, _req: &Request) {}

    /// Library-level diagnostics for a failure the core handled itself.
    fn error_hook(&self, _conn: &mut Connection, detail: &str) {
        warn!("connection error: {}", detail);
    }

    /// Optional protocol trace, called for every completed message.
    fn trace_hook(&self, _conn: &mut Connection, _message: &Message) {}

    /// Override for rendering a default error body. Returning `true` means
    /// the hook already wrote a response; `false` falls back to
    /// [`Connection::send_error`].
    fn error_sender(&self, _conn: &mut Connection, _status: u16, _headers: &Headers, _detail: &str) -> bool {
        false
    }
}

/// A [`Hooks`] implementation that only logs (the default if an embedder
/// doesn't need request/trace observation).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl Hooks for NoHooks {}

/// Accept loop and connection registry (spec §4.5). Generic over `Hooks`
/// so the capability trait is monomorphized rather than boxed.
pub struct Server<H: Hooks = NoHooks> {
    config: ServerConfig,
    decoders: Arc<DecoderRegistry>,
    reactor: Option<Arc<dyn Reactor>>,
    routes: RouteTable<Handler>,
    hooks: H,
    connections: HashMap<Token, Connection>,
    started: bool,
}

impl<H: Hooks> Server<H> {
    pub fn new(config: ServerConfig, hooks: H) -> Server<H> {
        let decoders = Arc::new(config.content_decoders.clone());
        Server { config, decoders, reactor: None, routes: RouteTable::new(), hooks, connections: HashMap::new(), started: false }
    }

    /// As [`Server::new`], but with a [`Reactor`] wired in (spec §4.5
    /// `listen(cfg, reactor) -> Server`): every connection accepted via
    /// [`Server::accept_fd`] gets `register_write`/`unregister` called on
    /// `reactor` as its write stream fills and drains. Connections accepted
    /// through the plain [`Server::accept`] (no fd to register against)
    /// still work exactly as before — they simply never arm write
    /// interest.
    pub fn with_reactor(config: ServerConfig, hooks: H, reactor: Arc<dyn Reactor>) -> Server<H> {
        let decoders = Arc::new(config.content_decoders.clone());
        Server { config, decoders, reactor: Some(reactor), routes: RouteTable::new(), hooks, connections: HashMap::new(), started: false }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// `add_route` (spec §4.5): delegates to [`RouteTable::add`], validating
    /// pattern syntax. Fails if the server has already started listening
    /// (spec §5: "the RouteTable is immutable after `server.start()`").
    pub fn add_route(
        &mut self,
        method: &str,
        pattern: &str,
        handler: Handler,
        options: RouteOptions,
    ) -> Result<(), ConfigurationError> {
        self.routes.add(method, pattern, handler, options)
    }

    /// `listen` (spec §4.5): freezes the route table. Socket binding itself
    /// is the embedder's responsibility via its chosen reactor; this method
    /// marks the point past which routes may no longer be registered.
    pub fn listen(&mut self) {
        self.routes.freeze();
        self.started = true;
        debug!("server listening on {}:{}", self.config.host, self.config.port);
    }

    pub fn is_listening(&self) -> bool {
        self.started
    }

    /// Register a newly accepted connection under `token`.
    pub fn accept(&mut self, token: Token, now_ms: u64) {
        debug!("accepted connection {:?}", token);
        let conn = Connection::with_decoders(Kind::Request, self.config.limits, Arc::clone(&self.decoders), now_ms);
        self.connections.insert(token, conn);
    }

    /// As [`Server::accept`], additionally wiring the connection to this
    /// server's reactor (see [`Server::with_reactor`]) against `fd` so its
    /// write-readiness is armed and disarmed as its write stream fills and
    /// drains (spec §8 invariant 6). A no-op wiring-wise if the server was
    /// built with [`Server::new`].
    pub fn accept_fd(&mut self, token: Token, fd: RawFd, now_ms: u64) {
        debug!("accepted connection {:?} on fd {}", token, fd);
        let mut conn = Connection::with_decoders(Kind::Request, self.config.limits, Arc::clone(&self.decoders), now_ms);
        if let Some(reactor) = &self.reactor {
            conn.set_reactor(Arc::clone(reactor), fd);
        }
        self.connections.insert(token, conn);
    }

    pub fn connection(&self, token: Token) -> Option<&Connection> {
        self.connections.get(&token)
    }

    pub fn connection_mut(&mut self, token: Token) -> Option<&mut Connection> {
        self.connections.get_mut(&token)
    }

    /// Drive the read path for `token` with freshly arrived bytes (spec
    /// §4.4 "Read path"): parse, invoke hooks and the matched handler for
    /// every completed message, synthesize error responses for malformed
    /// ones. Returns `false` if the connection no longer exists.
    pub fn on_readable(&mut self, token: Token, data: &[u8], now_ms: u64) -> bool {
        let events = match self.connections.get_mut(&token) {
            Some(conn) => conn.ingest(data, now_ms),
            None => return false,
        };
        for event in events {
            match event {
                Ok(message) => self.dispatch(token, message),
                Err(e) => {
                    let status = e.status();
                    let detail = e.to_string();
                    self.hooks.error_hook(self.connections.get_mut(&token).unwrap(), &detail);
                    if let Some(conn) = self.connections.get_mut(&token) {
                        conn.send_error(status, &detail);
                    }
                }
            }
        }
        true
    }

    fn dispatch(&mut self, token: Token, message: Message) {
        let conn = match self.connections.get_mut(&token) {
            Some(c) => c,
            None => return,
        };
        self.hooks.trace_hook(conn, &message);
        let request = match message {
            Message::Request(r) => r,
            Message::Response(_) => return,
        };

        conn.request_info_queue.push_back(crate::connection::RequestInfo {
            issued_at_ms: conn.last_activity_ms(),
            method: request.method.clone(),
            uri: request.raw_uri.clone(),
            status_code: None,
        });
        conn.response_ctx = crate::connection::ResponseContext {
            version: request.common.version,
            is_head: request.method.eq_ignore_ascii_case("HEAD"),
            request_options: request.common.connection_options,
        };

        self.hooks.request_hook(conn, &request);

        match self.routes.find(&request.method, &request.uri.path) {
            Match::Found { route, named_parameters } => {
                let handler = Arc::clone(&route.handler);
                let mut request = request;
                request.named_parameters = named_parameters;
                handler(conn, &request);
                conn.finish_handler();
            }
            Match::WrongMethod(methods) => {
                let mut headers = Headers::new();
                headers.push("Allow", methods.join(", ").into_bytes());
                if !self.hooks.error_sender(conn, 405, &headers, "method not allowed") {
                    conn.send_response_with_body(405, &headers, b"405 Method Not Allowed\n");
                }
            }
            Match::WrongPath => {
                if !self.hooks.error_sender(conn, 404, &Headers::new(), "not found") {
                    conn.send_error(404, "not found");
                }
            }
        }
    }

    /// Drain a connection's write stream (spec §4.4 "Write path").
    pub fn on_writable<W: std::io::Write>(&mut self, token: Token, w: &mut W) -> std::io::Result<bool> {
        match self.connections.get_mut(&token) {
            Some(conn) => conn.drain_to(w),
            None => Ok(true),
        }
    }

    /// `408`-and-half-close any connection past its idle timeout (spec
    /// §4.4 "Timeout"). Returns the tokens that should now be unregistered
    /// from the reactor (write stream drained and `should_close_now`).
    pub fn on_timer(&mut self, now_ms: u64) -> Vec<Token> {
        let timeout_ms = self.config.connection_timeout_ms;
        let mut to_close = Vec::new();
        for (token, conn) in self.connections.iter_mut() {
            if conn.is_timed_out(now_ms, timeout_ms) && !conn.is_shutting_down() {
                warn!("connection {:?} timed out", token);
                conn.send_error(408, "idle timeout");
            }
            if conn.should_close_now() {
                to_close.push(*token);
            }
        }
        to_close
    }

    pub fn remove_connection(&mut self, token: Token) {
        self.connections.remove(&token);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// `shutdown` (spec §4.5): half-close every connection; the caller
    /// drains write streams and tears down listeners.
    pub fn shutdown(&mut self) {
        for conn in self.connections.values_mut() {
            conn.shutdown();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::RouteOptions;

    fn token(n: usize) -> Token {
        Token(n)
    }

    #[test]
    fn simple_get_returns_configured_body() {
        let mut server: Server = Server::new(ServerConfig::default(), NoHooks);
        server
            .add_route(
                "GET",
                "/hello",
                Arc::new(|conn: &mut Connection, _req: &Request| {
                    conn.send_response_with_body(200, &Headers::new(), b"hi");
                }),
                RouteOptions::new(),
            )
            .unwrap();
        server.listen();
        server.accept(token(1), 0);
        server.on_readable(token(1), b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n", 0);
        let mut out = Vec::new();
        server.on_writable(token(1), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));
    }

    #[test]
    fn named_parameter_reaches_handler() {
        let mut server: Server = Server::new(ServerConfig::default(), NoHooks);
        server
            .add_route(
                "GET",
                "/users/:id",
                Arc::new(|conn: &mut Connection, req: &Request| {
                    let id = req.named_parameters.get("id").cloned().unwrap_or_default();
                    conn.send_response_with_body(200, &Headers::new(), id.as_bytes());
                }),
                RouteOptions::new(),
            )
            .unwrap();
        server.listen();
        server.accept(token(1), 0);
        server.on_readable(token(1), b"GET /users/42 HTTP/1.1\r\nHost: x\r\n\r\n", 0);
        let mut out = Vec::new();
        server.on_writable(token(1), &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().ends_with("\r\n\r\n42"));
    }

    #[test]
    fn method_mismatch_yields_405_with_allow_header() {
        let mut server: Server = Server::new(ServerConfig::default(), NoHooks);
        server
            .add_route("GET", "/a", Arc::new(|conn: &mut Connection, _: &Request| conn.send_response(200, &Headers::new())), RouteOptions::new())
            .unwrap();
        server.listen();
        server.accept(token(1), 0);
        server.on_readable(token(1), b"POST /a HTTP/1.1\r\nHost: x\r\n\r\n", 0);
        let mut out = Vec::new();
        server.on_writable(token(1), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 405"));
        assert!(text.contains("Allow: GET\r\n"));
    }

    #[test]
    fn unmatched_path_yields_404() {
        let mut server: Server = Server::new(ServerConfig::default(), NoHooks);
        server.listen();
        server.accept(token(1), 0);
        server.on_readable(token(1), b"GET /nope HTTP/1.1\r\nHost: x\r\n\r\n", 0);
        let mut out = Vec::new();
        server.on_writable(token(1), &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn oversize_uri_closes_connection_after_response() {
        let mut server: Server = Server::new(ServerConfig::default(), NoHooks);
        server.listen();
        server.accept(token(1), 0);
        let long_path = format!("GET /{} HTTP/1.1\r\nHost: x\r\n\r\n", "a".repeat(2049));
        server.on_readable(token(1), long_path.as_bytes(), 0);
        let mut out = Vec::new();
        server.on_writable(token(1), &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("HTTP/1.1 414"));
        assert!(server.connection(token(1)).unwrap().is_shutting_down());
    }

    #[test]
    fn pipelined_gets_both_get_responses_in_order() {
        let mut server: Server = Server::new(ServerConfig::default(), NoHooks);
        server
            .add_route("GET", "/a", Arc::new(|conn: &mut Connection, _: &Request| conn.send_response_with_body(200, &Headers::new(), b"A")), RouteOptions::new())
            .unwrap();
        server
            .add_route("GET", "/b", Arc::new(|conn: &mut Connection, _: &Request| conn.send_response_with_body(200, &Headers::new(), b"B")), RouteOptions::new())
            .unwrap();
        server.listen();
        server.accept(token(1), 0);
        server.on_readable(token(1), b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n", 0);
        let mut out = Vec::new();
        server.on_writable(token(1), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let a_pos = text.find("\r\n\r\nA").unwrap();
        let b_pos = text.find("\r\n\r\nB").unwrap();
        assert!(a_pos < b_pos);
        assert!(!server.connection(token(1)).unwrap().is_shutting_down());
    }

    #[test]
    fn timeout_sends_408_and_marks_shutting_down() {
        let mut server: Server = Server::new(ServerConfig::default(), NoHooks);
        server.listen();
        server.accept(token(1), 0);
        let to_close = server.on_timer(20_000);
        assert!(to_close.is_empty());
        let mut out = Vec::new();
        server.on_writable(token(1), &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("HTTP/1.1 408"));
        assert!(server.connection(token(1)).unwrap().is_shutting_down());
    }

    #[test]
    fn frozen_routes_reject_late_registration() {
        let mut server: Server = Server::new(ServerConfig::default(), NoHooks);
        server.listen();
        let result = server.add_route("GET", "/late", Arc::new(|_: &mut Connection, _: &Request| {}), RouteOptions::new());
        assert!(result.is_err());
    }
}
