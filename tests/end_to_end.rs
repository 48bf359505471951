//! End-to-end scenarios from spec §8, driven through `Server` with a
//! plain `Vec<u8>` standing in for the socket. Most scenarios here never
//! wire a `Reactor` at all (`Server::new`/`Server::accept`), since the
//! scenario under test doesn't care about write-readiness; the ones that
//! do (write-readiness arm/disarm) use `Server::with_reactor`/
//! `Server::accept_fd` against the in-crate `support::TestReactor` double.

mod support;

use std::sync::{Arc, Mutex};

use reactor_http::config::{RouteOptions, ServerConfig};
use reactor_http::connection::Connection;
use reactor_http::headers::Headers;
use reactor_http::parsed::Request;
use reactor_http::reactor::Token;
use reactor_http::server::{NoHooks, Server};

use support::{Event, TestReactor};

fn token() -> Token {
    Token(1)
}

#[test]
fn chunked_upload_reaches_the_handler_as_a_concatenated_body() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let handler_body = Arc::clone(&received);

    let mut server: Server = Server::new(ServerConfig::default(), NoHooks);
    server
        .add_route(
            "POST",
            "/u",
            Arc::new(move |conn: &mut Connection, req: &Request| {
                let body = req.common.body.clone().unwrap_or_default();
                *handler_body.lock().unwrap() = body;
                conn.send_response(200, &Headers::new());
            }),
            RouteOptions::new(),
        )
        .unwrap();
    server.listen();
    server.accept(token(), 0);

    let request = b"POST /u HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
    server.on_readable(token(), request, 0);

    let mut out = Vec::new();
    server.on_writable(token(), &mut out).unwrap();
    assert!(String::from_utf8(out).unwrap().starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(received.lock().unwrap().as_slice(), b"hello world");
}

#[test]
fn keep_alive_pipelining_emits_both_responses_in_order_on_one_connection() {
    let mut server: Server = Server::new(ServerConfig::default(), NoHooks);
    server
        .add_route("GET", "/a", Arc::new(|conn: &mut Connection, _: &Request| conn.send_response_with_body(200, &Headers::new(), b"A")), RouteOptions::new())
        .unwrap();
    server
        .add_route("GET", "/b", Arc::new(|conn: &mut Connection, _: &Request| conn.send_response_with_body(200, &Headers::new(), b"B")), RouteOptions::new())
        .unwrap();
    server.listen();
    server.accept(token(), 0);

    let request = b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n";
    server.on_readable(token(), request, 0);

    let mut out = Vec::new();
    server.on_writable(token(), &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.find("\r\n\r\nA").unwrap() < text.find("\r\n\r\nB").unwrap());
    assert!(!server.connection(token()).unwrap().is_shutting_down());
}

#[test]
fn form_encoded_post_is_decoded_before_the_handler_runs() {
    let decoded_pairs: Arc<Mutex<Option<Vec<(String, String)>>>> = Arc::new(Mutex::new(None));
    let handler_slot = Arc::clone(&decoded_pairs);

    let mut server: Server = Server::new(ServerConfig::default(), NoHooks);
    server
        .add_route(
            "POST",
            "/form",
            Arc::new(move |conn: &mut Connection, req: &Request| {
                let pairs = req
                    .common
                    .decoded_content
                    .as_ref()
                    .and_then(|d| d.downcast_ref::<Vec<(String, String)>>())
                    .cloned();
                *handler_slot.lock().unwrap() = pairs;
                conn.send_response(204, &Headers::new());
            }),
            RouteOptions::new(),
        )
        .unwrap();
    server.listen();
    server.accept(token(), 0);

    let request = b"POST /form HTTP/1.1\r\nHost: x\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 9\r\n\r\nname=jane";
    server.on_readable(token(), request, 0);

    let mut out = Vec::new();
    server.on_writable(token(), &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("HTTP/1.1 204"));
    assert!(!text.contains("Content-Length"));
    assert_eq!(decoded_pairs.lock().unwrap().as_deref(), Some(&[("name".to_string(), "jane".to_string())][..]));
}

#[test]
fn write_readiness_is_armed_while_response_is_queued_and_disarmed_once_drained() {
    let reactor = Arc::new(TestReactor::new());
    let mut server: Server = Server::with_reactor(ServerConfig::default(), NoHooks, reactor.clone());
    server
        .add_route("GET", "/a", Arc::new(|conn: &mut Connection, _: &Request| conn.send_response_with_body(200, &Headers::new(), b"hi")), RouteOptions::new())
        .unwrap();
    server.listen();
    server.accept_fd(token(), 7, 0);

    server.on_readable(token(), b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n", 0);
    assert!(server.connection(token()).unwrap().has_armed_write_interest());
    assert!(reactor.events().contains(&Event::RegisterWrite(7)));

    let mut out = Vec::new();
    server.on_writable(token(), &mut out).unwrap();
    assert!(!server.connection(token()).unwrap().has_armed_write_interest());
    assert_eq!(reactor.register_write_count(), reactor.unregister_count());
}

#[test]
fn protocol_error_response_always_half_closes_despite_keep_alive_request() {
    let mut server: Server = Server::new(ServerConfig::default(), NoHooks);
    server.listen();
    server.accept(token(), 0);

    let request = format!("GET /{} HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n", "a".repeat(2049));
    server.on_readable(token(), request.as_bytes(), 0);

    let mut out = Vec::new();
    server.on_writable(token(), &mut out).unwrap();
    assert!(String::from_utf8(out).unwrap().starts_with("HTTP/1.1 414"));
    assert!(server.connection(token()).unwrap().is_shutting_down());
}
