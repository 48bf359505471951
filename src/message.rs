//! The outbound message writer shared by the server's `Response` helpers
//! (spec §4.4) and the client's `send_request` (spec §4.6).
//!
//! This is a state machine over the wire grammar of a single HTTP message:
//! a status/request line, then headers, then a framed body, then done. Each
//! method either writes directly into the connection's write buffer or
//! panics if called out of order — these are programmer errors in the
//! embedder's handler, not something that can arise from untrusted input,
//! so an assertion is the right tool (mirroring the contract of the
//! teacher's own message builder).

use std::io::Write;

use crate::buffer::ByteBuffer;
use crate::version::Version;

quick_error! {
    #[derive(Debug)]
    pub enum HeaderError {
        DuplicateContentLength {
            description("Content-Length is added twice")
        }
        DuplicateTransferEncoding {
            description("Transfer-Encoding is added twice")
        }
        TransferEncodingAfterContentLength {
            description("Transfer-Encoding added when Content-Length is \
                already specified")
        }
        ContentLengthAfterTransferEncoding {
            description("Content-Length added after Transfer-Encoding")
        }
        CantDetermineBodySize {
            description("neither Content-Length nor Transfer-Encoding \
                is present in the headers")
        }
        BodyLengthHeader {
            description("Content-Length and Transfer-Encoding must be set \
                using the specialized methods")
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Body {
    Normal,
    /// HEAD requests, 304 responses: headers say there's a body but none
    /// is written.
    Ignored,
    /// 101, 204 responses: a body is forbidden outright.
    Denied,
}

#[derive(Debug)]
pub enum OutgoingState {
    ResponseStart { version: Version, body: Body, close: bool },
    RequestStart,
    Headers {
        body: Body,
        chunked: bool,
        close: bool,
        request: bool,
        content_length: Option<u64>,
    },
    ZeroBodyMessage,
    IgnoredBody,
    FixedSizeBody(u64),
    ChunkedBody,
    Done,
}

impl OutgoingState {
    pub fn with(self, out_buf: &mut ByteBuffer) -> Outgoing {
        Outgoing(out_buf, self)
    }

    pub fn is_started(&self) -> bool {
        !matches!(*self, OutgoingState::RequestStart | OutgoingState::ResponseStart { .. })
    }
}

/// A message (request or response) in the process of being written to a
/// connection's write buffer.
pub struct Outgoing<'a>(&'a mut ByteBuffer, OutgoingState);

impl<'a> Outgoing<'a> {
    /// Write a status line. Panics if the status line was already written.
    pub fn response_status(&mut self, code: u16, reason: &str) {
        use Body::*;
        use OutgoingState::*;
        match self.1 {
            ResponseStart { version, mut body, close } => {
                write!(self.0, "{} {} {}\r\n", version, code, reason).unwrap();
                if code == 101 || code == 204 {
                    body = Denied;
                } else if body == Normal && code == 304 {
                    body = Ignored;
                }
                self.1 = Headers {
                    body,
                    request: false,
                    content_length: None,
                    chunked: false,
                    close,
                };
            }
            ref state => panic!("response_status() called in state {:?}", state),
        }
    }

    /// Write a request line. Panics if the request line was already written.
    pub fn request_line(&mut self, method: &str, target: &str, version: Version) {
        use OutgoingState::*;
        match self.1 {
            RequestStart => {
                write!(self.0, "{} {} {}\r\n", method, target, version).unwrap();
                self.1 = Headers {
                    body: Body::Normal,
                    request: true,
                    content_length: None,
                    chunked: false,
                    close: false,
                };
            }
            ref state => panic!("request_line() called in state {:?}", state),
        }
    }

    fn write_header(&mut self, name: &str, value: &[u8]) {
        self.0.write_all(name.as_bytes()).unwrap();
        self.0.write_all(b": ").unwrap();
        self.0.write_all(value).unwrap();
        self.0.write_all(b"\r\n").unwrap();
    }

    /// Add a header. `Content-Length` and `Transfer-Encoding` must be set
    /// via [`Outgoing::add_length`]/[`Outgoing::add_chunked`] instead.
    pub fn add_header(&mut self, name: &str, value: &[u8]) -> Result<(), HeaderError> {
        use OutgoingState::*;
        if crate::headers::is_content_length(name) || crate::headers::is_transfer_encoding(name) {
            return Err(HeaderError::BodyLengthHeader);
        }
        match self.1 {
            Headers { .. } => {
                self.write_header(name, value);
                Ok(())
            }
            ref state => panic!("add_header() called in state {:?}", state),
        }
    }

    pub fn add_length(&mut self, n: u64) -> Result<(), HeaderError> {
        use OutgoingState::*;
        match self.1 {
            Headers { content_length: Some(_), .. } => return Err(HeaderError::DuplicateContentLength),
            Headers { chunked: true, .. } => return Err(HeaderError::ContentLengthAfterTransferEncoding),
            Headers { ref mut content_length, .. } => *content_length = Some(n),
            ref state => panic!("add_length() called in state {:?}", state),
        }
        self.write_header("Content-Length", n.to_string().as_bytes());
        Ok(())
    }

    pub fn add_chunked(&mut self) -> Result<(), HeaderError> {
        use OutgoingState::*;
        match self.1 {
            Headers { content_length: Some(_), .. } => return Err(HeaderError::TransferEncodingAfterContentLength),
            Headers { chunked: true, .. } => return Err(HeaderError::DuplicateTransferEncoding),
            Headers { ref mut chunked, .. } => *chunked = true,
            ref state => panic!("add_chunked() called in state {:?}", state),
        }
        self.write_header("Transfer-Encoding", b"chunked");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.1.is_started()
    }

    /// Finalize the header block. Returns `true` if a body is expected.
    pub fn done_headers(&mut self) -> Result<bool, HeaderError> {
        use Body::*;
        use OutgoingState::*;
        if let Headers { close: true, .. } = self.1 {
            self.add_header("Connection", b"close").unwrap();
        }
        let result = match self.1 {
            Headers { body: Ignored, .. } => {
                self.1 = IgnoredBody;
                Ok(false)
            }
            Headers { body: Denied, .. } => {
                self.1 = ZeroBodyMessage;
                Ok(false)
            }
            Headers { body: Normal, content_length: Some(cl), chunked: false, .. } => {
                self.1 = FixedSizeBody(cl);
                Ok(true)
            }
            Headers { body: Normal, content_length: None, chunked: true, .. } => {
                self.1 = ChunkedBody;
                Ok(true)
            }
            Headers { content_length: Some(_), chunked: true, .. } => unreachable!(),
            Headers { body: Normal, content_length: None, chunked: false, request: true, .. } => {
                self.1 = ZeroBodyMessage;
                Ok(false)
            }
            Headers { body: Normal, content_length: None, chunked: false, request: false, .. } => {
                Err(HeaderError::CantDetermineBodySize)
            }
            ref state => panic!("done_headers() called in state {:?}", state),
        };
        self.0.write_all(b"\r\n").unwrap();
        result
    }

    /// Write a chunk of the body, fixed-size or chunked.
    pub fn write_body(&mut self, data: &[u8]) {
        use OutgoingState::*;
        match self.1 {
            ZeroBodyMessage => {
                if !data.is_empty() {
                    panic!("non-empty body for a response where the body is denied (101, 204)");
                }
            }
            FixedSizeBody(ref mut left) => {
                assert!(
                    data.len() as u64 <= *left,
                    "fixed-size body overflow: {} bytes left, got {}",
                    left,
                    data.len()
                );
                self.0.write_all(data).unwrap();
                *left -= data.len() as u64;
            }
            ChunkedBody => {
                write!(self.0, "{:x}\r\n", data.len()).unwrap();
                self.0.write_all(data).unwrap();
                self.0.write_all(b"\r\n").unwrap();
            }
            ref state => panic!("write_body() called in state {:?}", state),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.1, OutgoingState::Done)
    }

    /// Finalize the body. May be called multiple times once done.
    pub fn done(&mut self) {
        use OutgoingState::*;
        match self.1 {
            ChunkedBody => {
                self.0.write_all(b"0\r\n\r\n").unwrap();
                self.1 = Done;
            }
            FixedSizeBody(0) => self.1 = Done,
            ZeroBodyMessage => self.1 = Done,
            IgnoredBody => self.1 = Done,
            Done => {}
            ref state => panic!("done() called in state {:?}", state),
        }
    }

    pub fn state(self) -> OutgoingState {
        self.1
    }

    pub fn decompose(self) -> (&'a mut ByteBuffer, OutgoingState) {
        (self.0, self.1)
    }
}

#[cfg(test)]
mod test {
    use super::{Body, Outgoing, OutgoingState};
    use crate::buffer::ByteBuffer;
    use crate::version::Version;

    fn do_request<F: FnOnce(Outgoing)>(fun: F) -> ByteBuffer {
        let mut buf = ByteBuffer::new();
        fun(OutgoingState::RequestStart.with(&mut buf));
        buf
    }

    fn do_response(version: Version, close: bool, fun: impl FnOnce(Outgoing)) -> ByteBuffer {
        let mut buf = ByteBuffer::new();
        fun(OutgoingState::ResponseStart { version, body: Body::Normal, close }.with(&mut buf));
        buf
    }

    #[test]
    fn minimal_request() {
        let buf = do_request(|mut msg| {
            msg.request_line("GET", "/", Version::Http10);
            msg.done_headers().unwrap();
            msg.done();
        });
        assert_eq!(buf.peek(), b"GET / HTTP/1.0\r\n\r\n");
    }

    #[test]
    fn minimal_response() {
        let buf = do_response(Version::Http10, false, |mut msg| {
            msg.response_status(200, "OK");
            msg.add_length(0).unwrap();
            msg.done_headers().unwrap();
            msg.done();
        });
        assert_eq!(buf.peek(), b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n");
    }

    #[test]
    fn minimal_response11() {
        let buf = do_response(Version::Http11, false, |mut msg| {
            msg.response_status(200, "OK");
            msg.add_length(0).unwrap();
            msg.done_headers().unwrap();
            msg.done();
        });
        assert_eq!(buf.peek(), b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
    }

    #[test]
    fn close_response11() {
        let buf = do_response(Version::Http11, true, |mut msg| {
            msg.response_status(200, "OK");
            msg.add_length(0).unwrap();
            msg.done_headers().unwrap();
            msg.done();
        });
        assert_eq!(
            buf.peek(),
            b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        );
    }

    #[test]
    fn chunked_body_framing() {
        let buf = do_response(Version::Http11, false, |mut msg| {
            msg.response_status(200, "OK");
            msg.add_chunked().unwrap();
            msg.done_headers().unwrap();
            msg.write_body(b"hello");
            msg.write_body(b" world");
            msg.done();
        });
        assert_eq!(
            buf.peek(),
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n"
        );
    }

    #[test]
    fn content_length_and_chunked_are_exclusive() {
        let mut buf = ByteBuffer::new();
        let mut msg = OutgoingState::RequestStart.with(&mut buf);
        msg.request_line("POST", "/", Version::Http11);
        msg.add_length(5).unwrap();
        assert!(matches!(msg.add_chunked(), Err(super::HeaderError::TransferEncodingAfterContentLength)));
    }

    #[test]
    fn head_response_ignores_body() {
        let mut buf = ByteBuffer::new();
        let mut msg = OutgoingState::ResponseStart {
            version: Version::Http11,
            body: Body::Ignored,
            close: false,
        }
        .with(&mut buf);
        msg.response_status(200, "OK");
        assert_eq!(msg.done_headers().unwrap(), false);
        msg.done();
        assert!(msg.is_complete());
    }
}
