//! The parsed-message data model: a tagged union over request/response,
//! sharing the fields spec §3 names.

use std::collections::HashMap;

use crate::content_type::ContentType;
use crate::decoder::DecodedContent;
use crate::headers::Headers;
use crate::range::Ranges;
use crate::uri::Uri;
use crate::version::Version;

/// Bitset of `Connection` header tokens observed on a message.
///
/// When a single message sets both tokens, CLOSE wins (spec §9, decided in
/// DESIGN.md).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub keep_alive: bool,
    pub close: bool,
}

impl ConnectionOptions {
    pub fn from_headers(headers: &Headers) -> ConnectionOptions {
        ConnectionOptions {
            keep_alive: headers.has_token("Connection", "keep-alive"),
            close: headers.has_token("Connection", "close"),
        }
    }

    /// CLOSE wins when both tokens are present on the same message.
    pub fn effective_close(&self) -> bool {
        self.close
    }
}

/// Fields shared by requests and responses.
#[derive(Debug)]
pub struct Common {
    pub version: Version,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
    pub is_complete: bool,
    pub is_aborted: bool,
    pub content_length: Option<u64>,
    pub is_body_chunked: bool,
    pub content_type: Option<ContentType>,
    pub decoded_content: Option<DecodedContent>,
    pub connection_options: ConnectionOptions,
}

impl Common {
    pub(crate) fn new(version: Version, headers: Headers) -> Common {
        let connection_options = ConnectionOptions::from_headers(&headers);
        Common {
            version,
            headers,
            body: None,
            is_complete: false,
            is_aborted: false,
            content_length: None,
            is_body_chunked: false,
            content_type: None,
            decoded_content: None,
            connection_options,
        }
    }
}

#[derive(Debug)]
pub struct Request {
    pub common: Common,
    pub method: String,
    pub raw_uri: String,
    pub uri: Uri,
    pub named_parameters: HashMap<String, String>,
    pub expects_100_continue: bool,
    pub ranges: Option<Ranges>,
}

#[derive(Debug)]
pub struct Response {
    pub common: Common,
    pub status_code: u16,
    pub reason_phrase: String,
}

#[derive(Debug)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn common(&self) -> &Common {
        match self {
            Message::Request(r) => &r.common,
            Message::Response(r) => &r.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut Common {
        match self {
            Message::Request(r) => &mut r.common,
            Message::Response(r) => &mut r.common,
        }
    }

    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Message::Request(r) => Some(r),
            Message::Response(_) => None,
        }
    }

    pub fn as_request_mut(&mut self) -> Option<&mut Request> {
        match self {
            Message::Request(r) => Some(r),
            Message::Response(_) => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Response(r) => Some(r),
            Message::Request(_) => None,
        }
    }
}
