//! An embeddable HTTP/1.x server and client core: an incremental message
//! parser, a per-connection state machine, and pattern-based route
//! dispatch, all driven through an abstract [`reactor::Reactor`] interface
//! rather than any particular event loop.

#[macro_use]
extern crate quick_error;

pub mod buffer;
pub mod client;
pub mod config;
pub mod connection;
pub mod content_type;
pub mod decoder;
pub mod error;
pub mod headers;
pub mod message;
pub mod parsed;
pub mod parser;
pub mod range;
pub mod reactor;
pub mod route;
pub mod server;
pub mod status;
pub mod uri;
pub mod version;
