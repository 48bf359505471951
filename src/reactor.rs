//! The abstract event loop interface the core runs against (spec §1: "the
//! event loop itself is out of scope"). `Server`/`Client` register file
//! descriptors and timers through this trait and are driven by whatever
//! concrete reactor the embedder wires up (epoll, kqueue, IOCP, or a test
//! double); this crate ships none of those bindings itself.

use std::os::unix::io::RawFd;

use crate::error::ResourceError;

/// Opaque handle to a registered interest (a readable/writable fd, or a
/// pending timer). Reactors are free to use any internal representation;
/// `Server`/`Client` only ever compare and store these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub usize);

/// What the core asks the embedder's event loop to do.
///
/// A concrete implementation backs each method with real `epoll_ctl`/
/// `kqueue` calls (or, in tests, with an in-memory double). Methods take
/// `&self` rather than `&mut self` so a `Reactor` can be shared behind an
/// `Rc`/`Arc` alongside the connections it drives.
pub trait Reactor {
    /// Register interest in `fd` becoming readable. Returns a token used to
    /// unregister or to match a later readiness callback.
    fn register_read(&self, fd: RawFd) -> Result<Token, ResourceError>;

    /// Register interest in `fd` becoming writable.
    fn register_write(&self, fd: RawFd) -> Result<Token, ResourceError>;

    /// Stop tracking `token` (fd interest or pending timer). Idempotent.
    fn unregister(&self, token: Token);

    /// Arrange a wakeup `delay_ms` from now, returned as a token so it can
    /// be cancelled if the connection makes progress first.
    fn schedule_timer(&self, delay_ms: u64) -> Token;

    fn cancel_timer(&self, token: Token);

    /// Monotonic milliseconds, used for `Connection` idle-timeout tracking.
    fn now_ms(&self) -> u64;
}
