//! In-memory `Reactor` test double (see SPEC_FULL.md §6 ambient stack):
//! records every `register_write`/`unregister` call so a test can assert
//! write-readiness is armed and disarmed exactly when the write stream
//! transitions between empty and non-empty.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use reactor_http::error::ResourceError;
use reactor_http::reactor::{Reactor, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    RegisterRead(RawFd),
    RegisterWrite(RawFd),
    Unregister(Token),
}

#[derive(Default)]
pub struct TestReactor {
    next_token: AtomicUsize,
    events: Mutex<Vec<Event>>,
}

impl TestReactor {
    pub fn new() -> TestReactor {
        TestReactor::default()
    }

    fn next(&self) -> Token {
        Token(self.next_token.fetch_add(1, Ordering::SeqCst))
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn register_write_count(&self) -> usize {
        self.events.lock().unwrap().iter().filter(|e| matches!(e, Event::RegisterWrite(_))).count()
    }

    pub fn unregister_count(&self) -> usize {
        self.events.lock().unwrap().iter().filter(|e| matches!(e, Event::Unregister(_))).count()
    }
}

impl Reactor for TestReactor {
    fn register_read(&self, fd: RawFd) -> Result<Token, ResourceError> {
        let token = self.next();
        self.events.lock().unwrap().push(Event::RegisterRead(fd));
        Ok(token)
    }

    fn register_write(&self, fd: RawFd) -> Result<Token, ResourceError> {
        let token = self.next();
        self.events.lock().unwrap().push(Event::RegisterWrite(fd));
        Ok(token)
    }

    fn unregister(&self, token: Token) {
        self.events.lock().unwrap().push(Event::Unregister(token));
    }

    fn schedule_timer(&self, _delay_ms: u64) -> Token {
        self.next()
    }

    fn cancel_timer(&self, _token: Token) {}

    fn now_ms(&self) -> u64 {
        0
    }
}
