//! Growable FIFO of bytes used by the parser and the outbound writer.
//!
//! Invariants: `length() <= capacity()`; bytes already consumed are never
//! observable again; growth is amortized O(1) (doubling); the wasted prefix
//! left behind by `advance` is compacted away once it exceeds half of the
//! current capacity.

use std::io::{self, Read, Write};

/// A growable, append-at-back / consume-from-front byte buffer.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    data: Vec<u8>,
    start: usize,
}

impl ByteBuffer {
    pub fn new() -> ByteBuffer {
        ByteBuffer { data: Vec::new(), start: 0 }
    }

    pub fn with_capacity(cap: usize) -> ByteBuffer {
        ByteBuffer { data: Vec::with_capacity(cap), start: 0 }
    }

    /// Bytes currently available to read.
    #[inline]
    pub fn length(&self) -> usize {
        self.data.len() - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// View of the unconsumed bytes.
    #[inline]
    pub fn peek(&self) -> &[u8] {
        &self.data[self.start..]
    }

    /// Append bytes to the back of the buffer. Records `previous_length`
    /// internally so a caller who appended and then failed can roll back
    /// with [`ByteBuffer::truncate`].
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Length before the most recent append, for rollback on partial writes.
    pub fn previous_length(&self, just_appended: usize) -> usize {
        self.length() - just_appended
    }

    /// Drop the oldest `n` bytes. Panics if `n > length()`.
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.length(), "advance past end of buffer");
        self.start += n;
        if self.start > self.data.len() / 2 && self.start > 4096 {
            self.compact();
        }
    }

    /// Discard all buffered bytes.
    pub fn clear(&mut self) {
        self.data.clear();
        self.start = 0;
    }

    /// Roll back to a previously observed logical length (used by writers
    /// that appended speculatively and must undo a partial append).
    pub fn truncate(&mut self, old_len: usize) {
        self.data.truncate(self.start + old_len);
    }

    /// Shift the unconsumed bytes down to offset zero, reclaiming the
    /// wasted prefix.
    pub fn compact(&mut self) {
        if self.start == 0 {
            return;
        }
        self.data.drain(0..self.start);
        self.start = 0;
    }

    /// Read from a reader into the buffer, growing as needed. Returns the
    /// number of bytes read (0 means EOF).
    pub fn read_from<R: Read>(&mut self, r: &mut R, max: usize) -> io::Result<usize> {
        self.compact();
        let old_len = self.data.len();
        let want = max.max(4096);
        self.data.resize(old_len + want, 0);
        match r.read(&mut self.data[old_len..]) {
            Ok(n) => {
                self.data.truncate(old_len + n);
                Ok(n)
            }
            Err(e) => {
                self.data.truncate(old_len);
                Err(e)
            }
        }
    }

    /// Write as much of the buffered data as the writer accepts, consuming
    /// what was written. Returns the number of bytes written.
    pub fn write_to<W: Write>(&mut self, w: &mut W) -> io::Result<usize> {
        if self.is_empty() {
            return Ok(0);
        }
        let n = w.write(self.peek())?;
        self.advance(n);
        Ok(n)
    }
}

impl Write for ByteBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::ByteBuffer;

    #[test]
    fn append_and_peek() {
        let mut buf = ByteBuffer::new();
        buf.append(b"hello");
        assert_eq!(buf.peek(), b"hello");
        assert_eq!(buf.length(), 5);
    }

    #[test]
    fn advance_hides_consumed_bytes() {
        let mut buf = ByteBuffer::new();
        buf.append(b"hello world");
        buf.advance(6);
        assert_eq!(buf.peek(), b"world");
        assert_eq!(buf.length(), 5);
    }

    #[test]
    fn compact_reclaims_prefix() {
        let mut buf = ByteBuffer::new();
        for _ in 0..20 {
            buf.append(&[0u8; 1024]);
        }
        buf.advance(19 * 1024 + 600);
        let before = buf.peek().to_vec();
        buf.compact();
        assert_eq!(buf.peek(), &before[..]);
        assert_eq!(buf.start, 0);
    }

    #[test]
    fn clear_empties_buffer() {
        let mut buf = ByteBuffer::new();
        buf.append(b"data");
        buf.clear();
        assert_eq!(buf.length(), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn write_to_drains() {
        let mut buf = ByteBuffer::new();
        buf.append(b"abcdef");
        let mut out = Vec::new();
        let n = buf.write_to(&mut out).unwrap();
        assert_eq!(n, 6);
        assert_eq!(out, b"abcdef");
        assert!(buf.is_empty());
    }
}
