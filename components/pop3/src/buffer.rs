//! Fixed-capacity ring buffer with separate read/write cursors (§3, §4.2).
//!
//! The session FSM never grows a buffer to absorb backpressure: when a
//! sink can't keep up, the corresponding interest is simply left
//! unarmed until it drains. That discipline is expressed here by
//! `write_view` returning an empty slice once the buffer is full of
//! unread data, and by `compact` being the only way more write room
//! appears.

/// A fixed backing array with `read <= write <= capacity`.
///
/// This is the "linear discipline" mentioned in §4.2: no wraparound.
/// Once bytes are produced faster than they're consumed the buffer
/// fills up and `write_view` reports no room; the caller is expected to
/// `compact` after draining reads, which slides unread bytes back to
/// offset zero.
pub struct Buffer {
    data: Vec<u8>,
    read: usize,
    write: usize,
}

impl Buffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Buffer {
            data: vec![0u8; capacity],
            read: 0,
            write: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Contiguous region available for writing. Empty only when the
    /// buffer is full of unread data (invariant (b) of §4.2).
    pub fn write_view(&mut self) -> &mut [u8] {
        &mut self.data[self.write..]
    }

    pub fn advance_write(&mut self, n: usize) {
        assert!(self.write + n <= self.data.len(), "write overrun");
        self.write += n;
    }

    /// Contiguous region available for reading; always data that was
    /// previously written and not yet advanced past (invariant (a)).
    pub fn read_view(&self) -> &[u8] {
        &self.data[self.read..self.write]
    }

    pub fn advance_read(&mut self, n: usize) {
        assert!(self.read + n <= self.write, "read overrun");
        self.read += n;
    }

    pub fn can_read(&self) -> bool {
        self.read < self.write
    }

    pub fn can_write(&self) -> bool {
        self.write < self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    /// Slides unread bytes down to offset zero, reclaiming the space
    /// already-read bytes occupied. Called whenever the write cursor
    /// would otherwise hit capacity with data still to drain.
    pub fn compact(&mut self) {
        if self.read == 0 {
            return;
        }
        self.data.copy_within(self.read..self.write, 0);
        self.write -= self.read;
        self.read = 0;
    }

    /// Resets to the empty state, discarding any unread data.
    pub fn reset(&mut self) {
        self.read = 0;
        self.write = 0;
    }

    /// Appends `bytes`, compacting first if there isn't room. Returns
    /// `false` (and writes nothing) if `bytes` still doesn't fit after
    /// compaction — the fixed-capacity backpressure case.
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        if self.write + bytes.len() > self.data.len() {
            self.compact();
        }
        if self.write + bytes.len() > self.data.len() {
            return false;
        }
        self.data[self.write..self.write + bytes.len()].copy_from_slice(bytes);
        self.write += bytes.len();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut buf = Buffer::with_capacity(16);
        assert!(buf.push(b"hello"));
        assert_eq!(buf.read_view(), b"hello");
        buf.advance_read(5);
        assert!(buf.is_empty());
    }

    #[test]
    fn write_view_empty_when_full_of_unread_data() {
        let mut buf = Buffer::with_capacity(4);
        assert!(buf.push(b"abcd"));
        assert!(buf.write_view().is_empty());
    }

    #[test]
    fn compact_reclaims_space_after_partial_read() {
        let mut buf = Buffer::with_capacity(8);
        assert!(buf.push(b"abcdefgh"));
        buf.advance_read(4);
        assert!(!buf.push(b"xx")); // still full until compacted
        buf.compact();
        assert!(buf.push(b"xx"));
        assert_eq!(buf.read_view(), b"efghxx");
    }

    #[test]
    fn push_fails_cleanly_when_data_cannot_fit_even_after_compaction() {
        let mut buf = Buffer::with_capacity(4);
        assert!(buf.push(b"ab"));
        assert!(!buf.push(b"abc"));
        // Original contents must be untouched by the failed push.
        assert_eq!(buf.read_view(), b"ab");
    }
}
