/// A circular FIFO byte buffer: same external contract as [`super::LinearBuffer`]
/// (`append`/`peek`/`consume`/`used`/`capacity`/`free`), except storage wraps
/// around the end of the backing allocation instead of compacting. Growth
/// doubles capacity and, only when the logical region straddles the old end
/// of the buffer, relocates the wrapped head segment so growth never leaves
/// a torn layout behind.
///
/// Kept as an alternative backing store to `LinearBuffer`; channels in this
/// crate use `LinearBuffer` as their read/write buffer (see `crate::channel`).
pub struct RingBuffer {
    buf: Vec<u8>,
    r: usize,
    w: usize,
    used: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            r: 0,
            w: 0,
            used: 0,
        }
    }

    pub fn append(&mut self, src: &[u8]) {
        if src.is_empty() {
            return;
        }
        if src.len() > self.free() {
            self.grow(src.len() - self.free());
        }
        let cap = self.buf.len();
        let first = (cap - self.w).min(src.len());
        self.buf[self.w..self.w + first].copy_from_slice(&src[..first]);
        if src.len() > first {
            self.buf[..src.len() - first].copy_from_slice(&src[first..]);
        }
        self.w = (self.w + src.len()) % cap;
        self.used += src.len();
    }

    /// Copies up to `dst.len()` unread bytes into `dst`, assembling from up
    /// to two segments when the unread region wraps. Does not consume.
    pub fn peek(&self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.used);
        let cap = self.buf.len();
        let first = (cap - self.r).min(n);
        dst[..first].copy_from_slice(&self.buf[self.r..self.r + first]);
        if n > first {
            dst[first..n].copy_from_slice(&self.buf[..n - first]);
        }
        n
    }

    pub fn consume(&mut self, n: usize) -> usize {
        let n = n.min(self.used);
        let cap = self.buf.len();
        self.r = (self.r + n) % cap;
        self.used -= n;
        n
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn free(&self) -> usize {
        self.buf.len() - self.used
    }

    fn grow(&mut self, additional: usize) {
        let old_cap = self.buf.len();
        let need = old_cap + additional;
        let mut new_cap = old_cap.max(1);
        while new_cap < need {
            new_cap *= 2;
        }
        // Straddles the old boundary: tail run [r, old_cap) plus head run
        // [0, w). Relocate the head run past the old boundary so the whole
        // region becomes one contiguous [r, old_cap + w) span; the extra
        // capacity appended at the end absorbs it. When the region doesn't
        // straddle (w >= r), the new space lands right after it and nothing
        // needs to move.
        let straddles = self.used > 0 && self.w <= self.r;
        let head_len = self.w;
        self.buf.resize(new_cap, 0);
        if straddles {
            let (head, tail) = self.buf.split_at_mut(old_cap);
            tail[..head_len].copy_from_slice(&head[..head_len]);
            self.w = old_cap + head_len;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_peek_consume_round_trip_without_wrap() {
        let mut b = RingBuffer::new(8);
        b.append(b"abcd");
        let mut out = [0u8; 4];
        assert_eq!(b.peek(&mut out), 4);
        assert_eq!(&out, b"abcd");
        assert_eq!(b.consume(4), 4);
        assert_eq!(b.used(), 0);
    }

    #[test]
    fn append_that_straddles_the_boundary_round_trips_intact() {
        let mut b = RingBuffer::new(8);
        b.append(b"123456");
        b.consume(4);
        b.append(b"abcdef");
        assert_eq!(b.used(), 8);
        let mut out = [0u8; 8];
        assert_eq!(b.peek(&mut out), 8);
        assert_eq!(&out, b"56abcdef");
    }

    #[test]
    fn growth_when_not_wrapped_needs_no_relocation() {
        let mut b = RingBuffer::new(4);
        b.append(b"ab");
        b.append(b"cdefgh");
        assert_eq!(b.capacity(), 16);
        let mut out = [0u8; 8];
        b.peek(&mut out);
        assert_eq!(&out, b"abcdefgh");
    }

    #[test]
    fn growth_when_wrapped_relocates_the_head_segment() {
        let mut b = RingBuffer::new(8);
        b.append(b"123456");
        b.consume(4);
        b.append(b"ab"); // w wraps: tail [4,8) = "56", head [0,2) = "ab"
        assert_eq!(b.used(), 4);
        b.append(b"this needs more room than is left");
        let mut out = vec![0u8; b.used()];
        b.peek(&mut out);
        assert_eq!(&out, b"56abthis needs more room than is left");
    }
}
