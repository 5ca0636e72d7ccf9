/// A contiguous FIFO byte buffer: a read cursor and a write cursor into one
/// growable backing allocation, compacted back to the front when the read
/// cursor has eaten into enough leading space to make room without growing.
///
/// Used as the primary per-channel read/write buffer — see
/// `crate::channel`.
pub struct LinearBuffer {
    buf: Vec<u8>,
    r: usize,
    w: usize,
}

impl LinearBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            r: 0,
            w: 0,
        }
    }

    /// Appends `src` to the end of the buffer, compacting and growing as
    /// needed. Only fails by panicking on allocation failure, which is fatal
    /// to the buffer (and, in practice, the process).
    pub fn append(&mut self, src: &[u8]) {
        if src.is_empty() {
            return;
        }
        if self.w + src.len() > self.buf.len() {
            self.compact();
        }
        if self.w + src.len() > self.buf.len() {
            self.grow(src.len());
        }
        self.buf[self.w..self.w + src.len()].copy_from_slice(src);
        self.w += src.len();
    }

    /// Copies up to `dst.len()` unread bytes into `dst`, without consuming
    /// them. Returns the number of bytes copied.
    pub fn peek(&self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.used());
        dst[..n].copy_from_slice(&self.buf[self.r..self.r + n]);
        n
    }

    /// Advances the read cursor by up to `n` bytes. Returns the number of
    /// bytes actually consumed.
    pub fn consume(&mut self, n: usize) -> usize {
        let n = n.min(self.used());
        self.r += n;
        n
    }

    /// The unread bytes as a single contiguous slice.
    pub fn data(&self) -> &[u8] {
        &self.buf[self.r..self.w]
    }

    /// The current write-cursor position, meant to be passed back to
    /// [`LinearBuffer::truncate`] to roll back a failed enqueue.
    pub fn mark(&self) -> usize {
        self.w
    }

    /// Rewinds the write cursor to a previously taken `mark`, discarding
    /// anything appended since.
    pub fn truncate(&mut self, mark: usize) {
        self.w = mark;
    }

    pub fn used(&self) -> usize {
        self.w - self.r
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn free(&self) -> usize {
        self.buf.len() - self.w
    }

    fn compact(&mut self) {
        if self.r == 0 {
            return;
        }
        self.buf.copy_within(self.r..self.w, 0);
        self.w -= self.r;
        self.r = 0;
    }

    fn grow(&mut self, additional: usize) {
        let need = self.used() + additional;
        let mut new_cap = self.buf.len().max(1);
        while new_cap < need {
            new_cap *= 2;
        }
        self.buf.resize(new_cap, 0);
    }
}
