//! Chunk descriptors over the input signal.

/// One study or process call's slice of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub offset: usize,
    pub len: usize,
    /// Set on the chunk whose end reaches the total length.
    pub is_final: bool,
}

impl Chunk {
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Fixed-size chunks covering `0..total` in order; the last one holds the
/// remainder.
#[derive(Debug, Clone)]
pub struct Chunks {
    total: usize,
    size: usize,
    offset: usize,
}

impl Chunks {
    /// `size` must be non-zero; a zero size yields no chunks.
    pub fn new(total: usize, size: usize) -> Self {
        Self {
            total,
            size,
            offset: if size == 0 { total } else { 0 },
        }
    }
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.offset >= self.total {
            return None;
        }
        let len = self.size.min(self.total - self.offset);
        let chunk = Chunk {
            offset: self.offset,
            len,
            is_final: self.offset + len == self.total,
        };
        self.offset += len;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = match self.size {
            0 => 0,
            size => (self.total - self.offset).div_ceil(size),
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks {}
