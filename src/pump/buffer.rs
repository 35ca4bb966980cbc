//! Rolling byte buffer owned by the stream pump

use bytes::{Buf, Bytes, BytesMut};

/// Contiguous inbound bytes awaiting a codec.
///
/// Consumed prefixes are split off in one step; the remaining bytes never
/// move until the next append reallocates.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    inner: BytesMut,
}

impl ByteBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { inner: BytesMut::with_capacity(capacity) }
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.inner.extend_from_slice(chunk);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Remove and return the first `n` bytes. `n` is clamped to the length.
    pub fn split_prefix(&mut self, n: usize) -> Bytes {
        let n = n.min(self.inner.len());
        self.inner.split_to(n).freeze()
    }

    /// Drop the first `n` bytes without copying them out.
    pub fn advance(&mut self, n: usize) {
        let n = n.min(self.inner.len());
        self.inner.advance(n);
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}
