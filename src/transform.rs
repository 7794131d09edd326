use std::fmt;
use std::sync::Arc;

/// A per-direction byte transformer.
///
/// Installed with [`Proxy::set_i2o`] / [`Proxy::set_o2i`] and invoked on the
/// worker thread for every chunk received on that direction, after the
/// receive and before the chunk is staged for the peer. Nothing else runs on
/// the worker while a transformer runs. Chunk boundaries follow the receive
/// calls, not any protocol framing: `n` bytes go in, whatever the
/// transformer leaves behind goes out.
///
/// The slot itself lives behind the proxy mutex; replacing it is atomic and
/// the worker picks the replacement up no later than its next receive on
/// that direction.
///
/// [`Proxy::set_i2o`]: struct.Proxy.html#method.set_i2o
/// [`Proxy::set_o2i`]: struct.Proxy.html#method.set_o2i
pub type Transform = Arc<dyn Fn(&mut TransformBuf) + Send + Sync>;

/// One received chunk, handed mutably to a transformer.
///
/// The view covers the free tail of the worker's staging buffer: bytes
/// `..len()` are the chunk as received, the rest up to `capacity()` is room
/// the transformer may grow into. A transformer can shrink the chunk with
/// [`truncate`], rewrite bytes through [`data_mut`], or substitute its own
/// bytes wholesale with [`replace`]. The one hard rule: the resulting length
/// can never exceed `capacity()`; violations panic rather than corrupt the
/// staging buffer.
///
/// [`truncate`]: #method.truncate
/// [`data_mut`]: #method.data_mut
/// [`replace`]: #method.replace
pub struct TransformBuf<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> TransformBuf<'a> {
    pub(crate) fn new(buf: &'a mut [u8], len: usize) -> TransformBuf<'a> {
        assert!(len <= buf.len());
        TransformBuf { buf: buf, len: len }
    }

    /// The chunk as it currently stands.
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Mutable access to the chunk for in-place rewrites.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }

    /// Current chunk length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the chunk has been emptied; the worker then stages nothing.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Upper bound for the chunk length: the staging buffer space available
    /// to this direction right now.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Shrinks the chunk to its first `len` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the current chunk length.
    pub fn truncate(&mut self, len: usize) {
        assert!(len <= self.len, "truncate cannot grow a chunk");
        self.len = len;
    }

    /// Replaces the chunk with a copy of `src`.
    ///
    /// # Panics
    ///
    /// Panics if `src` does not fit the remaining staging capacity.
    pub fn replace(&mut self, src: &[u8]) {
        assert!(
            src.len() <= self.buf.len(),
            "replacement chunk exceeds the staging buffer's free space"
        );
        self.buf[..src.len()].copy_from_slice(src);
        self.len = src.len();
    }
}

impl<'a> fmt::Debug for TransformBuf<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TransformBuf")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}
