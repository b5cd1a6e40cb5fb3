//! Bounded scratch buffer used by [`crate::copy_up::CopyUpEngine`] while
//! streaming data between sources (spec §4.4). Ported from the teacher's
//! `allocator::buffer::Buffer`, resized here for copy-up chunk transfers
//! (64 KiB typical, up to 1 MiB) instead of RPC read-ahead.

use std::num::NonZeroUsize;

/// Default chunk size used by [`crate::copy_up::CopyUpEngine`] when the
/// caller does not request a specific buffer size.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Upper bound a single [`Buffer`] is allowed to grow to.
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// A heap-allocated, zero-initialized byte buffer with a fixed size.
pub struct Buffer(Box<[u8]>);

impl Buffer {
    /// Allocates a zero-initialized buffer of the given size.
    pub fn new(size: NonZeroUsize) -> Self {
        Self(vec![0; size.get()].into_boxed_slice())
    }

    /// Allocates a buffer sized for one copy-up chunk, clamped to
    /// [`MAX_CHUNK_SIZE`].
    pub fn for_chunk_size(requested: usize) -> Self {
        let clamped = requested.clamp(1, MAX_CHUNK_SIZE);
        Self::new(NonZeroUsize::new(clamped).expect("clamp floor is 1"))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::ops::Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl std::ops::DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chunk_is_zeroed() {
        let buf = Buffer::for_chunk_size(DEFAULT_CHUNK_SIZE);
        assert_eq!(buf.len(), DEFAULT_CHUNK_SIZE);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn oversized_request_is_clamped() {
        let buf = Buffer::for_chunk_size(MAX_CHUNK_SIZE * 4);
        assert_eq!(buf.len(), MAX_CHUNK_SIZE);
    }
}
