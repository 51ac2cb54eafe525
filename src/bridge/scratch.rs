use crate::constants::SCRATCH_CAPACITY;

/// Fixed byte buffer reused every period
pub struct ScratchBuffer {
    buf: Box<[u8]>,
}

impl ScratchBuffer {
    pub fn new() -> Self {
        Self {
            buf: vec![0u8; SCRATCH_CAPACITY].into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// The first `len` bytes. Asking for more than the capacity is a bug.
    pub fn prefix_mut(&mut self, len: usize) -> &mut [u8] {
        assert!(
            len <= self.buf.len(),
            "period of {} bytes exceeds scratch capacity {}",
            len,
            self.buf.len()
        );
        &mut self.buf[..len]
    }
}

impl Default for ScratchBuffer {
    fn default() -> Self {
        Self::new()
    }
}
