//! Fixed-capacity reassembly buffer.
//!
//! Holds the raw payload bytes of a frame that arrived split across
//! several socket reads. The buffer never grows: when an append does not
//! fit after compaction it fails with [`WsError::CapacityExceeded`], which
//! bounds the memory a single peer can pin.
//!
//! ```text
//!  0        read           write          capacity
//!  ├─────────┼───────────────┼───────────────┤
//!  consumed     unread bytes     free tail
//! ```

use crate::error::{WsError, WsResult};

/// Fixed-capacity byte buffer with read/write cursors.
///
/// The unread region is `[read, write)`. Appending shifts the unread
/// region to offset 0 when the free tail is too short.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: Box<[u8]>,
    read: usize,
    write: usize,
}

impl FrameBuffer {
    /// Create an empty buffer with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
        }
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.write - self.read
    }

    /// Whether the buffer holds no unread bytes.
    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    /// Bytes that can still be appended, counting space reclaimable by compaction.
    pub fn remaining_capacity(&self) -> usize {
        self.capacity() - self.len()
    }

    /// The unread region.
    pub fn unread(&self) -> &[u8] {
        &self.buf[self.read..self.write]
    }

    /// Append bytes after the unread region.
    ///
    /// Compacts first if the free tail is too short. Fails without
    /// modifying the buffer if the bytes do not fit at all.
    pub fn append(&mut self, data: &[u8]) -> WsResult<()> {
        if data.len() > self.remaining_capacity() {
            return Err(WsError::capacity_exceeded(
                data.len(),
                self.remaining_capacity(),
            ));
        }
        if self.capacity() - self.write < data.len() {
            self.compact();
        }
        self.buf[self.write..self.write + data.len()].copy_from_slice(data);
        self.write += data.len();
        Ok(())
    }

    /// Mark `n` unread bytes as consumed.
    ///
    /// Consuming more than [`len`](Self::len) clamps to the unread length.
    pub fn consume(&mut self, n: usize) {
        self.read += n.min(self.len());
        if self.read == self.write {
            self.clear();
        }
    }

    /// Shift the unread region to offset 0.
    pub fn compact(&mut self) {
        if self.read == 0 {
            return;
        }
        self.buf.copy_within(self.read..self.write, 0);
        self.write -= self.read;
        self.read = 0;
    }

    /// Drop all unread bytes and reset both cursors.
    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
    }
}
