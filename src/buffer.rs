//! Framed I/O buffers (§4.1): one growable byte buffer per direction, each
//! with a hard maximum independent of its current capacity, plus a
//! "progress" counter tracking how much of the in-flight frame has already
//! been sent or received.

use bytes::BytesMut;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("message of {requested} bytes exceeds hard maximum of {max} bytes")]
    TooLarge { requested: usize, max: usize },
}

/// A single bounded, growable buffer with a partial-progress counter.
///
/// `progress` always refers to the current frame: it is reset to zero
/// whenever a frame completes (drained to empty for a send buffer, or
/// consumed for a receive buffer).
#[derive(Debug)]
pub struct FrameBuffer {
    data: BytesMut,
    max: usize,
    progress: usize,
}

impl FrameBuffer {
    pub fn new(initial_capacity: usize, max: usize) -> Self {
        FrameBuffer {
            data: BytesMut::with_capacity(initial_capacity),
            max,
            progress: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn progress(&self) -> usize {
        self.progress
    }

    pub fn set_progress(&mut self, progress: usize) {
        self.progress = progress;
    }

    pub fn advance_progress(&mut self, by: usize) {
        self.progress += by;
    }

    /// True iff this buffer has bytes that have not yet all been sent.
    pub fn in_flight(&self) -> bool {
        self.progress < self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn unsent(&self) -> &[u8] {
        &self.data[self.progress..]
    }

    /// Raises the hard maximum. Invariant 7: this only ever moves upward,
    /// once, after a successful init-reply.
    pub fn set_max(&mut self, new_max: usize) {
        self.max = new_max;
    }

    /// Appends bytes, growing the backing allocation automatically up to
    /// `max`. Returns `TooLarge` without mutating the buffer if the append
    /// would exceed the hard maximum.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        let needed = self.data.len() + bytes.len();
        if needed > self.max {
            return Err(BufferError::TooLarge {
                requested: needed,
                max: self.max,
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Replaces the contents wholesale, used when the codec encodes a new
    /// outbound message directly into this buffer.
    pub fn set(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        if bytes.len() > self.max {
            return Err(BufferError::TooLarge {
                requested: bytes.len(),
                max: self.max,
            });
        }
        self.data.clear();
        self.data.extend_from_slice(bytes);
        self.progress = 0;
        Ok(())
    }

    /// Clears the buffer and resets progress. Called after a complete frame
    /// is delivered (receive side) or fully drained (send side, once
    /// `in_flight()` is false).
    pub fn clear(&mut self) {
        self.data.clear();
        self.progress = 0;
    }

    /// Removes and returns the first `len` bytes, leaving any trailing
    /// bytes of the next frame in place (invariant 6: partial frames
    /// persist across event-loop iterations). Receive-side only.
    pub fn take_frame(&mut self, len: usize) -> BytesMut {
        let frame = self.data.split_to(len);
        self.progress = 0;
        frame
    }

    /// Discards the next `count` bytes without decoding them. Used while
    /// skipping an oversized frame.
    pub fn discard(&mut self, count: usize) {
        let _ = self.data.split_to(count.min(self.data.len()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_grows_until_max() {
        let mut buf = FrameBuffer::new(4, 8);
        buf.append(&[0u8; 4]).unwrap();
        buf.append(&[0u8; 4]).unwrap();
        assert_eq!(buf.len(), 8);
        assert!(matches!(
            buf.append(&[0u8; 1]),
            Err(BufferError::TooLarge { .. })
        ));
    }

    #[test]
    fn in_flight_tracks_progress() {
        let mut buf = FrameBuffer::new(16, 16);
        buf.set(b"hello").unwrap();
        assert!(buf.in_flight());
        buf.advance_progress(5);
        assert!(!buf.in_flight());
    }

    #[test]
    fn set_max_only_moves_capacity_ceiling() {
        let mut buf = FrameBuffer::new(4, 4);
        assert!(buf.append(&[0u8; 8]).is_err());
        buf.set_max(8);
        buf.append(&[0u8; 8]).unwrap();
    }
}
