//! Bounded FIFO byte buffer.
//!
//! Both directions of a connection stage bytes here: the send side between
//! `write` and segmentation, the receive side between in-order delivery and
//! `read`.  Storage is a `VecDeque`, so memory grows with what is actually
//! buffered rather than with the configured capacity.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct RingBuffer {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes that can still be written without exceeding capacity.
    pub fn free(&self) -> usize {
        self.capacity.saturating_sub(self.buf.len())
    }

    /// Append as much of `data` as fits.  Returns the number of bytes taken.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.free());
        self.buf.extend(&data[..n]);
        n
    }

    /// Copy up to `out.len()` bytes out of the buffer, consuming them.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.buf.len());
        for (dst, src) in out[..n].iter_mut().zip(self.buf.drain(..n)) {
            *dst = src;
        }
        n
    }

    /// Remove and return up to `max` bytes from the front.
    pub fn take(&mut self, max: usize) -> Vec<u8> {
        let n = max.min(self.buf.len());
        self.buf.drain(..n).collect()
    }

    /// Put bytes back at the front, ahead of everything still buffered.
    ///
    /// Used to return bytes whose transmission failed.  Capacity is not
    /// enforced: the bytes were already accounted for once.
    pub fn unread(&mut self, data: &[u8]) {
        for &b in data.iter().rev() {
            self.buf.push_front(b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_respects_capacity() {
        let mut rb = RingBuffer::new(4);
        assert_eq!(rb.write(b"abcdef"), 4);
        assert_eq!(rb.free(), 0);
        assert_eq!(rb.write(b"x"), 0);
    }

    #[test]
    fn read_is_fifo() {
        let mut rb = RingBuffer::new(16);
        rb.write(b"hello ");
        rb.write(b"world");
        let mut out = [0u8; 5];
        assert_eq!(rb.read(&mut out), 5);
        assert_eq!(&out, b"hello");
        assert_eq!(rb.take(100), b" world");
        assert!(rb.is_empty());
    }

    #[test]
    fn read_partial_when_buffer_smaller_than_out() {
        let mut rb = RingBuffer::new(16);
        rb.write(b"hi");
        let mut out = [0u8; 10];
        assert_eq!(rb.read(&mut out), 2);
        assert_eq!(&out[..2], b"hi");
    }

    #[test]
    fn unread_restores_order() {
        let mut rb = RingBuffer::new(8);
        rb.write(b"abcdef");
        let head = rb.take(3);
        rb.write(b"gh");
        rb.unread(&head);
        assert_eq!(rb.take(100), b"abcdefgh");
    }

    #[test]
    fn unread_may_exceed_capacity() {
        let mut rb = RingBuffer::new(4);
        rb.write(b"abcd");
        let head = rb.take(2);
        rb.write(b"ef");
        rb.unread(&head);
        assert_eq!(rb.len(), 6);
        assert_eq!(rb.free(), 0);
    }
}
