//! Fixed-capacity circular buffer holding the detector's analysis window.
//!
//! New samples overwrite the oldest once the buffer is full, so the most
//! recent `capacity` samples are always available for the loudness measure.
//!
//! # Example
//!
//! ```rust
//! use reactive_avatar::audio::RingBuffer;
//!
//! let mut buf = RingBuffer::new(4);
//! buf.push_slice(&[1.0, 2.0, 3.0, 4.0, 5.0]);
//! assert_eq!(buf.snapshot(), vec![2.0, 3.0, 4.0, 5.0]);
//! assert_eq!(buf.len(), 4); // snapshot does not consume
//! ```

/// A fixed-capacity circular buffer.
///
/// The buffer never allocates beyond its initial capacity.
pub struct RingBuffer<T> {
    buf: Vec<T>,
    capacity: usize,
    /// Next write position (wraps around `capacity`).
    write_pos: usize,
    /// Valid samples stored (≤ `capacity`).
    len: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be > 0");
        Self {
            buf: vec![T::default(); capacity],
            capacity,
            write_pos: 0,
            len: 0,
        }
    }

    /// Append `data`, overwriting the oldest samples on overflow.
    pub fn push_slice(&mut self, data: &[T]) {
        // Only the tail can survive when `data` is longer than the buffer.
        let data = if data.len() > self.capacity {
            &data[data.len() - self.capacity..]
        } else {
            data
        };
        for &item in data {
            self.buf[self.write_pos] = item;
            self.write_pos = (self.write_pos + 1) % self.capacity;
            if self.len < self.capacity {
                self.len += 1;
            }
        }
    }

    /// Iterate stored samples oldest-first without consuming them.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        let read_pos = if self.len < self.capacity {
            0
        } else {
            self.write_pos
        };
        (0..self.len).map(move |i| self.buf[(read_pos + i) % self.capacity])
    }

    /// Stored samples in chronological order.
    pub fn snapshot(&self) -> Vec<T> {
        self.iter().collect()
    }

    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_within_capacity() {
        let mut buf = RingBuffer::new(8);
        buf.push_slice(&[1.0_f32, 2.0, 3.0]);
        assert_eq!(buf.len(), 3);
        assert!(!buf.is_full());
        assert_eq!(buf.snapshot(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn overflow_keeps_newest_in_order() {
        let mut buf = RingBuffer::new(4);
        buf.push_slice(&[1.0_f32, 2.0, 3.0]);
        buf.push_slice(&[4.0, 5.0, 6.0]);
        assert!(buf.is_full());
        assert_eq!(buf.snapshot(), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn oversized_push_keeps_tail() {
        let mut buf = RingBuffer::new(3);
        buf.push_slice(&[1.0_f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(buf.snapshot(), vec![5.0, 6.0, 7.0]);
    }

    #[test]
    fn snapshot_does_not_consume() {
        let mut buf = RingBuffer::new(4);
        buf.push_slice(&[1.0_f32, 2.0]);
        let _ = buf.snapshot();
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.iter().count(), 2);
    }

    #[test]
    fn clear_resets_state() {
        let mut buf = RingBuffer::new(4);
        buf.push_slice(&[1.0_f32, 2.0, 3.0, 4.0, 5.0]);
        buf.clear();
        assert!(buf.is_empty());

        buf.push_slice(&[9.0_f32]);
        assert_eq!(buf.snapshot(), vec![9.0]);
    }

    #[test]
    #[should_panic(expected = "RingBuffer capacity must be > 0")]
    fn zero_capacity_panics() {
        let _buf: RingBuffer<f32> = RingBuffer::new(0);
    }
}
