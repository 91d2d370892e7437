//! Fixed-capacity sample FIFO used for streaming buffers.
//!
//! Both ends are owned by the same component; the ring is never shared across channels.

use ringbuf::{Consumer, Producer, RingBuffer};

pub struct SampleQueue {
    prod: Producer<f32>,
    cons: Consumer<f32>,
}

impl SampleQueue {
    pub fn new(capacity: usize) -> Self {
        let (prod, cons) = RingBuffer::<f32>::new(capacity.max(1)).split();
        Self { prod, cons }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cons.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cons.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.prod.capacity()
    }

    /// Pushes as many samples as fit; returns how many were accepted.
    #[inline]
    pub fn push_slice(&mut self, samples: &[f32]) -> usize {
        self.prod.push_slice(samples)
    }

    #[inline]
    pub fn push(&mut self, sample: f32) -> bool {
        self.prod.push(sample).is_ok()
    }

    #[inline]
    pub fn pop(&mut self) -> Option<f32> {
        self.cons.pop()
    }

    /// Fills `out` from the front of the queue; returns how many samples were written.
    #[inline]
    pub fn pop_into(&mut self, out: &mut [f32]) -> usize {
        self.cons.pop_slice(out)
    }

    pub fn clear(&mut self) {
        while self.cons.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_and_partial_pop() {
        let mut q = SampleQueue::new(8);
        assert_eq!(q.push_slice(&[1.0, 2.0, 3.0]), 3);
        let mut out = [0.0f32; 5];
        assert_eq!(q.pop_into(&mut out), 3);
        assert_eq!(&out[..3], &[1.0, 2.0, 3.0]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_overflow_is_rejected_not_blocking() {
        let mut q = SampleQueue::new(4);
        assert_eq!(q.push_slice(&[0.0; 6]), 4);
        assert!(!q.push(1.0));
        q.clear();
        assert_eq!(q.len(), 0);
    }
}
