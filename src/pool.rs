//! Fixed pool of receive-buffer segments backed by a single arena.
//!
//! The pool allocates one contiguous arena of `segment_size * segment_count`
//! bytes at construction and splits it into equally sized, non-aliasing
//! [`Segment`] handles. Segments move from the pool to an in-flight receive
//! and back; the arena is never grown, so the pool bounds total
//! receive-buffer memory and the number of concurrent in-flight reads.
//!
//! The free list is a bounded lock-free ring, so acquire and release are safe
//! from any number of connection tasks without locking. An exhausted pool
//! yields `None` from [`SegmentPool::acquire`]; callers must treat that as
//! backpressure and hold off new reads or accepts until a segment frees.
//!
//! The pool is owned by the host that created it and dropped when the host
//! stops; there is no process-wide shared pool.

use bytes::BytesMut;
use crossbeam_channel::{Receiver, Sender, bounded};

/// One fixed-size slice of the pool's arena, owned by at most one in-flight
/// receive at a time.
#[derive(Debug)]
pub struct Segment {
    offset: usize,
    buf: BytesMut,
}

impl Segment {
    /// Byte offset of this segment within the arena.
    #[must_use]
    pub const fn offset(&self) -> usize { self.offset }

    /// Segment capacity in bytes.
    #[must_use]
    pub fn len(&self) -> usize { self.buf.len() }

    /// Whether the segment has zero capacity (never true for pool segments).
    #[must_use]
    pub fn is_empty(&self) -> bool { self.buf.is_empty() }

    /// View the segment contents.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] { &self.buf }

    /// Mutable view used as the target of a socket read.
    pub fn as_mut_slice(&mut self) -> &mut [u8] { &mut self.buf }
}

/// Fixed arena of receive segments with lock-free acquire and release.
#[derive(Debug)]
pub struct SegmentPool {
    free_tx: Sender<Segment>,
    free_rx: Receiver<Segment>,
    segment_size: usize,
    capacity: usize,
}

impl SegmentPool {
    /// Allocate the arena and populate the free list.
    ///
    /// # Panics
    ///
    /// Panics if `segment_size` or `segment_count` is zero.
    #[must_use]
    pub fn new(segment_size: usize, segment_count: usize) -> Self {
        assert!(segment_size > 0, "segment size must be non-zero");
        assert!(segment_count > 0, "segment count must be non-zero");
        let mut arena = BytesMut::zeroed(segment_size * segment_count);
        let (free_tx, free_rx) = bounded(segment_count);
        for index in 0..segment_count {
            let segment = Segment {
                offset: index * segment_size,
                buf: arena.split_to(segment_size),
            };
            free_tx
                .send(segment)
                .expect("free list sized to hold every segment");
        }
        Self {
            free_tx,
            free_rx,
            segment_size,
            capacity: segment_count,
        }
    }

    /// Take a segment from the pool, or `None` when every segment is in
    /// flight. Callers must treat `None` as backpressure.
    #[must_use]
    pub fn acquire(&self) -> Option<Segment> { self.free_rx.try_recv().ok() }

    /// Return a segment to the pool, making it re-acquirable.
    pub fn release(&self, segment: Segment) {
        debug_assert_eq!(segment.len(), self.segment_size);
        if self.free_tx.try_send(segment).is_err() {
            // Only reachable with a segment from another pool; drop it rather
            // than corrupt this pool's accounting.
            tracing::warn!("released segment does not belong to this pool");
        }
    }

    /// Configured size of each segment in bytes.
    #[must_use]
    pub const fn segment_size(&self) -> usize { self.segment_size }

    /// Total number of segments in the arena.
    #[must_use]
    pub const fn capacity(&self) -> usize { self.capacity }

    /// Number of segments currently available for acquisition.
    #[must_use]
    pub fn available(&self) -> usize { self.free_rx.len() }
}
