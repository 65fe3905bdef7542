use bytes::BytesMut;
use crossbeam_channel::{bounded, Receiver, Sender};

const DEFAULT_POOL_SIZE: usize = 64;
const DEFAULT_BUFFER_CAPACITY: usize = 4 * 1024;

// Buffers that grew past this multiple of the configured capacity are not kept around
const MAX_RETAINED_FACTOR: usize = 16;

/// Free list of reusable byte buffers, shared by every thread that encodes payloads.
///
/// A buffer handed out by [`BufferPool::acquire`] is exclusively owned by the caller until it is
/// passed back to [`BufferPool::release`]. Release clears the content, so reusing a buffer never
/// leaks bytes from a previous payload. When the free list is empty a fresh buffer is allocated;
/// when it is full the returned buffer is dropped.
#[derive(Clone)]
pub struct BufferPool {
    free_tx: Sender<BytesMut>,
    free_rx: Receiver<BytesMut>,
    buffer_capacity: usize,
}

impl BufferPool {
    pub fn new(max_pooled: usize, buffer_capacity: usize) -> Self {
        let (free_tx, free_rx) = bounded(max_pooled);
        Self {
            free_tx,
            free_rx,
            buffer_capacity,
        }
    }

    /// An empty buffer, reused from the free list when one is available.
    pub fn acquire(&self) -> BytesMut {
        self.free_rx
            .try_recv()
            .unwrap_or_else(|_| BytesMut::with_capacity(self.buffer_capacity))
    }

    pub fn release(&self, mut buffer: BytesMut) {
        if buffer.capacity() > self.buffer_capacity.saturating_mul(MAX_RETAINED_FACTOR) {
            return;
        }
        buffer.clear();
        // A full free list hands the buffer back in the error, which is dropped here
        drop(self.free_tx.try_send(buffer));
    }

    /// Number of buffers currently waiting on the free list.
    pub fn pooled(&self) -> usize {
        self.free_rx.len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE, DEFAULT_BUFFER_CAPACITY)
    }
}
