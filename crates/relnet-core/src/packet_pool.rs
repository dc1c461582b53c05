use std::{
    fmt,
    sync::{Arc, Mutex},
};

use crate::packet::{Packet, PacketFlags};

pub(crate) struct PoolInner {
    /// Pool of reusable buffers
    buffers: Vec<Vec<u8>>,
    /// Buffers with a larger capacity are not kept
    max_buffer_size: usize,
    /// Maximum number of buffers to keep in pool
    max_pool_size: usize,
}

impl PoolInner {
    fn acquire(&mut self, len: usize) -> Vec<u8> {
        let mut buffer = self.buffers.pop().unwrap_or_default();
        buffer.clear();
        buffer.resize(len, 0);
        buffer
    }

    pub(crate) fn release(&mut self, mut buffer: Vec<u8>) {
        if buffer.capacity() <= self.max_buffer_size && self.buffers.len() < self.max_pool_size {
            buffer.clear();
            self.buffers.push(buffer);
        }
    }
}

/// A recycling allocator for packet payloads.
///
/// Packets created through the pool hand their buffer back when the last
/// reference is dropped. Handles are cheap to clone and share the same pool;
/// packets outliving every handle simply free their buffer.
#[derive(Clone)]
pub struct PacketPool {
    inner: Arc<Mutex<PoolInner>>,
}

impl PacketPool {
    /// Creates a pool keeping up to `max_pool_size` buffers of at most `max_buffer_size` bytes.
    pub fn new(max_buffer_size: usize, max_pool_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                buffers: Vec::with_capacity(max_pool_size),
                max_buffer_size,
                max_pool_size,
            })),
        }
    }

    /// Takes a zeroed buffer of `len` bytes from the pool or allocates a new one.
    pub fn allocate(&self, len: usize) -> Vec<u8> {
        match self.inner.lock() {
            Ok(mut inner) => inner.acquire(len),
            Err(_) => vec![0; len],
        }
    }

    /// Returns a buffer to the pool for reuse.
    pub fn deallocate(&self, buffer: Vec<u8>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.release(buffer);
        }
    }

    /// Copies `data` into a pooled buffer and wraps it in a packet.
    pub fn packet(&self, data: &[u8], flags: PacketFlags) -> Packet {
        let mut buffer = self.allocate(0);
        buffer.extend_from_slice(data);
        self.adopt(buffer, flags)
    }

    /// Wraps an already filled buffer in a packet that returns it to this pool.
    pub fn adopt(&self, buffer: Vec<u8>, flags: PacketFlags) -> Packet {
        Packet::pooled(buffer, flags, Arc::downgrade(&self.inner))
    }

    /// Returns the number of buffers currently in the pool.
    pub fn available(&self) -> usize {
        self.inner.lock().map(|inner| inner.buffers.len()).unwrap_or(0)
    }
}

impl Default for PacketPool {
    fn default() -> Self {
        // Default: pool buffers up to 64KB, keep up to 256 buffers
        Self::new(64 * 1024, 256)
    }
}

impl fmt::Debug for PacketPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketPool").field("available", &self.available()).finish()
    }
}
