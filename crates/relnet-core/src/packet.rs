use std::{
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex, Weak,
    },
};

use bitflags::bitflags;

use crate::packet_pool::PoolInner;

bitflags! {
    /// Delivery flags carried by a [`Packet`]. No flags means an unreliable,
    /// sequenced packet.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PacketFlags: u32 {
        /// Packet must be received by the target peer and resent until delivered.
        const RELIABLE = 1 << 0;
        /// Packet will not be sequenced with other packets. Not supported for reliable packets.
        const UNSEQUENCED = 1 << 1;
        /// Packet payload is borrowed from the application and never copied.
        const NO_ALLOCATE = 1 << 2;
        /// Packet is fragmented with unreliable fragments when it exceeds the MTU.
        const UNRELIABLE_FRAGMENT = 1 << 3;
        /// Packet has been handed to the socket at least once.
        const SENT = 1 << 8;
    }
}

enum Storage {
    Owned(Vec<u8>),
    Static(&'static [u8]),
}

struct PacketBuffer {
    storage: Storage,
    flags: AtomicU32,
    pool: Option<Weak<Mutex<PoolInner>>>,
}

impl Drop for PacketBuffer {
    fn drop(&mut self) {
        let Some(pool) = self.pool.as_ref().and_then(Weak::upgrade) else {
            return;
        };
        if let Storage::Owned(buffer) = &mut self.storage {
            let buffer = std::mem::take(buffer);
            if let Ok(mut inner) = pool.lock() {
                inner.release(buffer);
            }
        }
    }
}

/// A reference-counted payload with delivery flags.
///
/// Cloning a packet is cheap: clones share the same bytes, which lets one
/// payload sit in several peers' queues at once (broadcast) and survive
/// retransmissions without copying. When the last clone of a pooled packet is
/// dropped, its buffer goes back to the [`PacketPool`](crate::packet_pool::PacketPool).
#[derive(Clone)]
pub struct Packet {
    inner: Arc<PacketBuffer>,
}

impl Packet {
    /// Creates a packet that owns `data`.
    pub fn new(data: Vec<u8>, flags: PacketFlags) -> Self {
        Self::from_storage(Storage::Owned(data), flags, None)
    }

    /// Creates a packet by copying `data`.
    pub fn copy_from(data: &[u8], flags: PacketFlags) -> Self {
        Self::new(data.to_vec(), flags)
    }

    /// Creates a packet that references `data` without copying it.
    ///
    /// The `NO_ALLOCATE` flag is set on the result.
    pub fn from_static(data: &'static [u8], flags: PacketFlags) -> Self {
        Self::from_storage(Storage::Static(data), flags | PacketFlags::NO_ALLOCATE, None)
    }

    pub(crate) fn pooled(
        data: Vec<u8>,
        flags: PacketFlags,
        pool: Weak<Mutex<PoolInner>>,
    ) -> Self {
        Self::from_storage(Storage::Owned(data), flags, Some(pool))
    }

    fn from_storage(
        storage: Storage,
        flags: PacketFlags,
        pool: Option<Weak<Mutex<PoolInner>>>,
    ) -> Self {
        Self { inner: Arc::new(PacketBuffer { storage, flags: AtomicU32::new(flags.bits()), pool }) }
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        match &self.inner.storage {
            Storage::Owned(data) => data,
            Storage::Static(data) => data,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    /// Current flags.
    pub fn flags(&self) -> PacketFlags {
        PacketFlags::from_bits_retain(self.inner.flags.load(Ordering::Relaxed))
    }

    /// Returns true if `flag` is set.
    pub fn has_flag(&self, flag: PacketFlags) -> bool {
        self.flags().contains(flag)
    }

    /// Records that the packet went out on the wire.
    pub fn mark_sent(&self) {
        self.inner.flags.fetch_or(PacketFlags::SENT.bits(), Ordering::Relaxed);
    }

    /// Number of live references to this payload.
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Returns true if both handles share the same payload.
    pub fn ptr_eq(&self, other: &Packet) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.len())
            .field("flags", &self.flags())
            .field("ref_count", &self.reference_count())
            .finish()
    }
}
