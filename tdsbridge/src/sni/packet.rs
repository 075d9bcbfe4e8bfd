//! Owned native packet resource.
use std::{fmt, mem, sync::Arc};

use super::{ConnRef, IoDirection, PacketRef, SniDriver, status};
use crate::Result;

/// One native packet, released exactly once.
///
/// Allocated against a live connection and never outlives it: the adapter
/// creates packets per send/receive and drops them as soon as the data has
/// been consumed or the write has been issued.
pub struct Packet<D: SniDriver> {
    driver: Arc<D>,
    raw: PacketRef,
    dir: IoDirection,
}

impl<D: SniDriver> Packet<D> {
    /// Allocate a fresh packet. A null native resource is fatal for the
    /// session: the transport is assumed unusable.
    pub(crate) fn alloc(
        driver: Arc<D>,
        conn: ConnRef,
        dir: IoDirection,
    ) -> Result<Packet<D>, AllocError> {
        let raw = driver.packet_alloc(conn, dir);
        if raw.is_null() {
            return Err(AllocError { dir });
        }
        Ok(Packet { driver, raw, dir })
    }

    /// Take ownership of a packet the native read produced.
    pub(crate) fn from_raw(driver: Arc<D>, raw: PacketRef, dir: IoDirection) -> Packet<D> {
        Packet { driver, raw, dir }
    }

    pub(crate) fn raw(&self) -> PacketRef {
        self.raw
    }

    /// Copy `data` into the packet's backing buffer.
    ///
    /// The caller must not mutate `data` from another thread during the
    /// call; the native layer gives no copy-before-return guarantee.
    pub(crate) fn set_data(&self, data: &[u8]) {
        debug_assert_eq!(self.dir, IoDirection::Write);
        self.driver.packet_set_data(self.raw, data);
    }

    /// Drain the payload into `buf`.
    ///
    /// A destination too small for the payload yields [`BufferTooSmall`],
    /// never silently dropped bytes; any other non-zero status is a
    /// corrupt packet.
    pub(crate) fn read_data(&self, buf: &mut [u8]) -> Result<usize> {
        debug_assert_eq!(self.dir, IoDirection::Read);
        let (code, size) = self.driver.packet_get_data(self.raw, buf);
        if code != status::SUCCESS {
            if size > buf.len() {
                return Err(BufferTooSmall { needed: size, capacity: buf.len() }.into());
            }
            return Err(CorruptPacket { status: code }.into());
        }
        Ok(size)
    }
}

impl<D: SniDriver> Drop for Packet<D> {
    fn drop(&mut self) {
        let raw = mem::replace(&mut self.raw, PacketRef::NULL);
        if !raw.is_null() {
            self.driver.packet_release(raw);
        }
    }
}

impl<D: SniDriver> fmt::Debug for Packet<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("raw", &self.raw)
            .field("dir", &self.dir)
            .finish()
    }
}

/// Native packet allocation returned a null resource.
pub struct AllocError {
    pub(crate) dir: IoDirection,
}

impl std::error::Error for AllocError { }

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.dir {
            IoDirection::Read => "read",
            IoDirection::Write => "write",
        };
        write!(f, "native {dir} packet allocation returned a null resource")
    }
}

impl fmt::Debug for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// The native layer failed to hand over a received packet's payload.
pub struct CorruptPacket {
    pub(crate) status: u32,
}

impl CorruptPacket {
    pub fn status(&self) -> u32 {
        self.status
    }
}

impl std::error::Error for CorruptPacket { }

impl fmt::Display for CorruptPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "packet data drain failed with native status {}", self.status)
    }
}

impl fmt::Debug for CorruptPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// The caller-supplied destination cannot hold the received payload.
pub struct BufferTooSmall {
    pub(crate) needed: usize,
    pub(crate) capacity: usize,
}

impl BufferTooSmall {
    pub fn needed(&self) -> usize {
        self.needed
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::error::Error for BufferTooSmall { }

impl fmt::Display for BufferTooSmall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received payload of {} bytes exceeds destination capacity {}",
            self.needed, self.capacity,
        )
    }
}

impl fmt::Debug for BufferTooSmall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
