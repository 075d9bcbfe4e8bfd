//! The native transport stack boundary.
//!
//! SQL Server ships its client networking as a standalone native library
//! (SNI): name resolution, connection establishment, and packet I/O behind
//! a handful of C entry points. [`SniDriver`] is the seam the rest of the
//! bridge talks through, so the adapter runs unchanged against the real
//! library or an in-memory double.
pub mod status;

mod handle;
mod packet;

#[cfg(feature = "native")]
mod native;

#[cfg(test)]
pub(crate) mod mock;

pub use handle::{ConnHandle, OpenError};
pub use packet::{AllocError, BufferTooSmall, CorruptPacket, Packet};
pub use status::Status;

#[cfg(feature = "native")]
pub use native::{LoadError, NativeSni};

use crate::transport::config::{ConsumerConfig, DnsCacheInfo, IpPreference};

/// Size of the instance name output slot, as specified by netlibs.
pub const INSTANCE_NAME_LEN: usize = 256;

/// Opaque reference to a native connection resource.
///
/// A plain token, not an owner: releasing is [`ConnHandle`]'s job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnRef(pub(crate) usize);

impl ConnRef {
    pub(crate) const NULL: ConnRef = ConnRef(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Opaque reference to a native packet resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketRef(pub(crate) usize);

impl PacketRef {
    pub(crate) const NULL: PacketRef = PacketRef(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Transfer direction a packet is allocated for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoDirection {
    Read,
    Write,
}

impl IoDirection {
    pub(crate) fn native(self) -> i32 {
        match self {
            IoDirection::Read => 0,
            IoDirection::Write => 1,
        }
    }
}

/// Borrowed view of everything one open call needs.
///
/// Assembled by the adapter per attempt and discarded after the call
/// returns.
pub struct OpenParams<'a> {
    pub connection_string: &'a str,
    /// Security principal name for integrated auth; `None` for SQL auth.
    pub spn: Option<&'a [u8]>,
    pub consumer: &'a ConsumerConfig,
    pub override_cache: bool,
    pub synchronous: bool,
    /// Milliseconds, or the infinite sentinel `-1`.
    pub timeout_ms: i32,
    pub parallel: bool,
    pub ip_preference: IpPreference,
    pub dns_cache: Option<&'a DnsCacheInfo>,
}

/// The instance name slot filled by the open call.
///
/// Only meaningful when the target is a named, non-default endpoint;
/// zero-filled otherwise. Display/diagnostics only.
pub struct InstanceName {
    bytes: [u8; INSTANCE_NAME_LEN],
}

impl InstanceName {
    pub(crate) fn zeroed() -> InstanceName {
        InstanceName { bytes: [0; INSTANCE_NAME_LEN] }
    }

    pub(crate) fn buf(&mut self) -> &mut [u8; INSTANCE_NAME_LEN] {
        &mut self.bytes
    }

    /// Bytes up to the first NUL.
    pub fn as_bytes(&self) -> &[u8] {
        let end = self.bytes.iter().position(|b| *b == 0).unwrap_or(INSTANCE_NAME_LEN);
        &self.bytes[..end]
    }

    pub fn is_empty(&self) -> bool {
        self.bytes[0] == 0
    }
}

impl std::fmt::Display for InstanceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&String::from_utf8_lossy(self.as_bytes()), f)
    }
}

impl std::fmt::Debug for InstanceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// One conforming native transport backend.
///
/// Raw status codes pass through unclassified; [`Status::classify`] is the
/// only interpreter. Implementors must uphold the resource contract: a
/// non-null [`ConnRef`]/[`PacketRef`] stays valid until the matching
/// [`close`][SniDriver::close]/[`packet_release`][SniDriver::packet_release],
/// which the owning wrapper calls exactly once.
pub trait SniDriver: Send + Sync + 'static {
    /// Resolve and connect. Writes the instance name of a named endpoint
    /// into `instance_name`. A failed open may still return a live ref
    /// alongside the failure status; the caller closes it.
    fn open(&self, params: &OpenParams<'_>, instance_name: &mut [u8; INSTANCE_NAME_LEN]) -> (ConnRef, u32);

    /// Close never fails by contract; a non-zero status is diagnostic only.
    fn close(&self, conn: ConnRef) -> u32;

    /// Null ref on allocation failure.
    fn packet_alloc(&self, conn: ConnRef, dir: IoDirection) -> PacketRef;

    fn packet_release(&self, packet: PacketRef);

    /// Copy `data` into the packet's backing buffer.
    fn packet_set_data(&self, packet: PacketRef, data: &[u8]);

    /// Drain the packet payload into `buf`, returning `(status, data_size)`.
    ///
    /// When the payload exceeds `buf.len()` the call fails with a non-zero
    /// status and reports the required size; it never writes past the
    /// buffer.
    fn packet_get_data(&self, packet: PacketRef, buf: &mut [u8]) -> (u32, usize);

    /// Issue a write of a filled packet.
    fn write(&self, conn: ConnRef, packet: PacketRef) -> u32;

    /// Bounded-wait read. Pending/timeout statuses return a null packet.
    fn read(&self, conn: ConnRef, timeout_ms: i32) -> (u32, PacketRef);
}
