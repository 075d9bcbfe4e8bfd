//! Read-only TDS frame inspection.
//!
//! The bridge relays bytes untouched; this module only delimits the
//! stream into packets and pulls SQL batch text out for logging.
use std::fmt;

use bytes::{Buf, BytesMut};

/// Size of the TDS packet header.
pub const HEADER_LEN: usize = 8;

/// Header status bit: last packet of the message.
pub const STATUS_END_OF_MESSAGE: u8 = 0x01;

/// TDS packet type byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketType {
    SqlBatch,
    PreTds7Login,
    Rpc,
    TabularResult,
    Attention,
    BulkLoad,
    FedAuthToken,
    TransactionManager,
    Tds7Login,
    Sspi,
    PreLogin,
    Unknown(u8),
}

impl PacketType {
    pub fn from_byte(byte: u8) -> PacketType {
        match byte {
            1 => PacketType::SqlBatch,
            2 => PacketType::PreTds7Login,
            3 => PacketType::Rpc,
            4 => PacketType::TabularResult,
            6 => PacketType::Attention,
            7 => PacketType::BulkLoad,
            8 => PacketType::FedAuthToken,
            14 => PacketType::TransactionManager,
            16 => PacketType::Tds7Login,
            17 => PacketType::Sspi,
            18 => PacketType::PreLogin,
            other => PacketType::Unknown(other),
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketType::SqlBatch => f.write_str("SQLBatch"),
            PacketType::PreTds7Login => f.write_str("PreTDS7Login"),
            PacketType::Rpc => f.write_str("RPC"),
            PacketType::TabularResult => f.write_str("TabularResult"),
            PacketType::Attention => f.write_str("Attention"),
            PacketType::BulkLoad => f.write_str("BulkLoad"),
            PacketType::FedAuthToken => f.write_str("FedAuthToken"),
            PacketType::TransactionManager => f.write_str("TransactionManager"),
            PacketType::Tds7Login => f.write_str("TDS7Login"),
            PacketType::Sspi => f.write_str("SSPI"),
            PacketType::PreLogin => f.write_str("PreLogin"),
            PacketType::Unknown(byte) => write!(f, "Unknown(0x{byte:02x})"),
        }
    }
}

/// Decoded 8-byte packet header.
#[derive(Clone, Copy, Debug)]
pub struct PacketHeader {
    pub ty: PacketType,
    pub status: u8,
    /// Whole packet length, header included. Big endian on the wire.
    pub length: u16,
    pub spid: u16,
    pub packet_id: u8,
    pub window: u8,
}

impl PacketHeader {
    /// Decode from the front of `buf`; `None` when fewer than
    /// [`HEADER_LEN`] bytes are available.
    pub fn decode(mut buf: &[u8]) -> Option<PacketHeader> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        Some(PacketHeader {
            ty: PacketType::from_byte(buf.get_u8()),
            status: buf.get_u8(),
            length: buf.get_u16(),
            spid: buf.get_u16(),
            packet_id: buf.get_u8(),
            window: buf.get_u8(),
        })
    }

    pub fn end_of_message(&self) -> bool {
        self.status & STATUS_END_OF_MESSAGE != 0
    }
}

impl fmt::Display for PacketHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} packet, {} bytes, spid {}, id {}",
            self.ty, self.length, self.spid, self.packet_id,
        )?;
        if self.end_of_message() {
            f.write_str(" (EOM)")?;
        }
        Ok(())
    }
}

/// Something the inspector noticed in the relayed stream.
#[derive(Debug)]
pub enum InspectEvent {
    Packet(PacketHeader),
    /// A whole SQL batch message finished; decoded text.
    Batch(String),
}

/// Accumulates relayed bytes and delimits whole packets.
///
/// SQL batch payloads are reassembled across packets until the
/// end-of-message bit. A header announcing less than a header's worth of
/// bytes means the stream cannot be resynchronized; inspection stops for
/// the rest of the session.
#[derive(Debug, Default)]
pub struct FrameInspector {
    buf: BytesMut,
    batch: BytesMut,
    lost_sync: bool,
}

impl FrameInspector {
    pub fn new() -> FrameInspector {
        FrameInspector::default()
    }

    /// Feed a chunk of the client-to-server stream.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<InspectEvent> {
        if self.lost_sync {
            return Vec::new();
        }
        self.buf.extend_from_slice(bytes);

        let mut events = Vec::new();
        loop {
            let Some(header) = PacketHeader::decode(&self.buf) else { break };
            let length = header.length as usize;
            if length < HEADER_LEN {
                self.lost_sync = true;
                self.buf.clear();
                self.batch.clear();
                break;
            }
            if self.buf.len() < length {
                break;
            }

            let packet = self.buf.split_to(length);
            events.push(InspectEvent::Packet(header));

            if header.ty == PacketType::SqlBatch {
                self.batch.extend_from_slice(&packet[HEADER_LEN..]);
                if header.end_of_message() {
                    events.push(InspectEvent::Batch(batch_text(&self.batch.split())));
                }
            }
        }
        events
    }
}

/// Decode the SQL text of a completed batch payload.
///
/// TDS 7.2+ prefixes the payload with an ALL_HEADERS block whose first
/// little-endian DWORD is its own total length; older dialects start the
/// UCS-2 text immediately, in which case that DWORD cannot fit the
/// payload and the prefix is left alone.
pub fn batch_text(payload: &[u8]) -> String {
    let mut text = payload;
    if text.len() >= 4 {
        let total = u32::from_le_bytes([text[0], text[1], text[2], text[3]]) as usize;
        if total >= 4 && total <= text.len() {
            text = &text[total..];
        }
    }

    let units: Vec<u16> = text
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}
