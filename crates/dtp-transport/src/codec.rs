//! DTP wire format: fixed 24-byte header, network byte order.
//!
//! ```text
//! magic(u16) version(u8) type(u8) priority(u8) flags(u8) sequence(u16)
//! timestamp(u32) deadline(u64) payload_length(u16) batch_id(u16)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock;

pub const DTP_VERSION: u8 = 1;
pub const DTP_MAGIC: u16 = 0xDEAD;
pub const DTP_HEADER_SIZE: usize = 24;
pub const DTP_DEFAULT_PORT: u16 = 4433;

/// Errors raised unpacking a header. No partial state is ever exposed — a
/// failed unpack leaves nothing behind for the caller to inspect.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("{0}")]
    MalformedHeader(String),
    #[error("{0}")]
    UnknownEnum(String),
}

/// Priority class. Lower numeric value = higher priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Priority {
    Critical = 0,
    High = 1,
    Medium = 2,
    Low = 3,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    /// Production default deadline for this class, in milliseconds.
    ///
    /// Test fixtures commonly override these (e.g. 50/100/250/1000 ms) —
    /// callers that need different defaults should parameterize rather than
    /// rely on this table (design note 9b).
    pub fn default_deadline_ms(self) -> u64 {
        match self {
            Priority::Critical => 500,
            Priority::High => 1500,
            Priority::Medium => 3000,
            Priority::Low => 6000,
        }
    }

    fn from_byte(b: u8) -> Result<Self, CodecError> {
        match b {
            0 => Ok(Priority::Critical),
            1 => Ok(Priority::High),
            2 => Ok(Priority::Medium),
            3 => Ok(Priority::Low),
            other => Err(CodecError::UnknownEnum(format!(
                "priority byte {other} out of range"
            ))),
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// Packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Data = 0,
    Ack = 1,
    Nack = 2,
    Congestion = 3,
    Keepalive = 4,
}

impl PacketType {
    fn from_byte(b: u8) -> Result<Self, CodecError> {
        match b {
            0 => Ok(PacketType::Data),
            1 => Ok(PacketType::Ack),
            2 => Ok(PacketType::Nack),
            3 => Ok(PacketType::Congestion),
            4 => Ok(PacketType::Keepalive),
            other => Err(CodecError::UnknownEnum(format!(
                "packet type byte {other} out of range"
            ))),
        }
    }
}

/// Flag bits. Only RELIABLE/DROPPABLE/BATCHED are interpreted by the core;
/// COMPRESSED and ENCRYPTED are reserved.
pub mod flags {
    pub const NONE: u8 = 0x00;
    pub const RELIABLE: u8 = 0x01;
    pub const DROPPABLE: u8 = 0x02;
    pub const BATCHED: u8 = 0x04;
    pub const COMPRESSED: u8 = 0x08;
    pub const ENCRYPTED: u8 = 0x10;
}

/// Fixed 24-byte DTP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtpHeader {
    pub version: u8,
    pub packet_type: PacketType,
    pub priority: Priority,
    pub flags: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub deadline: u64,
    pub payload_length: u16,
    pub batch_id: u16,
}

impl Default for DtpHeader {
    fn default() -> Self {
        DtpHeader {
            version: DTP_VERSION,
            packet_type: PacketType::Data,
            priority: Priority::Medium,
            flags: flags::NONE,
            sequence: 0,
            timestamp: 0,
            deadline: Priority::Medium.default_deadline_ms(),
            payload_length: 0,
            batch_id: 0,
        }
    }
}

impl DtpHeader {
    /// Serialize to exactly [`DTP_HEADER_SIZE`] bytes.
    pub fn pack(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DTP_HEADER_SIZE);
        buf.put_u16(DTP_MAGIC);
        buf.put_u8(self.version);
        buf.put_u8(self.packet_type as u8);
        buf.put_u8(self.priority as u8);
        buf.put_u8(self.flags);
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u64(self.deadline);
        buf.put_u16(self.payload_length);
        buf.put_u16(self.batch_id);
        buf.freeze()
    }

    /// Parse a header from the front of `buf`. Magic and version checks run
    /// first and mutate nothing on failure.
    pub fn unpack(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < DTP_HEADER_SIZE {
            return Err(CodecError::MalformedHeader(format!(
                "header too short: {} < {DTP_HEADER_SIZE}",
                buf.len()
            )));
        }

        let mut cursor = &buf[..DTP_HEADER_SIZE];
        let magic = cursor.get_u16();
        if magic != DTP_MAGIC {
            return Err(CodecError::MalformedHeader(format!(
                "bad magic: {magic:#x}"
            )));
        }

        let version = cursor.get_u8();
        let packet_type = PacketType::from_byte(cursor.get_u8())?;
        let priority = Priority::from_byte(cursor.get_u8())?;
        let flag_bits = cursor.get_u8();
        let sequence = cursor.get_u16();
        let timestamp = cursor.get_u32();
        let deadline = cursor.get_u64();
        let payload_length = cursor.get_u16();
        let batch_id = cursor.get_u16();

        Ok(DtpHeader {
            version,
            packet_type,
            priority,
            flags: flag_bits,
            sequence,
            timestamp,
            deadline,
            payload_length,
            batch_id,
        })
    }

    /// `now - timestamp > deadline`. A zero timestamp (never sent) is never
    /// considered expired.
    pub fn is_expired(&self) -> bool {
        if self.timestamp == 0 {
            return false;
        }
        let elapsed = clock::now_ms() - self.timestamp as i64;
        elapsed > self.deadline as i64
    }

    /// Remaining time to deadline, clamped at zero. Snapshot this at enqueue —
    /// the scheduler's composite key must not recompute it mid-queue.
    pub fn time_to_deadline(&self) -> i64 {
        if self.timestamp == 0 {
            return self.deadline as i64;
        }
        let elapsed = clock::now_ms() - self.timestamp as i64;
        (self.deadline as i64 - elapsed).max(0)
    }
}

/// Header plus opaque payload of declared length.
#[derive(Debug, Clone)]
pub struct Packet {
    pub header: DtpHeader,
    pub payload: Bytes,
    /// Monotonic receive timestamp, set by [`Packet::mark_received`].
    pub received_at: Option<i64>,
}

impl Packet {
    pub fn new(header: DtpHeader, payload: Bytes) -> Self {
        Packet {
            header,
            payload,
            received_at: None,
        }
    }

    /// Build a DATA packet with `timestamp` captured now and the class
    /// default deadline unless overridden.
    pub fn create_data(
        payload: impl Into<Bytes>,
        priority: Priority,
        sequence: u16,
        deadline_ms: Option<u64>,
    ) -> Self {
        let payload = payload.into();
        let deadline = deadline_ms.unwrap_or_else(|| priority.default_deadline_ms());
        let header = DtpHeader {
            packet_type: PacketType::Data,
            priority,
            sequence,
            timestamp: clock::now_ms() as u32,
            deadline,
            payload_length: payload.len() as u16,
            ..Default::default()
        };
        Packet::new(header, payload)
    }

    /// Build an ACK referencing `sequence`.
    pub fn create_ack(sequence: u16, priority: Priority) -> Self {
        let header = DtpHeader {
            packet_type: PacketType::Ack,
            priority,
            sequence,
            timestamp: clock::now_ms() as u32,
            payload_length: 0,
            ..Default::default()
        };
        Packet::new(header, Bytes::new())
    }

    /// Build a CONGESTION packet whose payload is a big-endian `f32` level in `[0, 1]`.
    pub fn create_congestion(level: f32) -> Self {
        let mut payload = BytesMut::with_capacity(4);
        payload.put_f32(level.clamp(0.0, 1.0));
        let payload = payload.freeze();
        let header = DtpHeader {
            packet_type: PacketType::Congestion,
            priority: Priority::Critical,
            timestamp: clock::now_ms() as u32,
            payload_length: payload.len() as u16,
            ..Default::default()
        };
        Packet::new(header, payload)
    }

    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DTP_HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&self.header.pack());
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, CodecError> {
        let header = DtpHeader::unpack(data)?;
        let end = DTP_HEADER_SIZE + header.payload_length as usize;
        if data.len() < end {
            return Err(CodecError::MalformedHeader(format!(
                "payload shorter than declared length: {} < {end}",
                data.len()
            )));
        }
        let payload = Bytes::copy_from_slice(&data[DTP_HEADER_SIZE..end]);
        Ok(Packet::new(header, payload))
    }

    pub fn mark_received(&mut self) {
        if self.received_at.is_none() {
            self.received_at = Some(clock::now_ms());
        }
    }

    /// `None` if not yet received or the packet never carried a real timestamp.
    pub fn latency_ms(&self) -> Option<i64> {
        let received = self.received_at?;
        if self.header.timestamp == 0 {
            return None;
        }
        Some(received - self.header.timestamp as i64)
    }

    /// `true` when latency is unknown (not yet delivered) or within deadline.
    pub fn is_on_time(&self) -> bool {
        match self.latency_ms() {
            None => true,
            Some(lat) => lat <= self.header.deadline as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── Header roundtrip ───────────────────────────────────────────────

    #[test]
    fn header_roundtrip_exact_bytes() {
        let header = DtpHeader {
            version: 1,
            packet_type: PacketType::Data,
            priority: Priority::High,
            flags: flags::RELIABLE | flags::BATCHED,
            sequence: 1234,
            timestamp: 1_000_000,
            deadline: 100,
            payload_length: 0,
            batch_id: 5,
        };

        let packed = header.pack();
        assert_eq!(packed.len(), DTP_HEADER_SIZE);
        assert_eq!(
            &packed[..6],
            &[0xDE, 0xAD, 0x01, 0x00, 0x01, 0x03],
            "magic/version/type/priority/flags prefix must match exactly"
        );

        let unpacked = DtpHeader::unpack(&packed).expect("unpack should succeed");
        assert_eq!(unpacked, header);
    }

    #[test]
    fn unpack_rejects_short_buffer() {
        let short = [0u8; DTP_HEADER_SIZE - 1];
        assert!(matches!(
            DtpHeader::unpack(&short),
            Err(CodecError::MalformedHeader(_))
        ));
    }

    #[test]
    fn unpack_rejects_bad_magic() {
        let mut buf = DtpHeader::default().pack().to_vec();
        buf[0] = 0x00;
        assert!(matches!(
            DtpHeader::unpack(&buf),
            Err(CodecError::MalformedHeader(_))
        ));
    }

    #[test]
    fn unpack_rejects_unknown_priority() {
        let mut buf = DtpHeader::default().pack().to_vec();
        buf[4] = 9; // priority byte
        assert!(matches!(
            DtpHeader::unpack(&buf),
            Err(CodecError::UnknownEnum(_))
        ));
    }

    #[test]
    fn unpack_rejects_unknown_packet_type() {
        let mut buf = DtpHeader::default().pack().to_vec();
        buf[3] = 200; // packet type byte
        assert!(matches!(
            DtpHeader::unpack(&buf),
            Err(CodecError::UnknownEnum(_))
        ));
    }

    // ─── Packet constructors ────────────────────────────────────────────

    #[test]
    fn create_data_uses_class_default_deadline() {
        let pkt = Packet::create_data(&b"hello"[..], Priority::Critical, 7, None);
        assert_eq!(pkt.header.deadline, 500);
        assert_eq!(pkt.header.payload_length, 5);
        assert_eq!(pkt.header.packet_type, PacketType::Data);
    }

    #[test]
    fn create_data_honors_deadline_override() {
        let pkt = Packet::create_data(&b""[..], Priority::Low, 0, Some(42));
        assert_eq!(pkt.header.deadline, 42);
    }

    #[test]
    fn create_ack_has_zero_payload() {
        let ack = Packet::create_ack(99, Priority::High);
        assert_eq!(ack.header.packet_type, PacketType::Ack);
        assert_eq!(ack.header.sequence, 99);
        assert_eq!(ack.payload.len(), 0);
    }

    #[test]
    fn create_congestion_encodes_level_as_f32() {
        let pkt = Packet::create_congestion(0.75);
        assert_eq!(pkt.header.packet_type, PacketType::Congestion);
        assert_eq!(pkt.header.priority, Priority::Critical);
        let mut payload = &pkt.payload[..];
        assert_eq!(payload.get_f32(), 0.75);
    }

    // ─── Full packet roundtrip ──────────────────────────────────────────

    #[test]
    fn full_packet_roundtrip() {
        let original = Packet::create_data(&b"payload-bytes"[..], Priority::Medium, 42, None);
        let bytes = original.serialize();
        let decoded = Packet::deserialize(&bytes).expect("deserialize should succeed");
        assert_eq!(decoded.header, original.header);
        assert_eq!(decoded.payload, original.payload);
    }

    #[test]
    fn deserialize_rejects_truncated_payload() {
        let original = Packet::create_data(&b"0123456789"[..], Priority::Medium, 1, None);
        let mut bytes = original.serialize().to_vec();
        bytes.truncate(DTP_HEADER_SIZE + 3);
        assert!(Packet::deserialize(&bytes).is_err());
    }

    // ─── Latency / on-time ───────────────────────────────────────────────

    #[test]
    fn latency_is_none_before_receipt() {
        let pkt = Packet::create_data(&b""[..], Priority::Medium, 0, None);
        assert_eq!(pkt.latency_ms(), None);
        assert!(pkt.is_on_time(), "unknown latency counts as on-time");
    }

    #[test]
    fn is_on_time_matches_latency_vs_deadline() {
        let mut pkt = Packet::create_data(&b""[..], Priority::Medium, 0, Some(100));
        pkt.header.timestamp = (clock::now_ms() - 200) as u32;
        pkt.mark_received();
        let lat = pkt.latency_ms().expect("latency should be known");
        assert_eq!(pkt.is_on_time(), lat <= 100);
    }

    #[test]
    fn mark_received_is_idempotent() {
        let mut pkt = Packet::create_data(&b""[..], Priority::Medium, 0, None);
        pkt.mark_received();
        let first = pkt.received_at;
        pkt.mark_received();
        assert_eq!(pkt.received_at, first);
    }
}
