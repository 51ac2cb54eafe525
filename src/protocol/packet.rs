//! Fixed 13-byte configuration packet
//!
//! ```text
//! offset  size  field
//!      0     1  start marker (0xFF)
//!      1     1  play channel count
//!      2     1  record channel count
//!      3     1  period-size exponent (period = 1 << exp)
//!      4     4  sample rate, big-endian
//!      8     4  underrun count, big-endian
//!     12     1  end marker (0xFE)
//! ```

use bytes::BufMut;

use crate::codec::{decode_u32, log2};
use crate::error::PacketError;

/// Size of a config packet on the wire
pub const PACKET_SIZE: usize = 13;

/// First byte of every config packet
pub const PACKET_START: u8 = 0xFF;

/// Last byte of every config packet
pub const PACKET_END: u8 = 0xFE;

/// Decoded config packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigPacket {
    pub play_count: u8,
    pub record_count: u8,
    pub period_exponent: u8,
    pub sample_rate: u32,
    pub underruns: u32,
}

impl ConfigPacket {
    /// Build a packet describing a local topology
    pub fn describe(
        play_count: usize,
        record_count: usize,
        period_size: u32,
        sample_rate: u32,
        underruns: u32,
    ) -> Self {
        Self {
            play_count: play_count.min(u8::MAX as usize) as u8,
            record_count: record_count.min(u8::MAX as usize) as u8,
            period_exponent: log2(period_size),
            sample_rate,
            underruns,
        }
    }

    /// Period size in frames. Exponents past 31 yield 0.
    pub fn period_size(&self) -> u32 {
        1u32.checked_shl(self.period_exponent as u32).unwrap_or(0)
    }

    /// Parse and validate a packet
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < PACKET_SIZE {
            return Err(PacketError::Truncated(buf.len()));
        }
        if buf[0] != PACKET_START {
            return Err(PacketError::BadStartMarker(buf[0]));
        }
        if buf[PACKET_SIZE - 1] != PACKET_END {
            return Err(PacketError::BadEndMarker(buf[PACKET_SIZE - 1]));
        }

        Ok(Self {
            play_count: buf[1],
            record_count: buf[2],
            period_exponent: buf[3],
            sample_rate: decode_u32(buf, 1),
            underruns: decode_u32(buf, 2),
        })
    }

    /// Serialize to wire layout
    pub fn encode(&self) -> [u8; PACKET_SIZE] {
        let mut out = [0u8; PACKET_SIZE];
        let mut cursor = &mut out[..];
        cursor.put_u8(PACKET_START);
        cursor.put_u8(self.play_count);
        cursor.put_u8(self.record_count);
        cursor.put_u8(self.period_exponent);
        cursor.put_u32(self.sample_rate);
        cursor.put_u32(self.underruns);
        cursor.put_u8(PACKET_END);
        out
    }
}
