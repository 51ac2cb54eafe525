//! Control protocol shared by both peers
//!
//! Three independent channels connect the peers. Audio flows on the playback
//! and record channels as raw interleaved frames; the control channel carries
//! the query byte and [`ConfigPacket`]s.

pub mod packet;

pub use packet::{ConfigPacket, PACKET_END, PACKET_SIZE, PACKET_START};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Single-byte request for a fresh config push
pub const QUERY_CMD: u8 = 0xEE;

/// The three channels agreed on by both peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelId {
    Control,
    Playback,
    Record,
}

impl ChannelId {
    /// Numeric channel identifier (vchan port)
    pub const fn port(self) -> u16 {
        match self {
            ChannelId::Control => 4715,
            ChannelId::Playback => 4716,
            ChannelId::Record => 4717,
        }
    }

    /// Offset from the control channel's identifier
    pub const fn offset(self) -> u16 {
        self.port() - ChannelId::Control.port()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelId::Control => "control",
            ChannelId::Playback => "playback",
            ChannelId::Record => "record",
        };
        f.write_str(name)
    }
}
