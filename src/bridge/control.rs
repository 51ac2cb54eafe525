//! Control channel handling
//!
//! At most one packet (client) or one query byte (server) is consumed per
//! period, and only once enough bytes are buffered to read it whole.

use crate::error::PacketError;
use crate::protocol::{ConfigPacket, PACKET_SIZE, QUERY_CMD};
use crate::transport::Transport;

/// Outcome of draining the control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPoll {
    /// Not enough bytes buffered for a packet
    Idle,
    /// A packet's worth of bytes was consumed and discarded
    Malformed(PacketError),
    Packet(ConfigPacket),
}

/// What a received packet asks of the local bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// New (play, record) counts, already clamped, when a rebuild is needed
    pub reconfigure: Option<(usize, usize)>,
    /// Peer period size, when it differs from ours
    pub period_mismatch: Option<u32>,
    /// Peer sample rate, when it differs from ours
    pub rate_mismatch: Option<u32>,
    /// Underrun count to store locally
    pub underruns: u32,
}

/// Local values a packet is compared against
#[derive(Debug, Clone, Copy)]
pub struct LocalConfig {
    pub play_count: usize,
    pub record_count: usize,
    pub period_size: u32,
    pub sample_rate: u32,
}

pub struct ControlHandler {
    buf: [u8; PACKET_SIZE],
    connected: bool,
    max_channels: usize,
}

impl ControlHandler {
    pub fn new(max_channels: usize) -> Self {
        Self {
            buf: [0; PACKET_SIZE],
            connected: false,
            max_channels,
        }
    }

    /// Read one config packet if a whole one is waiting
    pub fn try_drain_one_packet<T>(&mut self, control: &mut T) -> ControlPoll
    where
        T: Transport + ?Sized,
    {
        if control.data_ready() < PACKET_SIZE {
            return ControlPoll::Idle;
        }
        if control.read(&mut self.buf).is_err() {
            return ControlPoll::Idle;
        }
        match ConfigPacket::decode(&self.buf) {
            Ok(packet) => ControlPoll::Packet(packet),
            Err(e) => ControlPoll::Malformed(e),
        }
    }

    /// Compare a packet with the local configuration
    pub fn decide(&self, packet: &ConfigPacket, local: LocalConfig) -> Decision {
        let play = (packet.play_count as usize).min(self.max_channels);
        let record = (packet.record_count as usize).min(self.max_channels);
        let period = packet.period_size();

        let counts_differ = play != local.play_count || record != local.record_count;
        let period_differs = period != local.period_size;

        Decision {
            reconfigure: (counts_differ || period_differs).then_some((play, record)),
            period_mismatch: period_differs.then_some(period),
            rate_mismatch: (packet.sample_rate != local.sample_rate).then_some(packet.sample_rate),
            underruns: packet.underruns,
        }
    }

    /// True on the first call after the channel comes up. Resets when it drops.
    pub fn on_connect_edge<T>(&mut self, control: &mut T) -> bool
    where
        T: Transport + ?Sized,
    {
        let open = control.is_open();
        let edge = open && !self.connected;
        self.connected = open;
        edge
    }

    /// Consume one byte; true if it was a config query
    pub fn try_drain_query<T>(&mut self, control: &mut T) -> bool
    where
        T: Transport + ?Sized,
    {
        if control.data_ready() < 1 {
            return false;
        }
        let mut byte = [0u8; 1];
        control.read(&mut byte).is_ok() && byte[0] == QUERY_CMD
    }

    /// Ask the peer for its config. False if there was no room.
    pub fn send_query<T>(&mut self, control: &mut T) -> bool
    where
        T: Transport + ?Sized,
    {
        control.buffer_space() >= 1 && control.write(&[QUERY_CMD]).is_ok()
    }

    /// Send a config packet if it fits whole. False if there was no room.
    pub fn push_config<T>(&mut self, control: &mut T, packet: &ConfigPacket) -> bool
    where
        T: Transport + ?Sized,
    {
        if control.buffer_space() < PACKET_SIZE {
            return false;
        }
        self.buf = packet.encode();
        control.write(&self.buf).is_ok()
    }
}
