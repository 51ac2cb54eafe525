//! Byte-stream transports between the two domains
//!
//! Every channel is a flow-controlled, connection-stateful byte stream that
//! can be asked how much it holds and how much room it has without blocking.
//! Reads and writes are exact-length and are only issued after the caller has
//! checked [`Transport::data_ready`] / [`Transport::buffer_space`].

pub mod memory;
pub mod tcp;
#[cfg(feature = "vchan")]
pub mod vchan;

pub use memory::MemoryTransport;
pub use tcp::{TcpOptions, TcpTransport};
#[cfg(feature = "vchan")]
pub use vchan::VchanTransport;

use crate::error::TransportError;
use crate::protocol::ChannelId;

/// Which side of the connection handshake a peer plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Waits for the peer (server role)
    Listen,
    /// Reaches out to the peer (client role)
    Connect,
}

/// One duplex byte-stream channel
pub trait Transport: Send {
    /// Whether the peer is connected
    fn is_open(&mut self) -> bool;

    /// Bytes that can be read right now
    fn data_ready(&mut self) -> usize;

    /// Bytes that can be written right now
    fn buffer_space(&mut self) -> usize;

    /// Read exactly `buf.len()` bytes
    fn read(&mut self, buf: &mut [u8]) -> Result<(), TransportError>;

    /// Write exactly `buf.len()` bytes
    fn write(&mut self, buf: &[u8]) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn is_open(&mut self) -> bool {
        (**self).is_open()
    }

    fn data_ready(&mut self) -> usize {
        (**self).data_ready()
    }

    fn buffer_space(&mut self) -> usize {
        (**self).buffer_space()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        (**self).write(buf)
    }
}

/// The three channels connecting a pair of bridges
pub struct TransportSet<T> {
    pub control: T,
    pub playback: T,
    pub record: T,
}

impl<T: Transport> TransportSet<T> {
    pub fn new(control: T, playback: T, record: T) -> Self {
        Self {
            control,
            playback,
            record,
        }
    }

    /// Get a channel by identifier
    pub fn channel_mut(&mut self, id: ChannelId) -> &mut T {
        match id {
            ChannelId::Control => &mut self.control,
            ChannelId::Playback => &mut self.playback,
            ChannelId::Record => &mut self.record,
        }
    }

    /// Erase the concrete transport type
    pub fn boxed(self) -> TransportSet<Box<dyn Transport>>
    where
        T: 'static,
    {
        TransportSet {
            control: Box::new(self.control),
            playback: Box::new(self.playback),
            record: Box::new(self.record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_lookup() {
        let (mut near, mut far) = memory::channel_set(64);

        near.channel_mut(ChannelId::Record).write(&[7, 8]).unwrap();
        assert_eq!(far.record.data_ready(), 2);
        assert_eq!(far.playback.data_ready(), 0);
        assert_eq!(far.control.data_ready(), 0);
    }

    #[test]
    fn test_boxed_set_forwards() {
        let (near, mut far) = memory::channel_set(64);
        let mut near = near.boxed();

        near.control.write(&[0xEE]).unwrap();
        let mut byte = [0u8; 1];
        far.control.read(&mut byte).unwrap();
        assert_eq!(byte, [0xEE]);
        assert!(near.playback.is_open());
    }
}
