//! TCP transport
//!
//! One connection per channel. Sockets run non-blocking; local staging rings
//! answer `data_ready` and `buffer_space` and absorb partial socket I/O.

use ringbuf::{traits::*, HeapRb};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::{Transport, TransportSet};
use crate::error::TransportError;
use crate::protocol::ChannelId;

/// Largest chunk moved from the socket per read call
const READ_CHUNK: usize = 4096;

/// Socket tuning shared by all channels
#[derive(Debug, Clone)]
pub struct TcpOptions {
    /// Staging ring size per direction, in bytes
    pub ring_bytes: usize,
    /// Kernel socket buffer size (None keeps the OS default)
    pub socket_buffer_bytes: Option<usize>,
    /// Connect timeout for the client side
    pub connect_timeout: Duration,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            ring_bytes: 256 * 1024,
            socket_buffer_bytes: None,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// A single channel over TCP
pub struct TcpTransport {
    channel: ChannelId,
    stream: TcpStream,
    inbound: HeapRb<u8>,
    outbound: HeapRb<u8>,
    open: bool,
}

impl TcpTransport {
    /// Connect to a listening peer
    pub fn connect(
        addr: SocketAddr,
        channel: ChannelId,
        options: &TcpOptions,
    ) -> Result<Self, TransportError> {
        let fail = |e: std::io::Error| TransportError::ConnectFailed {
            channel,
            reason: format!("{}: {}", addr, e),
        };

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(fail)?;
        configure_socket(&socket, options).map_err(fail)?;
        socket
            .connect_timeout(&SockAddr::from(addr), options.connect_timeout)
            .map_err(fail)?;

        Self::from_socket(socket, channel, options).map_err(fail)
    }

    /// Wait for a peer on an already-bound listener
    pub fn accept(
        listener: &Socket,
        channel: ChannelId,
        options: &TcpOptions,
    ) -> Result<Self, TransportError> {
        let fail = |e: std::io::Error| TransportError::ConnectFailed {
            channel,
            reason: e.to_string(),
        };

        let (socket, peer) = listener.accept().map_err(fail)?;
        configure_socket(&socket, options).map_err(fail)?;
        tracing::debug!(
            "Accepted {} channel from {:?}",
            channel,
            peer.as_socket()
        );

        Self::from_socket(socket, channel, options).map_err(fail)
    }

    /// Bind a listener for one channel
    pub fn bind(addr: SocketAddr, channel: ChannelId) -> Result<Socket, TransportError> {
        let fail = |e: std::io::Error| TransportError::BindFailed {
            channel,
            reason: format!("{}: {}", addr, e),
        };

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(fail)?;
        socket.set_reuse_address(true).map_err(fail)?;
        socket.bind(&SockAddr::from(addr)).map_err(fail)?;
        socket.listen(1).map_err(fail)?;
        Ok(socket)
    }

    /// Connect all three channels, in protocol order
    pub fn connect_set(
        host: &str,
        base_port: u16,
        options: &TcpOptions,
    ) -> Result<TransportSet<TcpTransport>, TransportError> {
        let open = |channel: ChannelId| -> Result<TcpTransport, TransportError> {
            let addr = resolve(host, base_port, channel)?;
            tracing::info!("Connecting {} channel to {}", channel, addr);
            Self::connect(addr, channel, options)
        };

        let playback = open(ChannelId::Playback)?;
        let record = open(ChannelId::Record)?;
        let control = open(ChannelId::Control)?;
        Ok(TransportSet::new(control, playback, record))
    }

    /// Listen on all three channels and accept one peer on each
    pub fn listen_set(
        host: &str,
        base_port: u16,
        options: &TcpOptions,
    ) -> Result<TransportSet<TcpTransport>, TransportError> {
        let listen = |channel: ChannelId| -> Result<Socket, TransportError> {
            let addr = resolve(host, base_port, channel)?;
            tracing::info!("Listening for {} channel on {}", channel, addr);
            Self::bind(addr, channel)
        };

        // Bind everything first so a fast client never hits a closed port
        let playback = listen(ChannelId::Playback)?;
        let record = listen(ChannelId::Record)?;
        let control = listen(ChannelId::Control)?;

        let playback = Self::accept(&playback, ChannelId::Playback, options)?;
        let record = Self::accept(&record, ChannelId::Record, options)?;
        let control = Self::accept(&control, ChannelId::Control, options)?;
        Ok(TransportSet::new(control, playback, record))
    }

    fn from_socket(
        socket: Socket,
        channel: ChannelId,
        options: &TcpOptions,
    ) -> std::io::Result<Self> {
        let stream: TcpStream = socket.into();
        stream.set_nonblocking(true)?;

        Ok(Self {
            channel,
            stream,
            inbound: HeapRb::new(options.ring_bytes),
            outbound: HeapRb::new(options.ring_bytes),
            open: true,
        })
    }

    /// Which channel this connection carries
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Move bytes between the socket and the staging rings without blocking
    fn pump(&mut self) {
        if !self.open {
            return;
        }

        while !self.outbound.is_empty() {
            let (head, _) = self.outbound.as_slices();
            match self.stream.write(head) {
                Ok(0) => {
                    self.open = false;
                    return;
                }
                Ok(n) => {
                    self.outbound.skip(n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.open = false;
                    return;
                }
            }
        }

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let room = self.inbound.vacant_len().min(READ_CHUNK);
            if room == 0 {
                break;
            }
            match self.stream.read(&mut chunk[..room]) {
                Ok(0) => {
                    self.open = false;
                    break;
                }
                Ok(n) => {
                    self.inbound.push_slice(&chunk[..n]);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.open = false;
                    break;
                }
            }
        }
    }
}

impl Transport for TcpTransport {
    fn is_open(&mut self) -> bool {
        self.pump();
        self.open
    }

    fn data_ready(&mut self) -> usize {
        self.pump();
        self.inbound.occupied_len()
    }

    fn buffer_space(&mut self) -> usize {
        self.pump();
        if self.open {
            self.outbound.vacant_len()
        } else {
            0
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        let available = self.inbound.occupied_len();
        if available < buf.len() {
            return Err(TransportError::ShortRead {
                expected: buf.len(),
                actual: available,
            });
        }
        self.inbound.pop_slice(buf);
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let room = self.outbound.vacant_len();
        if room < buf.len() {
            return Err(TransportError::ShortWrite {
                expected: buf.len(),
                actual: 0,
            });
        }
        self.outbound.push_slice(buf);
        self.pump();
        Ok(())
    }
}

fn configure_socket(socket: &Socket, options: &TcpOptions) -> std::io::Result<()> {
    socket.set_nodelay(true)?;
    if let Some(size) = options.socket_buffer_bytes {
        socket.set_send_buffer_size(size)?;
        socket.set_recv_buffer_size(size)?;
    }
    Ok(())
}

fn resolve(host: &str, base_port: u16, channel: ChannelId) -> Result<SocketAddr, TransportError> {
    let port = base_port + channel.offset();
    (host, port)
        .to_socket_addrs()
        .map_err(|e| TransportError::ConnectFailed {
            channel,
            reason: format!("{}:{}: {}", host, port, e),
        })?
        .next()
        .ok_or_else(|| TransportError::ConnectFailed {
            channel,
            reason: format!("{}:{} did not resolve", host, port),
        })
}
