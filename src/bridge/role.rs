//! Client and server roles
//!
//! Both roles run the same period loop. They differ in which channel carries
//! audio in, which carries it out, how ports are named and who owns the
//! channel topology.

use std::fmt::{self, Write as _};

use crate::engine::PortFlow;
use crate::protocol::ChannelId;
use crate::transport::Endpoint;

/// Audio direction as seen on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Playback,
    Record,
}

impl Direction {
    pub fn channel(self) -> ChannelId {
        match self {
            Direction::Playback => ChannelId::Playback,
            Direction::Record => ChannelId::Record,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Playback => "playback",
            Direction::Record => "record",
        })
    }
}

/// Which side of the bridge this process is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Runs next to applications; mirrors the remote device as ports
    Client,
    /// Runs next to the hardware; owns the channel topology
    Server,
}

impl Role {
    /// Direction whose samples arrive from the peer
    pub fn incoming(self) -> Direction {
        match self {
            Role::Client => Direction::Record,
            Role::Server => Direction::Playback,
        }
    }

    /// Direction whose samples are sent to the peer
    pub fn outgoing(self) -> Direction {
        match self {
            Role::Client => Direction::Playback,
            Role::Server => Direction::Record,
        }
    }

    /// Engine flow of the ports carrying `direction`
    pub fn flow(self, direction: Direction) -> PortFlow {
        if direction == self.incoming() {
            PortFlow::Output
        } else {
            PortFlow::Input
        }
    }

    /// Engine port name for channel `index` of `direction`
    pub fn port_name(self, direction: Direction, index: usize) -> PortName {
        let mut name = PortName::default();
        // PortName holds any name these formats produce
        let _ = match (self, direction) {
            (Role::Client, Direction::Playback) => write!(name, "playback_{}", index + 1),
            (Role::Client, Direction::Record) => write!(name, "record_{}", index + 1),
            (Role::Server, Direction::Playback) => write!(name, "out_{}", index),
            (Role::Server, Direction::Record) => write!(name, "in_{}", index),
        };
        name
    }

    /// Engine client name
    pub fn client_name(self) -> &'static str {
        match self {
            Role::Client => "bridge-client",
            Role::Server => "bridge-passthru",
        }
    }

    /// How this role opens its transports
    pub fn endpoint(self) -> Endpoint {
        match self {
            Role::Client => Endpoint::Connect,
            Role::Server => Endpoint::Listen,
        }
    }

    /// Whether this role decides the channel topology
    pub fn owns_topology(self) -> bool {
        self == Role::Server
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Client => "client",
            Role::Server => "server",
        })
    }
}

const PORT_NAME_LEN: usize = 24;

/// Port name formatted without allocating
#[derive(Clone, Copy, Default)]
pub struct PortName {
    buf: [u8; PORT_NAME_LEN],
    len: usize,
}

impl PortName {
    pub fn as_str(&self) -> &str {
        // Only whole `&str` values are ever appended
        std::str::from_utf8(&self.buf[..self.len]).unwrap_or_default()
    }
}

impl fmt::Write for PortName {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.len + s.len();
        if end > PORT_NAME_LEN {
            return Err(fmt::Error);
        }
        self.buf[self.len..end].copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}

impl fmt::Debug for PortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for PortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
