//! Xen vchan transport
//!
//! Thin binding over `libvchan-xen`. Only built with the `vchan` feature.

use std::os::raw::{c_int, c_void};
use std::ptr::NonNull;

use super::{Endpoint, Transport, TransportSet};
use crate::error::TransportError;
use crate::protocol::ChannelId;

#[repr(C)]
struct RawVchan {
    _private: [u8; 0],
}

#[link(name = "vchan-xen")]
extern "C" {
    fn libvchan_server_init(
        domain: c_int,
        port: c_int,
        read_min: usize,
        write_min: usize,
    ) -> *mut RawVchan;
    fn libvchan_client_init(domain: c_int, port: c_int) -> *mut RawVchan;
    fn libvchan_write(ctrl: *mut RawVchan, data: *const c_void, size: usize) -> c_int;
    fn libvchan_read(ctrl: *mut RawVchan, data: *mut c_void, size: usize) -> c_int;
    fn libvchan_data_ready(ctrl: *mut RawVchan) -> c_int;
    fn libvchan_buffer_space(ctrl: *mut RawVchan) -> c_int;
    fn libvchan_is_open(ctrl: *mut RawVchan) -> c_int;
    fn libvchan_close(ctrl: *mut RawVchan);
}

/// Ring minimums requested by the listening side, per channel
#[derive(Debug, Clone, Copy)]
pub struct VchanRings {
    pub read_min: usize,
    pub write_min: usize,
}

/// One vchan channel
pub struct VchanTransport {
    raw: NonNull<RawVchan>,
}

// Safety: the handle is only ever used from one thread at a time
unsafe impl Send for VchanTransport {}

impl VchanTransport {
    /// Offer a channel to `domain` and wait for it to connect
    pub fn server(
        domain: u32,
        channel: ChannelId,
        rings: VchanRings,
    ) -> Result<Self, TransportError> {
        let raw = unsafe {
            libvchan_server_init(
                domain as c_int,
                channel.port() as c_int,
                rings.read_min,
                rings.write_min,
            )
        };
        NonNull::new(raw)
            .map(|raw| Self { raw })
            .ok_or_else(|| TransportError::ConnectFailed {
                channel,
                reason: "libvchan_server_init failed".to_string(),
            })
    }

    /// Connect to a channel offered by `domain`
    pub fn client(domain: u32, channel: ChannelId) -> Result<Self, TransportError> {
        let raw = unsafe { libvchan_client_init(domain as c_int, channel.port() as c_int) };
        NonNull::new(raw)
            .map(|raw| Self { raw })
            .ok_or_else(|| TransportError::ConnectFailed {
                channel,
                reason: "libvchan_client_init failed".to_string(),
            })
    }

    /// Open all three channels to `domain`, in protocol order
    pub fn open_set(
        endpoint: Endpoint,
        domain: u32,
        rings: impl Fn(ChannelId) -> VchanRings,
    ) -> Result<TransportSet<VchanTransport>, TransportError> {
        let open = |channel: ChannelId| -> Result<VchanTransport, TransportError> {
            tracing::info!("Opening {} vchan (port {})", channel, channel.port());
            match endpoint {
                Endpoint::Listen => Self::server(domain, channel, rings(channel)),
                Endpoint::Connect => Self::client(domain, channel),
            }
        };

        let playback = open(ChannelId::Playback)?;
        let record = open(ChannelId::Record)?;
        let control = open(ChannelId::Control)?;
        Ok(TransportSet::new(control, playback, record))
    }
}

impl Transport for VchanTransport {
    fn is_open(&mut self) -> bool {
        unsafe { libvchan_is_open(self.raw.as_ptr()) == 1 }
    }

    fn data_ready(&mut self) -> usize {
        let ready = unsafe { libvchan_data_ready(self.raw.as_ptr()) };
        ready.max(0) as usize
    }

    fn buffer_space(&mut self) -> usize {
        let space = unsafe { libvchan_buffer_space(self.raw.as_ptr()) };
        space.max(0) as usize
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        // Safety: `buf` is valid for `buf.len()` writable bytes
        let n = unsafe {
            libvchan_read(self.raw.as_ptr(), buf.as_mut_ptr().cast(), buf.len())
        };
        if n < 0 {
            return Err(TransportError::Closed);
        }
        if n as usize != buf.len() {
            return Err(TransportError::ShortRead {
                expected: buf.len(),
                actual: n as usize,
            });
        }
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        // Safety: `buf` is valid for `buf.len()` readable bytes
        let n = unsafe { libvchan_write(self.raw.as_ptr(), buf.as_ptr().cast(), buf.len()) };
        if n < 0 {
            return Err(TransportError::Closed);
        }
        if n as usize != buf.len() {
            return Err(TransportError::ShortWrite {
                expected: buf.len(),
                actual: n as usize,
            });
        }
        Ok(())
    }
}

impl Drop for VchanTransport {
    fn drop(&mut self) {
        // Safety: `raw` came from an init call and is closed exactly once
        unsafe { libvchan_close(self.raw.as_ptr()) }
    }
}
