//! In-process duplex pipes
//!
//! Each direction is a lock-free SPSC byte ring, so one endpoint can live on
//! a real-time thread while the other is driven from anywhere else.

use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{Transport, TransportSet};
use crate::error::TransportError;

/// One end of an in-process pipe
pub struct MemoryTransport {
    tx: HeapProd<u8>,
    rx: HeapCons<u8>,
    local: Arc<AtomicBool>,
    remote: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Mark this end connected or disconnected
    pub fn set_open(&self, open: bool) {
        self.local.store(open, Ordering::Release);
    }

    /// Bytes waiting to be read by the peer
    pub fn in_flight(&self) -> usize {
        self.tx.occupied_len()
    }
}

/// Create a connected pipe with `capacity` bytes in each direction
pub fn pair(capacity: usize) -> (MemoryTransport, MemoryTransport) {
    pair_with_capacity(capacity, capacity)
}

/// Create a connected pipe with separate capacities per direction
pub fn pair_with_capacity(
    near_to_far: usize,
    far_to_near: usize,
) -> (MemoryTransport, MemoryTransport) {
    let (near_tx, far_rx) = HeapRb::<u8>::new(near_to_far).split();
    let (far_tx, near_rx) = HeapRb::<u8>::new(far_to_near).split();
    let near_open = Arc::new(AtomicBool::new(true));
    let far_open = Arc::new(AtomicBool::new(true));

    (
        MemoryTransport {
            tx: near_tx,
            rx: near_rx,
            local: near_open.clone(),
            remote: far_open.clone(),
        },
        MemoryTransport {
            tx: far_tx,
            rx: far_rx,
            local: far_open,
            remote: near_open,
        },
    )
}

/// Create two connected channel sets, one per peer
pub fn channel_set(
    capacity: usize,
) -> (TransportSet<MemoryTransport>, TransportSet<MemoryTransport>) {
    let (control_a, control_b) = pair(capacity);
    let (playback_a, playback_b) = pair(capacity);
    let (record_a, record_b) = pair(capacity);
    (
        TransportSet::new(control_a, playback_a, record_a),
        TransportSet::new(control_b, playback_b, record_b),
    )
}

impl Transport for MemoryTransport {
    fn is_open(&mut self) -> bool {
        self.local.load(Ordering::Acquire) && self.remote.load(Ordering::Acquire)
    }

    fn data_ready(&mut self) -> usize {
        self.rx.occupied_len()
    }

    fn buffer_space(&mut self) -> usize {
        self.tx.vacant_len()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        let available = self.rx.occupied_len();
        if available < buf.len() {
            return Err(TransportError::ShortRead {
                expected: buf.len(),
                actual: available,
            });
        }
        self.rx.pop_slice(buf);
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let room = self.tx.vacant_len();
        if room < buf.len() {
            return Err(TransportError::ShortWrite {
                expected: buf.len(),
                actual: 0,
            });
        }
        self.tx.push_slice(buf);
        Ok(())
    }
}
