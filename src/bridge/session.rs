//! State shared between the period loop and engine notifications
//!
//! Everything here is an atomic scalar. The period loop and the notification
//! thread never wait on each other; larger state (ports, scratch) stays with
//! the period loop.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use super::role::Role;
use crate::constants::{MAX_CHANNELS, MIN_LATENCY_FRAMES};
use crate::engine::PortId;

/// Readiness of the port topology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TopologyState {
    TornDown = 0,
    Building = 1,
    Ready = 2,
}

impl TopologyState {
    fn from_u8(value: u8) -> Self {
        match value {
            2 => TopologyState::Ready,
            1 => TopologyState::Building,
            _ => TopologyState::TornDown,
        }
    }
}

/// Point-in-time copy of the session counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub paused: bool,
    pub topology: TopologyState,
    pub play_count: usize,
    pub record_count: usize,
    pub underrun_total: u32,
    pub latency_ms: u32,
    pub periods: u64,
    pub rebuilds: u64,
    /// Periods whose outgoing audio never reached the peer
    pub dropped_periods: u64,
}

/// The single live bridge instance
pub struct Session {
    role: Role,
    paused: AtomicBool,
    topology: AtomicU8,
    play_count: AtomicU32,
    record_count: AtomicU32,
    play_ports: [AtomicU32; MAX_CHANNELS],
    period_size: AtomicU32,
    sample_rate: u32,
    underrun_debt: AtomicU32,
    underrun_total: AtomicU32,
    latency_ms: AtomicU32,
    periods: AtomicU64,
    rebuilds: AtomicU64,
    dropped_periods: AtomicU64,
}

impl Session {
    /// New session: paused, torn down, no channels
    pub fn new(role: Role, sample_rate: u32, period_size: u32) -> Self {
        Self {
            role,
            paused: AtomicBool::new(true),
            topology: AtomicU8::new(TopologyState::TornDown as u8),
            play_count: AtomicU32::new(0),
            record_count: AtomicU32::new(0),
            play_ports: std::array::from_fn(|_| AtomicU32::new(PortId::to_raw(None))),
            period_size: AtomicU32::new(period_size),
            sample_rate,
            underrun_debt: AtomicU32::new(0),
            underrun_total: AtomicU32::new(0),
            latency_ms: AtomicU32::new(MIN_LATENCY_FRAMES * 1000 / sample_rate.max(1)),
            periods: AtomicU64::new(0),
            rebuilds: AtomicU64::new(0),
            dropped_periods: AtomicU64::new(0),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Store the governor's verdict. Returns the previous value.
    pub(crate) fn set_paused(&self, paused: bool) -> bool {
        self.paused.swap(paused, Ordering::AcqRel)
    }

    pub fn topology(&self) -> TopologyState {
        TopologyState::from_u8(self.topology.load(Ordering::Acquire))
    }

    pub(crate) fn set_topology(&self, state: TopologyState) {
        self.topology.store(state as u8, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.topology() == TopologyState::Ready
    }

    pub fn play_count(&self) -> usize {
        self.play_count.load(Ordering::Acquire) as usize
    }

    pub fn record_count(&self) -> usize {
        self.record_count.load(Ordering::Acquire) as usize
    }

    pub(crate) fn set_counts(&self, play: usize, record: usize) {
        self.play_count.store(play as u32, Ordering::Release);
        self.record_count.store(record as u32, Ordering::Release);
    }

    /// Publish a play-direction port for latency queries
    pub(crate) fn publish_play_port(&self, index: usize, port: Option<PortId>) {
        if let Some(slot) = self.play_ports.get(index) {
            slot.store(PortId::to_raw(port), Ordering::Release);
        }
    }

    /// Play-direction ports currently published
    pub fn play_ports(&self) -> impl Iterator<Item = PortId> + '_ {
        let count = self.play_count().min(MAX_CHANNELS);
        self.play_ports[..count]
            .iter()
            .filter_map(|slot| PortId::from_raw(slot.load(Ordering::Acquire)))
    }

    pub fn period_size(&self) -> u32 {
        self.period_size.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Add underrun fragments reported by the engine
    pub(crate) fn add_underruns(&self, fragments: u32) {
        self.underrun_debt.fetch_add(fragments, Ordering::AcqRel);
        self.underrun_total.fetch_add(fragments, Ordering::AcqRel);
    }

    /// Read and clear the outstanding underrun debt
    pub(crate) fn take_underrun_debt(&self) -> u32 {
        self.underrun_debt.swap(0, Ordering::AcqRel)
    }

    /// Replace the debt with a count reported by the peer
    pub(crate) fn overwrite_underruns(&self, count: u32) {
        self.underrun_debt.store(count, Ordering::Release);
    }

    pub fn underrun_debt(&self) -> u32 {
        self.underrun_debt.load(Ordering::Acquire)
    }

    /// Fragments lost since startup
    pub fn underrun_total(&self) -> u32 {
        self.underrun_total.load(Ordering::Acquire)
    }

    pub fn latency_ms(&self) -> u32 {
        self.latency_ms.load(Ordering::Relaxed)
    }

    pub(crate) fn set_latency_ms(&self, ms: u32) {
        self.latency_ms.store(ms, Ordering::Relaxed);
    }

    pub(crate) fn count_period(&self) {
        self.periods.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_rebuild(&self) {
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_dropped(&self) {
        self.dropped_periods.fetch_add(1, Ordering::Relaxed);
    }

    /// Stop audio and gate off every port before they are released
    pub fn begin_shutdown(&self) {
        self.set_paused(true);
        self.set_topology(TopologyState::TornDown);
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            paused: self.is_paused(),
            topology: self.topology(),
            play_count: self.play_count(),
            record_count: self.record_count(),
            underrun_total: self.underrun_total(),
            latency_ms: self.latency_ms(),
            periods: self.periods.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            dropped_periods: self.dropped_periods.load(Ordering::Relaxed),
        }
    }
}

/// Pause verdict from transport liveness alone
#[inline]
pub fn governor(record_open: bool, play_open: bool) -> bool {
    !(record_open && play_open)
}
