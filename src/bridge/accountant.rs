//! Underrun and latency bookkeeping
//!
//! Runs on whatever thread the engine delivers notifications on. Touches the
//! session only through its atomics.

use std::sync::Arc;

use super::session::Session;
use crate::constants::MIN_LATENCY_FRAMES;
use crate::engine::{EngineNotifications, LatencySource};

/// Periods lost to an underrun of `delay_us` microseconds, rounded up
pub fn underrun_fragments(delay_us: f32, sample_rate: u32, period_size: u32) -> u32 {
    if period_size == 0 {
        return 0;
    }
    let fragments =
        (delay_us as f64 / 1e6 * sample_rate as f64 / period_size as f64).ceil();
    if fragments.is_finite() && fragments > 0.0 {
        fragments.min(u32::MAX as f64) as u32
    } else {
        0
    }
}

/// Latency in milliseconds for a worst-case port latency, floored at 16 frames
pub fn latency_ms(max_latency_frames: u32, sample_rate: u32) -> u32 {
    let frames = max_latency_frames.max(MIN_LATENCY_FRAMES) as u64;
    (frames * 1000 / sample_rate.max(1) as u64) as u32
}

pub struct XrunAccountant {
    session: Arc<Session>,
    latency: Arc<dyn LatencySource>,
}

impl XrunAccountant {
    pub fn new(session: Arc<Session>, latency: Arc<dyn LatencySource>) -> Self {
        Self { session, latency }
    }

    /// Recompute the latency estimate from the play-direction ports
    pub fn on_topology_changed(&self) {
        if !self.session.is_ready() {
            return;
        }
        let max_frames = self
            .session
            .play_ports()
            .filter_map(|port| self.latency.playback_latency(port))
            .max()
            .unwrap_or(0);
        self.session
            .set_latency_ms(latency_ms(max_frames, self.latency.sample_rate()));
    }
}

impl EngineNotifications for XrunAccountant {
    fn on_underrun(&self, delay_us: f32) {
        let fragments = underrun_fragments(
            delay_us,
            self.session.sample_rate(),
            self.session.period_size(),
        );
        self.session.add_underruns(fragments);
    }

    fn on_graph_changed(&self) {
        self.on_topology_changed();
    }
}
