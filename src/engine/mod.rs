//! Audio engine capability
//!
//! The bridge never owns an audio graph. It consumes an engine through the
//! traits below: named ports it can register and release, per-period buffers
//! for those ports, a latency query, and asynchronous notifications.

pub mod cpal_host;
pub mod device;
pub mod manual;

pub use cpal_host::{ActiveHost, CpalHost, CpalPorts};
pub use manual::{ManualEngine, PortEvent};

/// Engine-side handle for one registered port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId(pub u32);

impl PortId {
    const NONE: u32 = u32::MAX;

    /// Pack an optional port into a single word for atomic publication
    pub(crate) fn to_raw(port: Option<PortId>) -> u32 {
        port.map_or(Self::NONE, |p| p.0)
    }

    pub(crate) fn from_raw(raw: u32) -> Option<PortId> {
        (raw != Self::NONE).then_some(PortId(raw))
    }
}

/// Direction of audio through a port, from the engine's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortFlow {
    /// Graph audio arrives here; the bridge reads it
    Input,
    /// The bridge writes audio here for the graph
    Output,
}

/// Port registration
pub trait PortRegistry {
    /// Register a port. `None` if the engine refuses it.
    fn register_port(&mut self, name: &str, flow: PortFlow) -> Option<PortId>;

    /// Release a previously registered port
    fn unregister_port(&mut self, port: PortId);
}

/// Audio buffers for the current period
pub trait PeriodBuffers {
    /// Frames in this period
    fn frames(&self) -> usize;

    /// Samples delivered to an input port
    fn input(&self, port: PortId) -> Option<&[f32]>;

    /// Buffer to fill for an output port
    fn output(&mut self, port: PortId) -> Option<&mut [f32]>;
}

/// Everything the period callback may touch
pub trait ProcessScope: PortRegistry + PeriodBuffers {}

impl<T: PortRegistry + PeriodBuffers + ?Sized> ProcessScope for T {}

/// Latency queries usable from any thread
pub trait LatencySource: Send + Sync {
    /// Maximum playback latency of a port, in frames
    fn playback_latency(&self, port: PortId) -> Option<u32>;

    /// Engine sample rate
    fn sample_rate(&self) -> u32;
}

/// Engine notifications delivered outside the period callback's cadence
pub trait EngineNotifications: Send + Sync {
    /// The engine missed a deadline by `delay_us` microseconds
    fn on_underrun(&self, delay_us: f32);

    /// Ports or connections changed
    fn on_graph_changed(&self);
}

/// The period callback plus its shutdown hook
pub trait ProcessHandler: Send + 'static {
    /// Run one period
    fn process<S: ProcessScope>(&mut self, scope: &mut S);

    /// Release everything registered through `registry`
    fn shutdown<R: PortRegistry>(&mut self, registry: &mut R);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_id_packing() {
        assert_eq!(PortId::from_raw(PortId::to_raw(None)), None);
        assert_eq!(
            PortId::from_raw(PortId::to_raw(Some(PortId(3)))),
            Some(PortId(3))
        );
    }
}
