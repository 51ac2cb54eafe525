//! Offline engine driven by explicit calls
//!
//! Nothing here runs on its own clock: callers set the period length, feed
//! input ports, hand the engine to a process callback and inspect what the
//! callback wrote. Registration history is kept so topology changes can be
//! checked after the fact.

use parking_lot::RwLock;
use std::sync::Arc;

use super::{LatencySource, PeriodBuffers, PortFlow, PortId, PortRegistry};

/// Registration history entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    Registered { name: String, flow: PortFlow },
    Refused { name: String, flow: PortFlow },
    Unregistered { name: String },
}

struct ManualPort {
    name: String,
    flow: PortFlow,
    buffer: Vec<f32>,
    live: bool,
}

/// Per-port latencies, shareable with a notification thread
pub struct ManualLatency {
    sample_rate: u32,
    latencies: RwLock<Vec<Option<u32>>>,
}

impl LatencySource for ManualLatency {
    fn playback_latency(&self, port: PortId) -> Option<u32> {
        self.latencies.read().get(port.0 as usize).copied().flatten()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Engine whose periods are run by hand
pub struct ManualEngine {
    ports: Vec<ManualPort>,
    frames: usize,
    max_frames: usize,
    refuse: usize,
    history: Vec<PortEvent>,
    latency: Arc<ManualLatency>,
}

impl ManualEngine {
    pub fn new(sample_rate: u32, max_frames: usize) -> Self {
        Self {
            ports: Vec::new(),
            frames: max_frames,
            max_frames,
            refuse: 0,
            history: Vec::new(),
            latency: Arc::new(ManualLatency {
                sample_rate,
                latencies: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Set the length of the next period
    pub fn set_frames(&mut self, frames: usize) {
        assert!(frames <= self.max_frames, "period longer than engine buffers");
        self.frames = frames;
    }

    /// Refuse the next `count` registrations
    pub fn refuse_registrations(&mut self, count: usize) {
        self.refuse = count;
    }

    /// Look up a live port by name
    pub fn port(&self, name: &str) -> Option<PortId> {
        self.ports
            .iter()
            .position(|p| p.live && p.name == name)
            .map(|i| PortId(i as u32))
    }

    /// Names of live ports with the given flow, in registration order
    pub fn live_ports(&self, flow: PortFlow) -> Vec<String> {
        self.ports
            .iter()
            .filter(|p| p.live && p.flow == flow)
            .map(|p| p.name.clone())
            .collect()
    }

    /// Copy samples into an input port. Returns false if there is no such port.
    pub fn feed(&mut self, name: &str, samples: &[f32]) -> bool {
        let Some(port) = self.port_mut(name, PortFlow::Input) else {
            return false;
        };
        let n = samples.len().min(port.buffer.len());
        port.buffer[..n].copy_from_slice(&samples[..n]);
        true
    }

    /// Fill any live port's buffer with a constant
    pub fn fill_port(&mut self, name: &str, value: f32) {
        if let Some(port) = self.ports.iter_mut().find(|p| p.live && p.name == name) {
            port.buffer.fill(value);
        }
    }

    /// What the last period left in an output port
    pub fn captured(&self, name: &str) -> Option<&[f32]> {
        self.ports
            .iter()
            .find(|p| p.live && p.name == name && p.flow == PortFlow::Output)
            .map(|p| &p.buffer[..self.frames])
    }

    /// Report a playback latency for a port
    pub fn set_latency(&self, name: &str, frames: u32) {
        if let Some(port) = self.port(name) {
            let mut latencies = self.latency.latencies.write();
            if let Some(slot) = latencies.get_mut(port.0 as usize) {
                *slot = Some(frames);
            }
        }
    }

    /// Shared latency view
    pub fn latency_source(&self) -> Arc<ManualLatency> {
        self.latency.clone()
    }

    /// Registration history
    pub fn history(&self) -> &[PortEvent] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    fn port_mut(&mut self, name: &str, flow: PortFlow) -> Option<&mut ManualPort> {
        self.ports
            .iter_mut()
            .find(|p| p.live && p.flow == flow && p.name == name)
    }
}

impl PortRegistry for ManualEngine {
    fn register_port(&mut self, name: &str, flow: PortFlow) -> Option<PortId> {
        if self.refuse > 0 {
            self.refuse -= 1;
            self.history.push(PortEvent::Refused {
                name: name.to_string(),
                flow,
            });
            return None;
        }

        let id = PortId(self.ports.len() as u32);
        self.ports.push(ManualPort {
            name: name.to_string(),
            flow,
            buffer: vec![0.0; self.max_frames],
            live: true,
        });
        self.latency.latencies.write().push(Some(0));
        self.history.push(PortEvent::Registered {
            name: name.to_string(),
            flow,
        });
        Some(id)
    }

    fn unregister_port(&mut self, port: PortId) {
        if let Some(entry) = self.ports.get_mut(port.0 as usize) {
            if entry.live {
                entry.live = false;
                if let Some(slot) = self.latency.latencies.write().get_mut(port.0 as usize) {
                    *slot = None;
                }
                self.history.push(PortEvent::Unregistered {
                    name: entry.name.clone(),
                });
            }
        }
    }
}

impl PeriodBuffers for ManualEngine {
    fn frames(&self) -> usize {
        self.frames
    }

    fn input(&self, port: PortId) -> Option<&[f32]> {
        self.ports
            .get(port.0 as usize)
            .filter(|p| p.live && p.flow == PortFlow::Input)
            .map(|p| &p.buffer[..self.frames])
    }

    fn output(&mut self, port: PortId) -> Option<&mut [f32]> {
        let frames = self.frames;
        self.ports
            .get_mut(port.0 as usize)
            .filter(|p| p.live && p.flow == PortFlow::Output)
            .map(|p| &mut p.buffer[..frames])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_release() {
        let mut engine = ManualEngine::new(48000, 64);
        let port = engine.register_port("in_0", PortFlow::Input).unwrap();
        assert_eq!(engine.port("in_0"), Some(port));
        assert_eq!(engine.live_ports(PortFlow::Input), vec!["in_0".to_string()]);

        engine.unregister_port(port);
        assert_eq!(engine.port("in_0"), None);
        assert!(engine.input(port).is_none());
        assert_eq!(
            engine.history().last(),
            Some(&PortEvent::Unregistered {
                name: "in_0".to_string()
            })
        );
    }

    #[test]
    fn test_refused_registrations() {
        let mut engine = ManualEngine::new(48000, 64);
        engine.refuse_registrations(1);
        assert!(engine.register_port("out_0", PortFlow::Output).is_none());
        assert!(engine.register_port("out_1", PortFlow::Output).is_some());
    }

    #[test]
    fn test_buffers_follow_period_length() {
        let mut engine = ManualEngine::new(48000, 64);
        let input = engine.register_port("in_0", PortFlow::Input).unwrap();
        let output = engine.register_port("out_0", PortFlow::Output).unwrap();
        engine.set_frames(16);

        assert!(engine.feed("in_0", &[0.5; 16]));
        assert_eq!(engine.input(input).unwrap(), &[0.5; 16][..]);

        engine.output(output).unwrap().fill(0.25);
        assert_eq!(engine.captured("out_0").unwrap().len(), 16);
        // Flows are not interchangeable
        assert!(engine.output(input).is_none());
        assert!(engine.input(output).is_none());
    }

    #[test]
    fn test_latency_view() {
        let mut engine = ManualEngine::new(44100, 64);
        let port = engine.register_port("out_0", PortFlow::Output).unwrap();
        let view = engine.latency_source();

        engine.set_latency("out_0", 512);
        assert_eq!(view.playback_latency(port), Some(512));
        assert_eq!(view.sample_rate(), 44100);

        engine.unregister_port(port);
        assert_eq!(view.playback_latency(port), None);
    }
}
