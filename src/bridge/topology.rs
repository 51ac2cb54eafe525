//! Port topology manager
//!
//! Owns the engine ports of both directions. A rebuild always runs
//! `TornDown -> release -> store counts -> Building -> create -> Ready`, so the
//! period loop, which gates on `Ready`, never sees a half-built topology.

use std::sync::Arc;

use super::events::{BridgeEvent, EventSink};
use super::role::{Direction, Role};
use super::session::{Session, TopologyState};
use crate::constants::MAX_CHANNELS;
use crate::engine::{PortId, PortRegistry};

/// Ports of one direction; only the first `count` slots are meaningful
#[derive(Debug, Clone, Copy, Default)]
pub struct PortBank {
    ports: [Option<PortId>; MAX_CHANNELS],
    count: usize,
}

impl PortBank {
    pub fn count(&self) -> usize {
        self.count
    }

    /// Ports of the current topology; `None` where the engine refused one
    pub fn ports(&self) -> &[Option<PortId>] {
        &self.ports[..self.count]
    }
}

pub struct PortTopology {
    role: Role,
    play: PortBank,
    record: PortBank,
    session: Arc<Session>,
    max_channels: usize,
    events: EventSink,
}

impl PortTopology {
    pub fn new(role: Role, session: Arc<Session>, max_channels: usize, events: EventSink) -> Self {
        Self {
            role,
            play: PortBank::default(),
            record: PortBank::default(),
            session,
            max_channels: max_channels.clamp(1, MAX_CHANNELS),
            events,
        }
    }

    pub fn max_channels(&self) -> usize {
        self.max_channels
    }

    /// Clamp a requested channel count to what this bridge supports
    pub fn clamp(&self, count: usize) -> usize {
        count.min(self.max_channels)
    }

    pub fn bank(&self, direction: Direction) -> &PortBank {
        match direction {
            Direction::Playback => &self.play,
            Direction::Record => &self.record,
        }
    }

    fn bank_mut(&mut self, direction: Direction) -> &mut PortBank {
        match direction {
            Direction::Playback => &mut self.play,
            Direction::Record => &mut self.record,
        }
    }

    /// Build the initial topology
    pub fn open<R>(&mut self, registry: &mut R, play: usize, record: usize)
    where
        R: PortRegistry + ?Sized,
    {
        self.build(registry, play, record);
    }

    /// Replace the topology with new channel counts
    pub fn rebuild<R>(&mut self, registry: &mut R, play: usize, record: usize)
    where
        R: PortRegistry + ?Sized,
    {
        self.build(registry, play, record);
        self.session.count_rebuild();
        self.events.emit(BridgeEvent::Reconfigured {
            play: self.play.count,
            record: self.record.count,
        });
    }

    /// Gate the period loop off and release every port
    pub fn close<R>(&mut self, registry: &mut R)
    where
        R: PortRegistry + ?Sized,
    {
        self.session.set_topology(TopologyState::TornDown);
        self.release(registry);
    }

    fn build<R>(&mut self, registry: &mut R, play: usize, record: usize)
    where
        R: PortRegistry + ?Sized,
    {
        self.session.set_topology(TopologyState::TornDown);
        self.release(registry);

        let (play, record) = (self.clamp(play), self.clamp(record));
        self.play.count = play;
        self.record.count = record;
        self.session.set_counts(play, record);

        self.session.set_topology(TopologyState::Building);
        self.create(registry);
        self.session.set_topology(TopologyState::Ready);
    }

    fn directions(&self) -> [Direction; 2] {
        [self.role.incoming(), self.role.outgoing()]
    }

    fn create<R>(&mut self, registry: &mut R)
    where
        R: PortRegistry + ?Sized,
    {
        for direction in self.directions() {
            let flow = self.role.flow(direction);
            for index in 0..self.bank(direction).count {
                let name = self.role.port_name(direction, index);
                let port = registry.register_port(name.as_str(), flow);
                if port.is_none() {
                    self.events
                        .emit(BridgeEvent::PortUnavailable { direction, index });
                }
                self.bank_mut(direction).ports[index] = port;
                if direction == Direction::Playback {
                    self.session.publish_play_port(index, port);
                }
            }
        }
    }

    fn release<R>(&mut self, registry: &mut R)
    where
        R: PortRegistry + ?Sized,
    {
        for direction in self.directions() {
            for index in 0..MAX_CHANNELS {
                if let Some(port) = self.bank_mut(direction).ports[index].take() {
                    registry.unregister_port(port);
                }
                if direction == Direction::Playback {
                    self.session.publish_play_port(index, None);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::events::event_channel;
    use crate::engine::{ManualEngine, PortEvent, PortFlow};

    fn topology(role: Role) -> (PortTopology, Arc<Session>, ManualEngine) {
        let session = Arc::new(Session::new(role, 48000, 256));
        let topology = PortTopology::new(role, session.clone(), 2, EventSink::disabled());
        (topology, session, ManualEngine::new(48000, 256))
    }

    fn registered(engine: &ManualEngine) -> Vec<String> {
        engine
            .history()
            .iter()
            .filter_map(|e| match e {
                PortEvent::Registered { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_open_creates_incoming_first() {
        let (mut topology, session, mut engine) = topology(Role::Client);
        topology.open(&mut engine, 2, 2);

        assert!(session.is_ready());
        assert_eq!(
            registered(&engine),
            vec!["record_1", "record_2", "playback_1", "playback_2"]
        );
        assert_eq!(
            engine.live_ports(PortFlow::Output),
            vec!["record_1".to_string(), "record_2".to_string()]
        );
    }

    #[test]
    fn test_server_port_names() {
        let (mut topology, _session, mut engine) = topology(Role::Server);
        topology.open(&mut engine, 2, 1);
        assert_eq!(registered(&engine), vec!["out_0", "out_1", "in_0"]);
    }

    #[test]
    fn test_rebuild_releases_then_recreates() {
        let (mut topology, session, mut engine) = topology(Role::Client);
        topology.open(&mut engine, 2, 2);
        engine.clear_history();

        topology.rebuild(&mut engine, 1, 2);

        let unregistered = engine
            .history()
            .iter()
            .take_while(|e| matches!(e, PortEvent::Unregistered { .. }))
            .count();
        assert_eq!(unregistered, 4);
        assert_eq!(registered(&engine), vec!["record_1", "record_2", "playback_1"]);
        assert_eq!(topology.bank(Direction::Playback).count(), 1);
        assert_eq!(topology.bank(Direction::Record).count(), 2);
        assert_eq!(session.stats().rebuilds, 1);
        assert!(session.is_ready());
    }

    #[test]
    fn test_counts_are_clamped() {
        let (mut topology, session, mut engine) = topology(Role::Client);
        topology.open(&mut engine, 8, 5);
        assert_eq!(session.play_count(), 2);
        assert_eq!(session.record_count(), 2);
    }

    #[test]
    fn test_refused_port_leaves_gap() {
        let session = Arc::new(Session::new(Role::Server, 48000, 256));
        let (sink, events) = event_channel(8);
        let mut topology = PortTopology::new(Role::Server, session.clone(), 2, sink);
        let mut engine = ManualEngine::new(48000, 256);

        engine.refuse_registrations(1);
        topology.open(&mut engine, 2, 2);

        assert_eq!(topology.bank(Direction::Playback).ports()[0], None);
        assert!(topology.bank(Direction::Playback).ports()[1].is_some());
        assert_eq!(session.play_ports().count(), 1);
        assert_eq!(
            events.try_recv().ok(),
            Some(BridgeEvent::PortUnavailable {
                direction: Direction::Playback,
                index: 0
            })
        );
    }

    #[test]
    fn test_close_releases_everything() {
        let (mut topology, session, mut engine) = topology(Role::Server);
        topology.open(&mut engine, 2, 2);
        topology.close(&mut engine);

        assert_eq!(session.topology(), TopologyState::TornDown);
        assert!(engine.live_ports(PortFlow::Input).is_empty());
        assert!(engine.live_ports(PortFlow::Output).is_empty());
        assert_eq!(session.play_ports().count(), 0);
    }
}
